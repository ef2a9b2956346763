//! Run cancellation tokens.
//!
//! Each graph run gets a `CancelToken`. Branches receive child tokens, so
//! cancelling the run stops every branch while a single branch can be
//! stopped on its own (e.g. on timeout) without touching its siblings.
//!
//! Cancellation is observed at await points: the turn loop races every
//! `stream.next()` and every tool batch against [`CancelToken::cancelled`].

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// A cloneable cancellation signal shared between the caller and a run.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the token (or any ancestor) is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// A token cancelled together with this one, but cancellable on its own.
    pub fn child(&self) -> CancelToken {
        Self {
            inner: self.inner.child_token(),
        }
    }

    /// The underlying token, handed to tools through their context.
    pub fn as_token(&self) -> CancellationToken {
        self.inner.clone()
    }
}

/// Tracks the tokens of in-flight runs by run id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a run.
    pub fn register(&self, run_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(run_id.to_owned(), token.clone());
        token
    }

    /// Cancel a running graph. Returns true if a token was found.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.tokens.lock().get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token for a run (called when the run finishes).
    pub fn remove(&self, run_id: &str) {
        self.tokens.lock().remove(run_id);
    }

    pub fn is_running(&self, run_id: &str) -> bool {
        self.tokens.lock().contains_key(run_id)
    }
}
