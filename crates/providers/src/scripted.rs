//! Deterministic adapter that replays pre-scripted turns.
//!
//! Each call to `chat_stream` pops the next scripted turn and streams its
//! chunks, optionally sleeping between chunks so concurrent branches overlap
//! in wall-clock time. Every request is recorded for later inspection.
//!
//! Configured from `client_options`:
//!
//! ```json
//! { "turns": [[{"type": "token", "text": "hi"}]], "delay_ms": 10, "thinking": false }
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use sy_domain::capability::ModelCapabilities;
use sy_domain::error::{Error, Result};
use sy_domain::stream::{BoxStream, ModelChunk, Usage};

use crate::traits::{ChatRequest, ModelAdapter};

pub struct ScriptedAdapter {
    id: String,
    model: String,
    capabilities: ModelCapabilities,
    turns: Mutex<VecDeque<Vec<ModelChunk>>>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
}

#[derive(Debug, Default, Deserialize)]
struct ScriptOptions {
    #[serde(default)]
    turns: Vec<Vec<ModelChunk>>,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    thinking: bool,
}

impl ScriptedAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: "scripted".into(),
            capabilities: ModelCapabilities::default(),
            turns: Mutex::new(VecDeque::new()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Build from an agent's `client_options` table.
    pub fn from_options(id: &str, model: Option<&str>, options: &serde_json::Value) -> Result<Self> {
        let opts: ScriptOptions = if options.is_null() {
            ScriptOptions::default()
        } else {
            serde_json::from_value(options.clone()).map_err(|e| {
                Error::Config(format!("scripted adapter '{id}': invalid client_options: {e}"))
            })?
        };
        let mut adapter = Self::new(id);
        if let Some(m) = model {
            adapter.model = m.to_owned();
        }
        if opts.delay_ms > 0 {
            adapter.delay = Some(Duration::from_millis(opts.delay_ms));
        }
        adapter.capabilities.requires_thinking = opts.thinking;
        for turn in opts.turns {
            adapter = adapter.turn(turn);
        }
        Ok(adapter)
    }

    /// Queue one turn's chunks.
    pub fn turn(self, chunks: Vec<ModelChunk>) -> Self {
        self.turns.lock().push_back(chunks);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Advertise that this backend needs a reasoning block on tool-use turns.
    pub fn requiring_thinking(mut self) -> Self {
        self.capabilities.requires_thinking = true;
        self
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining_turns(&self) -> usize {
        self.turns.lock().len()
    }
}

#[async_trait::async_trait]
impl ModelAdapter for ScriptedAdapter {
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<ModelChunk>>> {
        self.requests.lock().push(req);
        let mut chunks = self.turns.lock().pop_front().unwrap_or_else(|| {
            tracing::debug!(adapter = %self.id, "script exhausted, ending turn");
            Vec::new()
        });
        if !matches!(chunks.last(), Some(ModelChunk::Done { .. })) {
            chunks.push(ModelChunk::Done {
                usage: Some(Usage::default()),
                finish_reason: Some("stop".into()),
            });
        }
        let delay = self.delay;

        let stream = async_stream::stream! {
            for chunk in chunks {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                yield Ok(chunk);
            }
        };
        Ok(Box::pin(stream))
    }

    fn capabilities(&self) -> &ModelCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ── Chunk builders ─────────────────────────────────────────────────

/// A plain text turn.
pub fn text(text: &str) -> Vec<ModelChunk> {
    vec![ModelChunk::Token { text: text.into() }]
}

/// A turn that streams `parts` as separate tokens.
pub fn tokens(parts: &[&str]) -> Vec<ModelChunk> {
    parts.iter().map(|p| ModelChunk::Token { text: (*p).into() }).collect()
}

/// A turn with a single tool call whose arguments arrive in one delta.
pub fn tool_call(call_id: &str, name: &str, args: serde_json::Value) -> Vec<ModelChunk> {
    vec![
        ModelChunk::ToolCallStarted {
            index: 0,
            call_id: Some(call_id.into()),
            tool_name: name.into(),
        },
        ModelChunk::ToolCallDelta {
            index: 0,
            call_id: Some(call_id.into()),
            delta: args.to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn collect(adapter: &ScriptedAdapter) -> Vec<ModelChunk> {
        let stream = adapter.chat_stream(ChatRequest::default()).await.unwrap();
        stream.map(|c| c.unwrap()).collect().await
    }

    #[tokio::test]
    async fn replays_turns_in_order_and_appends_done() {
        let adapter = ScriptedAdapter::new("s").turn(text("one")).turn(text("two"));
        let first = collect(&adapter).await;
        assert_eq!(first[0], ModelChunk::Token { text: "one".into() });
        assert!(matches!(first.last(), Some(ModelChunk::Done { .. })));
        let second = collect(&adapter).await;
        assert_eq!(second[0], ModelChunk::Token { text: "two".into() });
        assert_eq!(adapter.requests().len(), 2);
        assert_eq!(adapter.remaining_turns(), 0);
    }

    #[tokio::test]
    async fn exhausted_script_yields_only_done() {
        let adapter = ScriptedAdapter::new("s");
        let chunks = collect(&adapter).await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], ModelChunk::Done { .. }));
    }

    #[test]
    fn options_parse_turns_and_flags() {
        let opts = serde_json::json!({
            "turns": [[{ "type": "token", "text": "hi" }]],
            "delay_ms": 5,
            "thinking": true
        });
        let adapter = ScriptedAdapter::from_options("s", Some("m1"), &opts).unwrap();
        assert!(adapter.capabilities().requires_thinking);
        assert_eq!(adapter.model(), "m1");
        assert_eq!(adapter.remaining_turns(), 1);
        assert_eq!(adapter.delay, Some(Duration::from_millis(5)));
    }

    #[test]
    fn invalid_options_are_a_config_error() {
        let opts = serde_json::json!({ "turns": "nope" });
        let err = ScriptedAdapter::from_options("s", None, &opts).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
