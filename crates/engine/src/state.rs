use std::sync::Arc;

use parking_lot::Mutex;
use sy_domain::config::RunConfig;
use sy_domain::session::{merge_into, CodeSessionContext, CodeSessions};
use sy_domain::trace::TraceEvent;
use sy_tools::ToolArtifact;

use crate::runtime::cancel::CancelToken;

/// Per-run state passed explicitly into every node invocation.
///
/// Cloning is cheap: the code-session map is shared, and the cancel token
/// is a handle onto the same signal.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub thread_id: Option<String>,
    pub limits: RunConfig,
    /// Tool name → current code session. Seeded from the thread, updated by
    /// tool artifacts, returned with the outcome.
    pub code_sessions: Arc<Mutex<CodeSessions>>,
    pub cancel: CancelToken,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, limits: RunConfig) -> Self {
        Self {
            run_id: run_id.into(),
            thread_id: None,
            limits,
            code_sessions: Arc::new(Mutex::new(CodeSessions::new())),
            cancel: CancelToken::new(),
        }
    }

    pub fn new_run_id() -> String {
        format!("run_{}", uuid::Uuid::new_v4().simple())
    }

    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_sessions(self, sessions: CodeSessions) -> Self {
        *self.code_sessions.lock() = sessions;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The current code session for a tool, if any.
    pub fn session_for(&self, tool_name: &str) -> Option<CodeSessionContext> {
        self.code_sessions.lock().get(tool_name).cloned()
    }

    /// Merge a tool's artifact into the run's code sessions.
    ///
    /// Artifacts without a session id carry no session state and are ignored.
    pub fn merge_artifact(&self, tool_name: &str, artifact: &ToolArtifact) -> bool {
        let Some(session_id) = artifact.session_id.as_deref() else {
            return false;
        };
        let files = {
            let mut sessions = self.code_sessions.lock();
            merge_into(&mut sessions, tool_name, session_id, artifact.files.clone())
                .files
                .len()
        };
        TraceEvent::SessionMerged {
            tool_name: tool_name.to_owned(),
            session_id: session_id.to_owned(),
            files,
        }
        .emit();
        true
    }

    /// Snapshot of the code sessions.
    pub fn code_sessions(&self) -> CodeSessions {
        self.code_sessions.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sy_domain::session::ArtifactFile;

    fn file(name: &str) -> ArtifactFile {
        ArtifactFile { name: name.into(), id: None }
    }

    #[test]
    fn merge_artifact_follows_session_merge_rules() {
        let ctx = RunContext::new("run", RunConfig::default());
        ctx.merge_artifact("execute_code", &ToolArtifact::session("s1", vec![file("a.csv"), file("b.png")]));
        ctx.merge_artifact("execute_code", &ToolArtifact::session("s2", vec![file("b.png"), file("c.txt")]));

        let session = ctx.session_for("execute_code").unwrap();
        assert_eq!(session.session_id, "s2");
        assert_eq!(session.file_names(), vec!["a.csv", "b.png", "c.txt"]);
        assert_eq!(session.file("a.csv").unwrap().session_id, "s1");
        assert_eq!(session.file("b.png").unwrap().session_id, "s2");
    }

    #[test]
    fn artifacts_without_session_are_ignored() {
        let ctx = RunContext::new("run", RunConfig::default());
        assert!(!ctx.merge_artifact("x", &ToolArtifact::default()));
        assert!(ctx.code_sessions().is_empty());
    }

    #[test]
    fn clones_share_sessions() {
        let ctx = RunContext::new("run", RunConfig::default());
        let clone = ctx.clone();
        clone.merge_artifact("t", &ToolArtifact::session("s", vec![]));
        assert!(ctx.session_for("t").is_some());
    }
}
