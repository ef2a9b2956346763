//! Run tracking: execution records for every graph run.
//!
//! A `RunRecord` is created when a run starts and carries one
//! `BranchRecord` per node invocation. Branch status follows a validated
//! state machine:
//!
//! ```text
//! Idle → Dispatched → Streaming → (ToolsPending → Streaming)* → Completed | Failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sy_domain::error::{Error, Result};
use sy_domain::stream::Usage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Branch status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    #[default]
    Idle,
    Dispatched,
    Streaming,
    ToolsPending,
    Completed,
    Failed,
}

impl BranchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dispatched => "dispatched",
            Self::Streaming => "streaming",
            Self::ToolsPending => "tools_pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: BranchStatus) -> bool {
        use BranchStatus::*;
        match (self, next) {
            (Idle, Dispatched) => true,
            (Dispatched, Streaming) => true,
            (Streaming, ToolsPending) => true,
            (ToolsPending, Streaming) => true,
            // Any live state may fail; only a finished stream or tool batch completes.
            (Idle | Dispatched | Streaming | ToolsPending, Failed) => true,
            (Streaming | ToolsPending, Completed) => true,
            _ => false,
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: BranchStatus) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::Other(format!(
                "invalid branch transition {self:?} -> {next:?}"
            )));
        }
        *self = next;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One node invocation within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRecord {
    pub branch: u32,
    pub agent_id: String,
    pub superstep: u32,
    pub status: BranchStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Model calls made by this branch.
    pub turns: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

impl BranchRecord {
    pub fn new(branch: u32, agent_id: impl Into<String>, superstep: u32) -> Self {
        Self {
            branch,
            agent_id: agent_id.into(),
            superstep,
            status: BranchStatus::Idle,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            turns: 0,
            handoff_to: None,
            error: None,
            usage: Usage::default(),
        }
    }

    /// Stamp the end time. Status is driven separately through `transition`.
    pub fn close(&mut self, error: Option<String>) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        self.error = error;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// First ~200 chars of the user message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub supersteps: u32,
    pub branches: Vec<BranchRecord>,
    #[serde(default)]
    pub usage: Usage,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, thread_id: Option<String>, user_message: &str) -> Self {
        Self {
            run_id: run_id.into(),
            thread_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            input_preview: Some(truncate(user_message, 200)),
            error: None,
            supersteps: 0,
            branches: Vec::new(),
            usage: Usage::default(),
        }
    }

    /// Append a finished branch and fold its usage into the run total.
    pub fn push_branch(&mut self, branch: BranchRecord) {
        self.usage.add(&branch.usage);
        self.branches.push(branch);
    }

    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }

    pub fn branches_for(&self, agent_id: &str) -> impl Iterator<Item = &BranchRecord> {
        let agent_id = agent_id.to_owned();
        self.branches.iter().filter(move |b| b.agent_id == agent_id)
    }
}

/// Truncate on a char boundary, appending `...` when shortened.
pub(crate) fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut s = BranchStatus::Idle;
        for next in [
            BranchStatus::Dispatched,
            BranchStatus::Streaming,
            BranchStatus::ToolsPending,
            BranchStatus::Streaming,
            BranchStatus::Completed,
        ] {
            s.transition(next).unwrap();
        }
        assert!(s.is_terminal());
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut s = BranchStatus::Failed;
        assert!(s.transition(BranchStatus::Streaming).is_err());
        let mut c = BranchStatus::Completed;
        assert!(c.transition(BranchStatus::Failed).is_err());
        assert_eq!(c, BranchStatus::Completed);
    }

    #[test]
    fn cannot_skip_dispatch() {
        let mut s = BranchStatus::Idle;
        assert!(s.transition(BranchStatus::Streaming).is_err());
        assert!(s.transition(BranchStatus::Completed).is_err());
        assert!(s.transition(BranchStatus::Failed).is_ok());
    }

    #[test]
    fn finish_sets_terminal_status_and_duration() {
        let mut run = RunRecord::new("run_1", None, "hello");
        assert_eq!(run.status, RunStatus::Running);
        run.finish(RunStatus::Stopped, Some("run cancelled".into()));
        assert!(run.status.is_terminal());
        assert!(run.duration_ms.is_some());
        assert_eq!(run.error.as_deref(), Some("run cancelled"));
    }

    #[test]
    fn truncate_unicode_safe() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
        let t = truncate("héllo", 2);
        assert!(t.ends_with("..."));
        assert!(t.len() <= 6);
    }
}
