use serde::{Deserialize, Serialize};

use crate::stream::Usage;

/// What a run step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    MessageCreation,
    ToolCalls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Success,
    Error,
}

/// Summary of one tool call inside a tool-calls step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSummary {
    pub id: String,
    pub name: String,
    pub args: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub status: ToolCallStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDetails {
    MessageCreation { message_id: String },
    ToolCalls { tool_calls: Vec<ToolCallSummary> },
}

/// A run step: one model-output phase of one agent on one branch.
///
/// Steps are keyed by `step_key` (`"<branch>:<agent>:<turn>"`). At most one
/// step per key is current at a time; a step may change type from message
/// creation to tool calls once, in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    pub id: String,
    pub step_key: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u32>,
    pub run_id: String,
    /// Position among all steps of the run.
    pub index: usize,
    /// Position among steps sharing the same key.
    pub step_index: usize,
    pub step_type: StepType,
    pub details: StepDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub completed: bool,
}

impl RunStep {
    pub fn new_step_id() -> String {
        format!("step_{}", uuid::Uuid::new_v4().simple())
    }

    pub fn tool_calls(&self) -> &[ToolCallSummary] {
        match &self.details {
            StepDetails::ToolCalls { tool_calls } => tool_calls,
            StepDetails::MessageCreation { .. } => &[],
        }
    }

    /// Every tool call in the step has a result.
    pub fn all_tool_calls_resolved(&self) -> bool {
        let calls = self.tool_calls();
        !calls.is_empty() && calls.iter().all(|c| c.status != ToolCallStatus::Pending)
    }
}

/// Final result of a single tool call, carried by a step-completed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    pub name: String,
    pub args: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Payload of a step-completed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCompletion {
    Message { message_id: String },
    ToolCall(ToolCallResult),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(details: StepDetails) -> RunStep {
        RunStep {
            id: RunStep::new_step_id(),
            step_key: "0:agent_a:0".into(),
            agent_id: "agent_a".into(),
            group_id: None,
            run_id: "run_1".into(),
            index: 0,
            step_index: 0,
            step_type: StepType::ToolCalls,
            details,
            usage: None,
            completed: false,
        }
    }

    #[test]
    fn step_ids_are_prefixed_and_unique() {
        let a = RunStep::new_step_id();
        let b = RunStep::new_step_id();
        assert!(a.starts_with("step_"));
        assert_ne!(a, b);
    }

    #[test]
    fn resolution_requires_every_call() {
        let mut s = step(StepDetails::ToolCalls {
            tool_calls: vec![
                ToolCallSummary {
                    id: "a".into(),
                    name: "x".into(),
                    args: "{}".into(),
                    output: Some("ok".into()),
                    status: ToolCallStatus::Success,
                },
                ToolCallSummary {
                    id: "b".into(),
                    name: "y".into(),
                    args: "{}".into(),
                    output: None,
                    status: ToolCallStatus::Pending,
                },
            ],
        });
        assert!(!s.all_tool_calls_resolved());
        if let StepDetails::ToolCalls { tool_calls } = &mut s.details {
            tool_calls[1].status = ToolCallStatus::Error;
        }
        assert!(s.all_tool_calls_resolved());
    }

    #[test]
    fn message_step_has_no_calls() {
        let s = step(StepDetails::MessageCreation { message_id: "msg_1".into() });
        assert!(s.tool_calls().is_empty());
        assert!(!s.all_tool_calls_resolved());
    }
}
