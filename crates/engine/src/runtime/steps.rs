//! Run-step tracker.
//!
//! Maps a step key (`"<branch>:<agent>:<turn>"`) to the step currently open
//! for it. A key starts with a message-creation step; the first tool call
//! for that key turns the open message step into a tool-calls step, in
//! place. Text arriving after that opens a fresh message step, so a step
//! never changes type twice.
//!
//! Steps complete when their turn closes (message steps) or when their turn
//! has closed and every tool call has a result (tool-call steps). Completed
//! steps are immutable; late events for them are logged and skipped.

use std::collections::{HashMap, HashSet};

use sy_domain::events::EventMeta;
use sy_domain::step::{
    RunStep, StepDetails, StepType, ToolCallResult, ToolCallStatus, ToolCallSummary,
};
use sy_domain::stream::Usage;
use sy_domain::trace::TraceEvent;

/// How a tracker call affected the step it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepChange {
    /// A new step was opened for the key.
    Created,
    /// The open message step became a tool-calls step.
    Transitioned,
    /// The open step was reused unchanged in type.
    Continued,
}

/// Outcome of recording a tool result.
#[derive(Debug, Clone)]
pub struct ToolResultUpdate {
    pub step: RunStep,
    pub result: ToolCallResult,
    /// The step became completed with this result.
    pub step_completed: bool,
}

#[derive(Debug, Default)]
pub struct RunStepTracker {
    run_id: String,
    steps: Vec<RunStep>,
    by_id: HashMap<String, usize>,
    /// Every step ever opened for a key, in order. The last one is current.
    by_key: HashMap<String, Vec<usize>>,
    closed_keys: HashSet<String>,
}

impl RunStepTracker {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    /// The message step open for `meta`'s key, creating one when the key has
    /// no step yet or its current step already carries tool calls.
    ///
    /// Returns `None` once the key's turn has closed.
    pub fn message_step(&mut self, meta: &EventMeta) -> Option<(StepChange, RunStep)> {
        let key = meta.step_key();
        if self.is_closed(&key, "message") {
            return None;
        }
        match self.current_index(&key) {
            Some(idx) if self.steps[idx].step_type == StepType::MessageCreation => {
                Some((StepChange::Continued, self.steps[idx].clone()))
            }
            _ => {
                let idx = self.open(meta, key);
                Some((StepChange::Created, self.steps[idx].clone()))
            }
        }
    }

    /// The tool-calls step for `meta`'s key, with `call_id` registered in it.
    ///
    /// A missing step is synthesized as a message step and transitioned
    /// immediately; the change reported is then `Created`.
    pub fn tool_call_step(
        &mut self,
        meta: &EventMeta,
        call_id: &str,
        name: &str,
    ) -> Option<(StepChange, RunStep)> {
        let key = meta.step_key();
        if self.is_closed(&key, "tool_call") {
            return None;
        }
        let (change, idx) = match self.current_index(&key) {
            Some(idx) if self.steps[idx].step_type == StepType::ToolCalls => {
                (StepChange::Continued, idx)
            }
            Some(idx) => (StepChange::Transitioned, idx),
            None => (StepChange::Created, self.open(meta, key)),
        };

        let step = &mut self.steps[idx];
        if step.step_type == StepType::MessageCreation {
            step.step_type = StepType::ToolCalls;
            step.details = StepDetails::ToolCalls { tool_calls: Vec::new() };
        }
        if let StepDetails::ToolCalls { tool_calls } = &mut step.details {
            if !tool_calls.iter().any(|c| c.id == call_id) {
                tool_calls.push(ToolCallSummary {
                    id: call_id.to_owned(),
                    name: name.to_owned(),
                    args: String::new(),
                    output: None,
                    status: ToolCallStatus::Pending,
                });
            }
        }
        Some((change, step.clone()))
    }

    /// Append argument text to a tool call's summary.
    pub fn append_tool_args(&mut self, step_id: &str, call_id: &str, delta: &str) -> bool {
        let Some(step) = self.mutable_step(step_id) else {
            return false;
        };
        match tool_call_mut(step, call_id) {
            Some(call) => {
                call.args.push_str(delta);
                true
            }
            None => false,
        }
    }

    /// Close every step of a turn. Returns the steps that became completed.
    pub fn close_turn(&mut self, key: &str, usage: Option<Usage>) -> Vec<RunStep> {
        if !self.closed_keys.insert(key.to_owned()) {
            return Vec::new();
        }
        let Some(indices) = self.by_key.get(key) else {
            return Vec::new();
        };
        if let (Some(usage), Some(&last)) = (usage, indices.last()) {
            self.steps[last].usage = Some(usage);
        }

        let mut completed = Vec::new();
        for &idx in indices {
            let step = &mut self.steps[idx];
            if step.completed {
                continue;
            }
            if step.step_type == StepType::MessageCreation || step.all_tool_calls_resolved() {
                step.completed = true;
                completed.push(step.clone());
            }
        }
        completed
    }

    /// Record a tool call's output. Returns `None` when the step or call is
    /// unknown, the step is already completed, or the call already has a
    /// result.
    pub fn record_tool_result(
        &mut self,
        step_id: &str,
        call_id: &str,
        output: &str,
        is_error: bool,
    ) -> Option<ToolResultUpdate> {
        let closed = {
            let step = self.steps.get(*self.by_id.get(step_id)?)?;
            self.closed_keys.contains(&step.step_key)
        };
        let step = self.mutable_step(step_id)?;
        let call = tool_call_mut(step, call_id)?;
        if call.status != ToolCallStatus::Pending {
            tracing::debug!(call_id, "tool call already has a result, skipping");
            return None;
        }
        call.output = Some(output.to_owned());
        call.status = if is_error { ToolCallStatus::Error } else { ToolCallStatus::Success };
        let result = ToolCallResult {
            id: call.id.clone(),
            name: call.name.clone(),
            args: call.args.clone(),
            output: output.to_owned(),
            is_error,
        };

        let step_completed = closed && step.all_tool_calls_resolved();
        if step_completed {
            step.completed = true;
        }
        Some(ToolResultUpdate {
            step: step.clone(),
            result,
            step_completed,
        })
    }

    pub fn get(&self, step_id: &str) -> Option<&RunStep> {
        self.by_id.get(step_id).map(|&i| &self.steps[i])
    }

    /// All steps in creation order.
    pub fn steps(&self) -> &[RunStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<RunStep> {
        self.steps
    }

    // ── Private helpers ───────────────────────────────────────────────

    fn current_index(&self, key: &str) -> Option<usize> {
        self.by_key.get(key).and_then(|v| v.last().copied())
    }

    fn is_closed(&self, key: &str, kind: &str) -> bool {
        if !self.closed_keys.contains(key) {
            return false;
        }
        tracing::warn!(step_key = key, kind, "event for a closed turn, skipping");
        TraceEvent::EventSkipped {
            kind: kind.to_owned(),
            reason: format!("turn {key} already closed"),
        }
        .emit();
        true
    }

    fn open(&mut self, meta: &EventMeta, key: String) -> usize {
        let idx = self.steps.len();
        let siblings = self.by_key.entry(key.clone()).or_default();
        let step = RunStep {
            id: RunStep::new_step_id(),
            step_key: key,
            agent_id: meta.agent_id.clone(),
            group_id: meta.group_id,
            run_id: self.run_id.clone(),
            index: idx,
            step_index: siblings.len(),
            step_type: StepType::MessageCreation,
            details: StepDetails::MessageCreation {
                message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            },
            usage: None,
            completed: false,
        };
        siblings.push(idx);
        self.by_id.insert(step.id.clone(), idx);
        self.steps.push(step);
        idx
    }

    fn mutable_step(&mut self, step_id: &str) -> Option<&mut RunStep> {
        let idx = match self.by_id.get(step_id) {
            Some(&i) => i,
            None => {
                tracing::warn!(step_id, "unknown step id, skipping");
                return None;
            }
        };
        let step = &mut self.steps[idx];
        if step.completed {
            tracing::warn!(step_id, "step already completed, skipping");
            return None;
        }
        Some(step)
    }
}

fn tool_call_mut<'a>(step: &'a mut RunStep, call_id: &str) -> Option<&'a mut ToolCallSummary> {
    match &mut step.details {
        StepDetails::ToolCalls { tool_calls } => tool_calls.iter_mut().find(|c| c.id == call_id),
        StepDetails::MessageCreation { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(agent: &str, branch: u32, turn: u32) -> EventMeta {
        EventMeta {
            run_id: "run".into(),
            agent_id: agent.into(),
            branch,
            group_id: Some(1),
            turn,
        }
    }

    #[test]
    fn text_reuses_the_open_message_step() {
        let mut t = RunStepTracker::new("run");
        let m = meta("a", 0, 0);
        let (c1, s1) = t.message_step(&m).unwrap();
        let (c2, s2) = t.message_step(&m).unwrap();
        assert_eq!(c1, StepChange::Created);
        assert_eq!(c2, StepChange::Continued);
        assert_eq!(s1.id, s2.id);
        assert_eq!(t.steps().len(), 1);
    }

    #[test]
    fn first_tool_call_transitions_in_place_exactly_once() {
        let mut t = RunStepTracker::new("run");
        let m = meta("a", 0, 0);
        let (_, msg) = t.message_step(&m).unwrap();
        let (c1, s1) = t.tool_call_step(&m, "call_1", "search").unwrap();
        let (c2, s2) = t.tool_call_step(&m, "call_2", "search").unwrap();

        assert_eq!(c1, StepChange::Transitioned);
        assert_eq!(c2, StepChange::Continued);
        assert_eq!(s1.id, msg.id);
        assert_eq!(s2.tool_calls().len(), 2);
        assert_eq!(s2.step_type, StepType::ToolCalls);
    }

    #[test]
    fn tool_call_without_step_is_synthesized() {
        let mut t = RunStepTracker::new("run");
        let (change, step) = t.tool_call_step(&meta("a", 0, 0), "c", "x").unwrap();
        assert_eq!(change, StepChange::Created);
        assert_eq!(step.step_type, StepType::ToolCalls);
        assert_eq!(step.tool_calls()[0].id, "c");
    }

    #[test]
    fn text_after_tool_calls_opens_a_new_message_step() {
        let mut t = RunStepTracker::new("run");
        let m = meta("a", 0, 0);
        t.tool_call_step(&m, "c", "x").unwrap();
        let (change, step) = t.message_step(&m).unwrap();
        assert_eq!(change, StepChange::Created);
        assert_eq!(step.step_type, StepType::MessageCreation);
        assert_eq!(step.step_index, 1);
        assert_eq!(step.index, 1);
    }

    #[test]
    fn keys_are_independent_across_branches() {
        let mut t = RunStepTracker::new("run");
        let (_, a) = t.message_step(&meta("a", 0, 0)).unwrap();
        let (_, b) = t.message_step(&meta("b", 1, 0)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.step_index, 0);
        assert_eq!(b.index, 1);
    }

    #[test]
    fn close_turn_completes_message_steps_and_freezes_the_key() {
        let mut t = RunStepTracker::new("run");
        let m = meta("a", 0, 0);
        t.message_step(&m).unwrap();
        let done = t.close_turn(&m.step_key(), None);
        assert_eq!(done.len(), 1);
        assert!(done[0].completed);
        assert!(t.message_step(&m).is_none());
        assert!(t.close_turn(&m.step_key(), None).is_empty());
    }

    #[test]
    fn tool_step_completes_after_close_and_all_results() {
        let mut t = RunStepTracker::new("run");
        let m = meta("a", 0, 0);
        let (_, step) = t.tool_call_step(&m, "c1", "x").unwrap();
        t.tool_call_step(&m, "c2", "y").unwrap();
        t.append_tool_args(&step.id, "c1", "{\"q\":");
        t.append_tool_args(&step.id, "c1", "1}");

        assert!(t.close_turn(&m.step_key(), None).is_empty());

        let first = t.record_tool_result(&step.id, "c1", "ok", false).unwrap();
        assert!(!first.step_completed);
        assert_eq!(first.result.args, "{\"q\":1}");

        let second = t.record_tool_result(&step.id, "c2", "boom", true).unwrap();
        assert!(second.step_completed);
        assert_eq!(second.step.tool_calls()[1].status, ToolCallStatus::Error);

        // Completed steps are immutable.
        assert!(t.record_tool_result(&step.id, "c1", "again", false).is_none());
        assert!(!t.append_tool_args(&step.id, "c1", "x"));
    }

    #[test]
    fn duplicate_result_before_completion_is_ignored() {
        let mut t = RunStepTracker::new("run");
        let m = meta("a", 0, 0);
        let (_, step) = t.tool_call_step(&m, "c1", "x").unwrap();
        assert!(t.record_tool_result(&step.id, "c1", "ok", false).is_some());
        assert!(t.record_tool_result(&step.id, "c1", "ok", false).is_none());
    }

    #[test]
    fn close_turn_records_usage_on_last_step() {
        let mut t = RunStepTracker::new("run");
        let m = meta("a", 0, 0);
        t.message_step(&m).unwrap();
        let usage = Usage { prompt_tokens: 3, completion_tokens: 2, total_tokens: 5 };
        let done = t.close_turn(&m.step_key(), Some(usage));
        assert_eq!(done[0].usage, Some(usage));
    }
}
