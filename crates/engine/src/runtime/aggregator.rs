//! Content aggregator.
//!
//! Folds graph events into an ordered list of [`ContentPart`]s plus a
//! part-index → agent map. Every part lives in a slot keyed by identity
//! (text and reasoning by step id, tool calls by call id). A slot's index is
//! assigned the first time an event for it is applied and never moves, so
//! deltas from concurrently streaming branches can interleave freely
//! without touching each other's parts.

use std::collections::{BTreeMap, HashMap};

use sy_domain::content::{ContentPart, ToolCallPart};
use sy_domain::events::{
    GraphEventHandler, MessageDelta, ReasoningDelta, StepCompleted, StepDelta, ToolStarted,
};
use sy_domain::step::StepCompletion;
use sy_domain::trace::TraceEvent;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Slot {
    Text(String),
    Think(String),
    Tool(String),
}

#[derive(Debug, Default)]
pub struct ContentAggregator {
    parts: Vec<ContentPart>,
    agent_map: BTreeMap<usize, String>,
    slots: HashMap<Slot, usize>,
}

impl ContentAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parts in index order.
    pub fn parts(&self) -> &[ContentPart] {
        &self.parts
    }

    /// Part index → originating agent id.
    pub fn agent_map(&self) -> &BTreeMap<usize, String> {
        &self.agent_map
    }

    pub fn into_parts(self) -> (Vec<ContentPart>, BTreeMap<usize, String>) {
        (self.parts, self.agent_map)
    }

    /// Concatenated text of one agent's text parts.
    pub fn text_for(&self, agent_id: &str) -> String {
        self.parts
            .iter()
            .enumerate()
            .filter(|(i, _)| self.agent_map.get(i).map(String::as_str) == Some(agent_id))
            .filter_map(|(_, p)| p.as_text())
            .collect()
    }

    fn slot(&mut self, slot: Slot, agent_id: &str, init: impl FnOnce() -> ContentPart) -> usize {
        if let Some(&idx) = self.slots.get(&slot) {
            return idx;
        }
        let idx = self.parts.len();
        self.parts.push(init());
        self.agent_map.insert(idx, agent_id.to_owned());
        self.slots.insert(slot, idx);
        idx
    }

    fn tool_part(&mut self, call_id: &str, name: &str, agent_id: &str) -> Option<&mut ToolCallPart> {
        let idx = self.slot(Slot::Tool(call_id.to_owned()), agent_id, || ContentPart::ToolCall {
            tool_call: ToolCallPart::new(call_id, name),
        });
        match &mut self.parts[idx] {
            ContentPart::ToolCall { tool_call } => Some(tool_call),
            _ => None,
        }
    }
}

impl GraphEventHandler for ContentAggregator {
    fn on_message_delta(&mut self, event: &MessageDelta) {
        if event.text.is_empty() {
            return;
        }
        let idx = self.slot(Slot::Text(event.step_id.clone()), &event.meta.agent_id, || {
            ContentPart::text("")
        });
        if let ContentPart::Text { text } = &mut self.parts[idx] {
            text.push_str(&event.text);
        }
    }

    fn on_reasoning_delta(&mut self, event: &ReasoningDelta) {
        if event.text.is_empty() {
            return;
        }
        let idx = self.slot(Slot::Think(event.step_id.clone()), &event.meta.agent_id, || {
            ContentPart::think("")
        });
        if let ContentPart::Think { think } = &mut self.parts[idx] {
            think.push_str(&event.text);
        }
    }

    fn on_step_delta(&mut self, event: &StepDelta) {
        let Some(part) = self.tool_part(&event.call_id, &event.name, &event.meta.agent_id) else {
            return;
        };
        if part.output.is_some() {
            TraceEvent::EventSkipped {
                kind: "step-delta".into(),
                reason: format!("tool call {} already finished", event.call_id),
            }
            .emit();
            return;
        }
        part.args.push_str(&event.args);
    }

    fn on_tool_started(&mut self, event: &ToolStarted) {
        let Some(part) = self.tool_part(&event.call_id, &event.name, &event.meta.agent_id) else {
            return;
        };
        if part.args.is_empty() && !event.args.is_null() {
            part.args = event.args.to_string();
        }
    }

    fn on_step_completed(&mut self, event: &StepCompleted) {
        let StepCompletion::ToolCall(result) = &event.completion else {
            return;
        };
        let Some(part) = self.tool_part(&result.id, &result.name, &event.meta.agent_id) else {
            return;
        };
        if part.is_complete() {
            tracing::debug!(call_id = %result.id, "duplicate tool completion, ignoring");
            return;
        }
        if part.args.is_empty() {
            part.args = result.args.clone();
        }
        part.output = Some(result.output.clone());
        part.is_error = result.is_error;
        part.progress = 1.0;
    }
}
