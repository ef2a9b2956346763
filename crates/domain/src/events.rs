//! Canonical graph events and typed handler dispatch.
//!
//! Every event emitted during a run is one variant of the closed
//! [`GraphEvent`] enum. Consumers implement [`GraphEventHandler`], overriding
//! only the kinds they care about; [`dispatch`] routes an event to the
//! matching method with an exhaustive match, so a new kind cannot be added
//! without every routing site being revisited.

use serde::{Deserialize, Serialize};

use crate::step::{RunStep, StepCompletion};
use crate::stream::{ModelChunk, Usage};

/// Position metadata carried by every event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMeta {
    pub run_id: String,
    pub agent_id: String,
    /// Branch (concurrent path) the event originates from.
    pub branch: u32,
    /// Fork group shared by branches started in the same superstep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u32>,
    /// Model turn within the branch, starting at 0.
    pub turn: u32,
}

impl EventMeta {
    /// Key addressing "the current step" for this logical position.
    pub fn step_key(&self) -> String {
        format!("{}:{}:{}", self.branch, self.agent_id, self.turn)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStarted {
    pub meta: EventMeta,
    pub provider: String,
    pub model: String,
}

/// Raw adapter chunk, forwarded untouched for consumers that want it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStreamDelta {
    pub meta: EventMeta,
    pub chunk: ModelChunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEnded {
    pub meta: EventMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStarted {
    pub meta: EventMeta,
    pub step: RunStep,
}

/// Incremental tool-call argument text for a tool-calls step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDelta {
    pub meta: EventMeta,
    pub step_id: String,
    pub call_id: String,
    pub name: String,
    pub args: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCompleted {
    pub meta: EventMeta,
    pub step_id: String,
    pub index: usize,
    pub completion: StepCompletion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    pub meta: EventMeta,
    pub step_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningDelta {
    pub meta: EventMeta,
    pub step_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStarted {
    pub meta: EventMeta,
    pub step_id: String,
    pub call_id: String,
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEnded {
    pub meta: EventMeta,
    pub step_id: String,
    pub call_id: String,
    pub name: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<serde_json::Value>,
}

/// A canonical run event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum GraphEvent {
    ModelStarted(ModelStarted),
    ModelStreamDelta(ModelStreamDelta),
    ModelEnded(ModelEnded),
    StepStarted(StepStarted),
    StepDelta(StepDelta),
    StepCompleted(StepCompleted),
    MessageDelta(MessageDelta),
    ReasoningDelta(ReasoningDelta),
    ToolStarted(ToolStarted),
    ToolEnded(ToolEnded),
}

/// Discriminant of [`GraphEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ModelStarted,
    ModelStreamDelta,
    ModelEnded,
    StepStarted,
    StepDelta,
    StepCompleted,
    MessageDelta,
    ReasoningDelta,
    ToolStarted,
    ToolEnded,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::ModelStarted,
        EventKind::ModelStreamDelta,
        EventKind::ModelEnded,
        EventKind::StepStarted,
        EventKind::StepDelta,
        EventKind::StepCompleted,
        EventKind::MessageDelta,
        EventKind::ReasoningDelta,
        EventKind::ToolStarted,
        EventKind::ToolEnded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ModelStarted => "model-started",
            EventKind::ModelStreamDelta => "model-stream-delta",
            EventKind::ModelEnded => "model-ended",
            EventKind::StepStarted => "step-started",
            EventKind::StepDelta => "step-delta",
            EventKind::StepCompleted => "step-completed",
            EventKind::MessageDelta => "message-delta",
            EventKind::ReasoningDelta => "reasoning-delta",
            EventKind::ToolStarted => "tool-started",
            EventKind::ToolEnded => "tool-ended",
        }
    }

    pub fn parse(s: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GraphEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GraphEvent::ModelStarted(_) => EventKind::ModelStarted,
            GraphEvent::ModelStreamDelta(_) => EventKind::ModelStreamDelta,
            GraphEvent::ModelEnded(_) => EventKind::ModelEnded,
            GraphEvent::StepStarted(_) => EventKind::StepStarted,
            GraphEvent::StepDelta(_) => EventKind::StepDelta,
            GraphEvent::StepCompleted(_) => EventKind::StepCompleted,
            GraphEvent::MessageDelta(_) => EventKind::MessageDelta,
            GraphEvent::ReasoningDelta(_) => EventKind::ReasoningDelta,
            GraphEvent::ToolStarted(_) => EventKind::ToolStarted,
            GraphEvent::ToolEnded(_) => EventKind::ToolEnded,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            GraphEvent::ModelStarted(e) => &e.meta,
            GraphEvent::ModelStreamDelta(e) => &e.meta,
            GraphEvent::ModelEnded(e) => &e.meta,
            GraphEvent::StepStarted(e) => &e.meta,
            GraphEvent::StepDelta(e) => &e.meta,
            GraphEvent::StepCompleted(e) => &e.meta,
            GraphEvent::MessageDelta(e) => &e.meta,
            GraphEvent::ReasoningDelta(e) => &e.meta,
            GraphEvent::ToolStarted(e) => &e.meta,
            GraphEvent::ToolEnded(e) => &e.meta,
        }
    }
}

/// Typed event consumer. Every method defaults to a no-op.
///
/// `on_event` sees every event before its kind-specific method runs.
pub trait GraphEventHandler: Send {
    fn on_event(&mut self, _event: &GraphEvent) {}
    fn on_model_started(&mut self, _event: &ModelStarted) {}
    fn on_model_stream_delta(&mut self, _event: &ModelStreamDelta) {}
    fn on_model_ended(&mut self, _event: &ModelEnded) {}
    fn on_step_started(&mut self, _event: &StepStarted) {}
    fn on_step_delta(&mut self, _event: &StepDelta) {}
    fn on_step_completed(&mut self, _event: &StepCompleted) {}
    fn on_message_delta(&mut self, _event: &MessageDelta) {}
    fn on_reasoning_delta(&mut self, _event: &ReasoningDelta) {}
    fn on_tool_started(&mut self, _event: &ToolStarted) {}
    fn on_tool_ended(&mut self, _event: &ToolEnded) {}
}

/// Route an event to the handler method for its kind.
pub fn dispatch<H: GraphEventHandler + ?Sized>(handler: &mut H, event: &GraphEvent) {
    handler.on_event(event);
    match event {
        GraphEvent::ModelStarted(e) => handler.on_model_started(e),
        GraphEvent::ModelStreamDelta(e) => handler.on_model_stream_delta(e),
        GraphEvent::ModelEnded(e) => handler.on_model_ended(e),
        GraphEvent::StepStarted(e) => handler.on_step_started(e),
        GraphEvent::StepDelta(e) => handler.on_step_delta(e),
        GraphEvent::StepCompleted(e) => handler.on_step_completed(e),
        GraphEvent::MessageDelta(e) => handler.on_message_delta(e),
        GraphEvent::ReasoningDelta(e) => handler.on_reasoning_delta(e),
        GraphEvent::ToolStarted(e) => handler.on_tool_started(e),
        GraphEvent::ToolEnded(e) => handler.on_tool_ended(e),
    }
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl GraphEventHandler for NoopHandler {}

/// Collects every event it sees, in order.
impl GraphEventHandler for Vec<GraphEvent> {
    fn on_event(&mut self, event: &GraphEvent) {
        self.push(event.clone());
    }
}

/// Fans each event out to several handlers, in registration order.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Box<dyn GraphEventHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl GraphEventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn push(&mut self, handler: Box<dyn GraphEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl GraphEventHandler for HandlerChain {
    fn on_event(&mut self, event: &GraphEvent) {
        for handler in &mut self.handlers {
            dispatch(handler.as_mut(), event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> EventMeta {
        EventMeta {
            run_id: "run_1".into(),
            agent_id: "agent_a".into(),
            branch: 2,
            group_id: Some(1),
            turn: 3,
        }
    }

    #[derive(Default)]
    struct TextOnly {
        text: String,
        other: usize,
    }

    impl GraphEventHandler for TextOnly {
        fn on_event(&mut self, event: &GraphEvent) {
            if event.kind() != EventKind::MessageDelta {
                self.other += 1;
            }
        }
        fn on_message_delta(&mut self, event: &MessageDelta) {
            self.text.push_str(&event.text);
        }
    }

    #[test]
    fn step_key_combines_branch_agent_turn() {
        assert_eq!(meta().step_key(), "2:agent_a:3");
    }

    #[test]
    fn kind_strings_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("nope"), None);
    }

    #[test]
    fn serde_tag_matches_kind_string() {
        let ev = GraphEvent::ReasoningDelta(ReasoningDelta {
            meta: meta(),
            step_id: "step_1".into(),
            text: "hm".into(),
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], ev.kind().as_str());
        let back: GraphEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn dispatch_routes_by_kind() {
        let mut h = TextOnly::default();
        for text in ["a", "b"] {
            dispatch(
                &mut h,
                &GraphEvent::MessageDelta(MessageDelta {
                    meta: meta(),
                    step_id: "step_1".into(),
                    text: text.into(),
                }),
            );
        }
        dispatch(
            &mut h,
            &GraphEvent::ModelEnded(ModelEnded {
                meta: meta(),
                usage: None,
                finish_reason: None,
                error: None,
            }),
        );
        assert_eq!(h.text, "ab");
        assert_eq!(h.other, 1);
    }

    #[test]
    fn chain_fans_out_in_order() {
        let mut chain = HandlerChain::new().with(NoopHandler).with(Vec::<GraphEvent>::new());
        assert_eq!(chain.len(), 2);
        let ev = GraphEvent::ModelStarted(ModelStarted {
            meta: meta(),
            provider: "scripted".into(),
            model: "m".into(),
        });
        dispatch(&mut chain, &ev);
        assert_eq!(ev.meta().agent_id, "agent_a");
    }
}
