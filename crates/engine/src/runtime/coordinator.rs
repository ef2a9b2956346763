//! Event coordinator: the single consumer of every branch's signals.
//!
//! Branches stream concurrently into one channel; the coordinator applies
//! their signals strictly in arrival order. It owns the step tracker, the
//! tool-call ledger and the content aggregator, so none of them need locks.
//! Every canonical event goes to the aggregator first and then to the
//! caller's handler.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use sy_domain::content::ContentPart;
use sy_domain::events::{
    dispatch, EventMeta, GraphEvent, GraphEventHandler, MessageDelta, ModelEnded, ModelStarted,
    ModelStreamDelta, ReasoningDelta, StepCompleted, StepDelta, StepStarted, ToolEnded,
    ToolStarted,
};
use sy_domain::step::{RunStep, StepCompletion, StepDetails};
use sy_domain::stream::ModelChunk;
use sy_domain::trace::TraceEvent;
use sy_tools::ToolArtifact;

use super::aggregator::ContentAggregator;
use super::steps::{RunStepTracker, StepChange};
use super::tools::ToolCallLedger;
use super::turn::BranchSignal;
use crate::state::RunContext;

pub(crate) struct Coordinator<'h> {
    ctx: RunContext,
    tracker: RunStepTracker,
    ledger: ToolCallLedger,
    aggregator: ContentAggregator,
    handler: &'h mut dyn GraphEventHandler,
    events: usize,
}

/// What the coordinator accumulated over a run.
pub(crate) struct Collected {
    pub parts: Vec<ContentPart>,
    pub agent_map: BTreeMap<usize, String>,
    pub steps: Vec<RunStep>,
    pub events: usize,
}

impl<'h> Coordinator<'h> {
    pub fn new(ctx: RunContext, handler: &'h mut dyn GraphEventHandler) -> Self {
        Self {
            tracker: RunStepTracker::new(ctx.run_id.clone()),
            ctx,
            ledger: ToolCallLedger::new(),
            aggregator: ContentAggregator::new(),
            handler,
            events: 0,
        }
    }

    /// Drain the channel until every sender is dropped.
    pub async fn consume(&mut self, mut rx: mpsc::Receiver<BranchSignal>) {
        while let Some(signal) = rx.recv().await {
            self.apply(signal);
        }
        if self.ledger.pending() > 0 {
            tracing::debug!(pending = self.ledger.pending(), "run ended with unanswered tool calls");
        }
    }

    pub fn finish(self) -> Collected {
        let (parts, agent_map) = self.aggregator.into_parts();
        Collected {
            parts,
            agent_map,
            steps: self.tracker.into_steps(),
            events: self.events,
        }
    }

    fn emit(&mut self, event: GraphEvent) {
        self.events += 1;
        dispatch(&mut self.aggregator, &event);
        dispatch(&mut *self.handler, &event);
    }

    pub(crate) fn apply(&mut self, signal: BranchSignal) {
        match signal {
            BranchSignal::ModelStarted { meta, provider, model } => {
                self.emit(GraphEvent::ModelStarted(ModelStarted { meta, provider, model }));
            }
            BranchSignal::Chunk { meta, chunk } => self.on_chunk(meta, chunk),
            BranchSignal::ModelEnded { meta, usage, finish_reason, error } => {
                let key = meta.step_key();
                self.emit(GraphEvent::ModelEnded(ModelEnded {
                    meta: meta.clone(),
                    usage,
                    finish_reason,
                    error,
                }));
                for step in self.tracker.close_turn(&key, usage) {
                    let StepDetails::MessageCreation { message_id } = &step.details else {
                        continue;
                    };
                    self.emit(GraphEvent::StepCompleted(StepCompleted {
                        meta: meta.clone(),
                        step_id: step.id.clone(),
                        index: step.index,
                        completion: StepCompletion::Message { message_id: message_id.clone() },
                    }));
                }
            }
            BranchSignal::ToolStarted { meta, call_id, name, args } => {
                let Some(step_id) = self.ledger.step_of(&call_id).map(str::to_owned) else {
                    skip("tool-started", format!("no step holds tool call {call_id}"));
                    return;
                };
                self.emit(GraphEvent::ToolStarted(ToolStarted {
                    meta,
                    step_id,
                    call_id,
                    name,
                    args,
                }));
            }
            BranchSignal::ToolEnded { meta, call_id, name, output, is_error, artifact } => {
                self.tool_result(meta, call_id, name, output, is_error, artifact, false);
            }
        }
    }

    fn on_chunk(&mut self, meta: EventMeta, chunk: ModelChunk) {
        self.emit(GraphEvent::ModelStreamDelta(ModelStreamDelta {
            meta: meta.clone(),
            chunk: chunk.clone(),
        }));

        match chunk {
            ModelChunk::Token { text } => {
                if text.is_empty() {
                    return;
                }
                let Some(step_id) = self.message_step(&meta) else {
                    return;
                };
                self.emit(GraphEvent::MessageDelta(MessageDelta { meta, step_id, text }));
            }
            ModelChunk::Thinking { text, .. } => {
                if text.is_empty() {
                    return;
                }
                let Some(step_id) = self.message_step(&meta) else {
                    return;
                };
                self.emit(GraphEvent::ReasoningDelta(ReasoningDelta { meta, step_id, text }));
            }
            ModelChunk::ToolCallStarted { call_id, tool_name, .. } => {
                let Some(call_id) = call_id else {
                    skip("tool_call_started", "tool call without an id".into());
                    return;
                };
                let Some(step_id) = self.tool_step(&meta, &call_id, &tool_name) else {
                    return;
                };
                self.emit(GraphEvent::StepDelta(StepDelta {
                    meta,
                    step_id,
                    call_id,
                    name: tool_name,
                    args: String::new(),
                }));
            }
            ModelChunk::ToolCallDelta { call_id, delta, .. } => {
                let Some(call_id) = call_id else {
                    skip("tool_call_delta", "tool call delta without an id".into());
                    return;
                };
                let Some(entry) = self.ledger.get(&call_id) else {
                    skip("tool_call_delta", format!("unknown tool call {call_id}"));
                    return;
                };
                let (step_id, name) = (entry.step_id.clone(), entry.name.clone());
                if !self.tracker.append_tool_args(&step_id, &call_id, &delta) {
                    return;
                }
                self.emit(GraphEvent::StepDelta(StepDelta {
                    meta,
                    step_id,
                    call_id,
                    name,
                    args: delta,
                }));
            }
            ModelChunk::ServerToolResult { call_id, tool_name, output, artifact } => {
                if self.ledger.get(&call_id).is_none()
                    && self.tool_step(&meta, &call_id, &tool_name).is_none()
                {
                    return;
                }
                self.tool_result(meta, call_id, tool_name, output, false, artifact, true);
            }
            ModelChunk::Done { .. } | ModelChunk::Error { .. } => {}
        }
    }

    /// Step id for text at `meta`, announcing the step when it is new.
    fn message_step(&mut self, meta: &EventMeta) -> Option<String> {
        let (change, step) = self.tracker.message_step(meta)?;
        let id = step.id.clone();
        if change == StepChange::Created {
            self.emit(GraphEvent::StepStarted(StepStarted { meta: meta.clone(), step }));
        }
        Some(id)
    }

    /// Step id holding `call_id`, registering the call in the ledger.
    fn tool_step(&mut self, meta: &EventMeta, call_id: &str, name: &str) -> Option<String> {
        let (change, step) = self.tracker.tool_call_step(meta, call_id, name)?;
        let id = step.id.clone();
        self.ledger.record(call_id, &id, name);
        if change == StepChange::Created {
            self.emit(GraphEvent::StepStarted(StepStarted { meta: meta.clone(), step }));
        }
        Some(id)
    }

    /// Apply a tool result once. Artifacts of server-executed calls are
    /// merged here; client tools merge theirs as they run.
    #[allow(clippy::too_many_arguments)]
    fn tool_result(
        &mut self,
        meta: EventMeta,
        call_id: String,
        name: String,
        output: String,
        is_error: bool,
        artifact: Option<serde_json::Value>,
        server_side: bool,
    ) {
        let Some(step_id) = self.ledger.step_of(&call_id).map(str::to_owned) else {
            skip("tool-ended", format!("no step holds tool call {call_id}"));
            return;
        };
        if !self.ledger.consume(&call_id, is_error) {
            return;
        }

        if server_side {
            if let Some(parsed) = artifact.as_ref().and_then(ToolArtifact::from_value) {
                self.ctx.merge_artifact(&name, &parsed);
            }
        }

        self.emit(GraphEvent::ToolEnded(ToolEnded {
            meta: meta.clone(),
            step_id: step_id.clone(),
            call_id: call_id.clone(),
            name,
            output: output.clone(),
            is_error,
            artifact,
        }));

        let Some(update) = self.tracker.record_tool_result(&step_id, &call_id, &output, is_error)
        else {
            return;
        };
        self.emit(GraphEvent::StepCompleted(StepCompleted {
            meta,
            step_id,
            index: update.step.index,
            completion: StepCompletion::ToolCall(update.result),
        }));
    }
}

fn skip(kind: &str, reason: String) {
    tracing::warn!(kind, reason = %reason, "skipping event");
    TraceEvent::EventSkipped { kind: kind.to_owned(), reason }.emit();
}
