//! Tool-call lifecycle.
//!
//! Three pieces, split by who owns them:
//!
//! - [`ToolCallAssembler`] lives in a branch. It gives every streamed call a
//!   stable id, concatenates argument deltas and parses the finished JSON.
//! - [`ToolCallLedger`] lives in the coordinator. It maps call ids to the
//!   step that holds them and marks each call consumed exactly once.
//! - [`ToolExecutor`] dispatches a call to the agent's bound tool and turns
//!   every failure (tool error, denial, panic) into an error output.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::Value;
use sy_domain::step::ToolCallStatus;
use sy_domain::stream::ModelChunk;
use sy_domain::tool::ToolCall;
use sy_domain::trace::TraceEvent;
use sy_tools::{ToolArtifact, ToolContext, ToolError};

use crate::runtime::agent::AgentContext;
use crate::state::RunContext;

/// Marker that starts every tool error output.
pub const TOOL_ERROR_PREFIX: &str = "Error processing tool";

pub fn error_output(message: impl std::fmt::Display) -> String {
    format!("{TOOL_ERROR_PREFIX}: {message}")
}

pub fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolCallAssembler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct PendingCall {
    call_id: String,
    name: String,
    args: String,
}

/// A tool the backend already executed.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerResult {
    pub call: ToolCall,
    pub output: String,
    pub artifact: Option<Value>,
}

/// Calls assembled from one model turn.
#[derive(Debug, Default)]
pub struct AssembledCalls {
    /// Calls this system must dispatch, in start order.
    pub client: Vec<ToolCall>,
    /// Calls the backend executed, with their results, in result order.
    pub server: Vec<ServerResult>,
}

impl AssembledCalls {
    pub fn is_empty(&self) -> bool {
        self.client.is_empty() && self.server.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    by_index: HashMap<u32, String>,
    calls: Vec<PendingCall>,
    server: Vec<(String, String, String, Option<Value>)>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one chunk: fill in call ids and record argument text.
    ///
    /// Returns `None` for chunks that cannot be attributed to any call.
    pub fn observe(&mut self, chunk: ModelChunk) -> Option<ModelChunk> {
        match chunk {
            ModelChunk::ToolCallStarted { index, call_id, tool_name } => {
                let id = call_id.filter(|id| !id.is_empty()).unwrap_or_else(new_call_id);
                if self.find(&id).is_none() {
                    self.calls.push(PendingCall {
                        call_id: id.clone(),
                        name: tool_name.clone(),
                        args: String::new(),
                    });
                }
                self.by_index.insert(index, id.clone());
                Some(ModelChunk::ToolCallStarted { index, call_id: Some(id), tool_name })
            }
            ModelChunk::ToolCallDelta { index, call_id, delta } => {
                let known = call_id.filter(|id| self.find(id).is_some());
                let Some(id) = known.or_else(|| self.by_index.get(&index).cloned()) else {
                    tracing::warn!(index, "tool call delta before its start, skipping");
                    TraceEvent::EventSkipped {
                        kind: "tool_call_delta".into(),
                        reason: format!("no tool call started at index {index}"),
                    }
                    .emit();
                    return None;
                };
                if let Some(call) = self.find_mut(&id) {
                    call.args.push_str(&delta);
                }
                Some(ModelChunk::ToolCallDelta { index, call_id: Some(id), delta })
            }
            ModelChunk::ServerToolResult { call_id, tool_name, output, artifact } => {
                if !self.server.iter().any(|(id, ..)| *id == call_id) {
                    self.server
                        .push((call_id.clone(), tool_name.clone(), output.clone(), artifact.clone()));
                }
                Some(ModelChunk::ServerToolResult { call_id, tool_name, output, artifact })
            }
            other => Some(other),
        }
    }

    /// Finish the turn: parse arguments and split client from server calls.
    pub fn finish(self) -> AssembledCalls {
        let mut parsed: Vec<ToolCall> = self
            .calls
            .into_iter()
            .map(|c| ToolCall {
                arguments: parse_arguments(&c.call_id, &c.name, &c.args),
                call_id: c.call_id,
                tool_name: c.name,
            })
            .collect();

        let mut server = Vec::with_capacity(self.server.len());
        for (call_id, tool_name, output, artifact) in self.server {
            let call = match parsed.iter().position(|c| c.call_id == call_id) {
                Some(pos) => parsed.remove(pos),
                None => ToolCall {
                    call_id,
                    tool_name,
                    arguments: Value::Object(Default::default()),
                },
            };
            server.push(ServerResult { call, output, artifact });
        }
        AssembledCalls { client: parsed, server }
    }

    fn find(&self, call_id: &str) -> Option<&PendingCall> {
        self.calls.iter().find(|c| c.call_id == call_id)
    }

    fn find_mut(&mut self, call_id: &str) -> Option<&mut PendingCall> {
        self.calls.iter_mut().find(|c| c.call_id == call_id)
    }
}

fn parse_arguments(call_id: &str, name: &str, args: &str) -> Value {
    if args.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(args) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                call_id = %call_id,
                tool = %name,
                error = %e,
                "tool call arguments are not valid JSON; defaulting to empty object"
            );
            Value::Object(Default::default())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolCallLedger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub step_id: String,
    pub name: String,
    pub status: ToolCallStatus,
    consumed: bool,
}

#[derive(Debug, Default)]
pub struct ToolCallLedger {
    entries: HashMap<String, LedgerEntry>,
}

impl ToolCallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record which step holds a call. Returns false if already recorded.
    pub fn record(&mut self, call_id: &str, step_id: &str, name: &str) -> bool {
        if self.entries.contains_key(call_id) {
            return false;
        }
        self.entries.insert(
            call_id.to_owned(),
            LedgerEntry {
                step_id: step_id.to_owned(),
                name: name.to_owned(),
                status: ToolCallStatus::Pending,
                consumed: false,
            },
        );
        true
    }

    pub fn get(&self, call_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(call_id)
    }

    pub fn step_of(&self, call_id: &str) -> Option<&str> {
        self.entries.get(call_id).map(|e| e.step_id.as_str())
    }

    pub fn status(&self, call_id: &str) -> Option<ToolCallStatus> {
        self.entries.get(call_id).map(|e| e.status)
    }

    /// Mark a call's result consumed. Only the first call for a given id
    /// returns true; redeliveries and unknown ids return false.
    pub fn consume(&mut self, call_id: &str, is_error: bool) -> bool {
        match self.entries.get_mut(call_id) {
            Some(entry) if !entry.consumed => {
                entry.consumed = true;
                entry.status = if is_error { ToolCallStatus::Error } else { ToolCallStatus::Success };
                true
            }
            Some(_) => {
                tracing::debug!(call_id, "tool result already consumed, skipping");
                false
            }
            None => {
                tracing::warn!(call_id, "tool result for unknown call, skipping");
                false
            }
        }
    }

    /// Calls still waiting for a result.
    pub fn pending(&self) -> usize {
        self.entries.values().filter(|e| !e.consumed).count()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolExecutor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of dispatching one call.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub output: String,
    pub is_error: bool,
    pub artifact: Option<ToolArtifact>,
    pub duration_ms: u64,
}

pub struct ToolExecutor<'a> {
    agent: &'a AgentContext,
    ctx: &'a RunContext,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(agent: &'a AgentContext, ctx: &'a RunContext) -> Self {
        Self { agent, ctx }
    }

    /// Run one tool call. Never fails: errors become error outputs.
    pub async fn execute(&self, call: &ToolCall) -> ToolExecution {
        let start = Instant::now();
        let result = self.invoke(call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                if let Some(artifact) = &output.artifact {
                    self.ctx.merge_artifact(&call.tool_name, artifact);
                }
                TraceEvent::ToolDispatched {
                    agent_id: self.agent.agent_id.clone(),
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    duration_ms,
                }
                .emit();
                ToolExecution {
                    output: output.content,
                    is_error: false,
                    artifact: output.artifact,
                    duration_ms,
                }
            }
            Err(message) => {
                tracing::warn!(
                    agent_id = %self.agent.agent_id,
                    tool = %call.tool_name,
                    error = %message,
                    "tool call failed"
                );
                TraceEvent::ToolFailed {
                    agent_id: self.agent.agent_id.clone(),
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    error: message.clone(),
                }
                .emit();
                ToolExecution {
                    output: error_output(&message),
                    is_error: true,
                    artifact: None,
                    duration_ms,
                }
            }
        }
    }

    async fn invoke(&self, call: &ToolCall) -> Result<sy_tools::ToolOutput, String> {
        let name = call.tool_name.as_str();
        if !self.agent.tool_policy.allows(name) {
            return Err(ToolError::Denied(name.to_owned()).to_string());
        }
        let Some(tool) = self.agent.tools.get(name) else {
            return Err(format!("unknown tool '{name}'"));
        };

        let tool_ctx = ToolContext {
            call_id: call.call_id.clone(),
            agent_id: self.agent.agent_id.clone(),
            run_id: self.ctx.run_id.clone(),
            session: self.ctx.session_for(name),
            cancel: self.ctx.cancel.as_token(),
        };

        match AssertUnwindSafe(tool.call(tool_ctx, call.arguments.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(panic_message(panic)),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_owned()
    }
}
