//! Branch execution: one agent node invoked inside a superstep.
//!
//! A branch loops model turn → tool batch → model turn until the model
//! answers without client tool calls, calls a handoff tool, fails, or is
//! cancelled. It never touches shared run state directly: everything it
//! observes is sent to the coordinator as a [`BranchSignal`], and the
//! messages it produces come back to the executor in a [`NodeOutput`].

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;

use sy_domain::error::{Error, Result};
use sy_domain::events::EventMeta;
use sy_domain::stream::{ModelChunk, Usage};
use sy_domain::tool::{ContentBlock, Message, Role, ToolCall};
use sy_domain::trace::TraceEvent;
use sy_providers::ChatRequest;

use super::agent::AgentContext;
use super::continuity::ensure_thinking_continuity;
use super::pruning::prune_to_budget;
use super::runs::{BranchRecord, BranchStatus};
use super::tools::{error_output, AssembledCalls, ToolCallAssembler, ToolExecution, ToolExecutor};
use crate::state::RunContext;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Signals (branch → coordinator)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Raw observations from a branch, in the order the branch made them.
#[derive(Debug, Clone)]
pub(crate) enum BranchSignal {
    ModelStarted {
        meta: EventMeta,
        provider: String,
        model: String,
    },
    Chunk {
        meta: EventMeta,
        chunk: ModelChunk,
    },
    ModelEnded {
        meta: EventMeta,
        usage: Option<Usage>,
        finish_reason: Option<String>,
        error: Option<String>,
    },
    ToolStarted {
        meta: EventMeta,
        call_id: String,
        name: String,
        args: Value,
    },
    ToolEnded {
        meta: EventMeta,
        call_id: String,
        name: String,
        output: String,
        is_error: bool,
        artifact: Option<Value>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node input / output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub(crate) struct NodeInput {
    pub branch: u32,
    pub superstep: u32,
    pub messages: Vec<Message>,
    /// Extra system instructions from incoming edge prompts.
    pub instructions: Vec<String>,
}

/// Control passed to another agent through a `transfer_to_*` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub target: String,
    pub instructions: Option<String>,
}

#[derive(Debug)]
pub(crate) struct NodeOutput {
    pub record: BranchRecord,
    /// Input history followed by everything this branch produced.
    pub messages: Vec<Message>,
    pub input_len: usize,
    pub handoff: Option<Handoff>,
    pub error: Option<Error>,
}

impl NodeOutput {
    pub fn produced(&self) -> &[Message] {
        &self.messages[self.input_len.min(self.messages.len())..]
    }

    /// Text of the last assistant message this branch produced.
    pub fn last_output(&self) -> String {
        self.produced()
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.joined_text())
            .find(|t| !t.is_empty())
            .unwrap_or_default()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(Error::Cancelled))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one agent node to completion. Never fails: errors are carried in
/// the output so sibling branches can finish.
pub(crate) async fn run_node(
    agent: Arc<AgentContext>,
    ctx: RunContext,
    input: NodeInput,
    tx: mpsc::Sender<BranchSignal>,
) -> NodeOutput {
    let mut record = BranchRecord::new(input.branch, agent.agent_id.clone(), input.superstep);
    let mut error = record.status.transition(BranchStatus::Dispatched).err();

    TraceEvent::BranchStarted {
        run_id: ctx.run_id.clone(),
        agent_id: agent.agent_id.clone(),
        branch: input.branch,
        superstep: input.superstep,
    }
    .emit();

    let input_len = input.messages.len();
    let mut branch = Branch {
        agent,
        ctx,
        tx,
        branch: input.branch,
        superstep: input.superstep,
        record,
        messages: input.messages,
        instructions: input.instructions,
        turn: 0,
        handoff: None,
        open_turn: None,
        pending_tools: Vec::new(),
    };

    if error.is_none() {
        let result = match branch.agent.max_duration {
            Some(limit) => {
                let timed = tokio::time::timeout(limit, branch.drive()).await;
                timed.unwrap_or_else(|_| {
                    Err(Error::Timeout(format!(
                        "agent '{}' exceeded {} ms",
                        branch.agent.agent_id,
                        limit.as_millis()
                    )))
                })
            }
            None => branch.drive().await,
        };
        error = result.err();
    }

    if let Some(e) = &error {
        branch.abort(e).await;
    }
    branch.finish(input_len, error)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Branch state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything one model turn produced.
#[derive(Debug, Default)]
struct StreamedTurn {
    text: String,
    thinking: String,
    signature: Option<String>,
    calls: AssembledCalls,
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

/// Mutable branch state. Kept outside the driving future so a timeout
/// leaves the partial history and record intact.
struct Branch {
    agent: Arc<AgentContext>,
    ctx: RunContext,
    tx: mpsc::Sender<BranchSignal>,
    branch: u32,
    superstep: u32,
    record: BranchRecord,
    messages: Vec<Message>,
    instructions: Vec<String>,
    turn: u32,
    handoff: Option<Handoff>,
    /// Model turn started but not yet ended.
    open_turn: Option<EventMeta>,
    /// Tool calls announced but not yet answered.
    pending_tools: Vec<(EventMeta, ToolCall)>,
}

impl Branch {
    fn meta(&self) -> EventMeta {
        EventMeta {
            run_id: self.ctx.run_id.clone(),
            agent_id: self.agent.agent_id.clone(),
            branch: self.branch,
            group_id: Some(self.superstep),
            turn: self.turn,
        }
    }

    async fn send(&self, signal: BranchSignal) {
        if self.tx.send(signal).await.is_err() {
            tracing::debug!(agent_id = %self.agent.agent_id, "event consumer gone");
        }
    }

    async fn drive(&mut self) -> Result<()> {
        let max_loops = self.ctx.limits.max_tool_loops.max(1);
        let mut tool_loops = 0u32;

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if tool_loops >= max_loops {
                tracing::warn!(agent_id = %self.agent.agent_id, max_loops, "tool loop limit reached");
                return Err(Error::Other(format!(
                    "tool loop limit reached ({max_loops} iterations)"
                )));
            }

            let meta = self.meta();
            let request = self.build_request();
            self.record.status.transition(BranchStatus::Streaming)?;

            let turn = self.model_turn(&meta, request).await?;
            let has_client_calls = !turn.calls.client.is_empty();
            self.push_assistant(&turn);

            if !has_client_calls {
                self.record.status.transition(BranchStatus::Completed)?;
                return Ok(());
            }

            self.record.status.transition(BranchStatus::ToolsPending)?;
            self.run_tools(&meta, &turn.calls.client).await?;

            if let Some(handoff) = &self.handoff {
                tracing::info!(
                    agent_id = %self.agent.agent_id,
                    target = %handoff.target,
                    "handing off"
                );
                self.record.handoff_to = Some(handoff.target.clone());
                self.record.status.transition(BranchStatus::Completed)?;
                return Ok(());
            }

            tool_loops += 1;
            self.turn += 1;
        }
    }

    // ── Request ──────────────────────────────────────────────────────

    fn system_prompt(&self) -> Option<String> {
        let mut sections: Vec<&str> = Vec::new();
        if let Some(prompt) = self.agent.system_prompt.as_deref() {
            sections.push(prompt);
        }
        sections.extend(self.instructions.iter().map(String::as_str).filter(|s| !s.is_empty()));
        (!sections.is_empty()).then(|| sections.join("\n\n"))
    }

    fn build_request(&self) -> ChatRequest {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = self.system_prompt() {
            messages.push(Message::system(system));
        }
        messages.extend(self.messages.iter().cloned());

        if self.agent.requires_thinking() {
            let (rewritten, collapsed) = ensure_thinking_continuity(&messages);
            if collapsed > 0 {
                tracing::debug!(agent_id = %self.agent.agent_id, collapsed, "rewrote history for reasoning backend");
                TraceEvent::HistoryRewritten {
                    agent_id: self.agent.agent_id.clone(),
                    collapsed_turns: collapsed,
                }
                .emit();
                messages = rewritten;
            }
        }

        if let Some(max_tokens) = self.agent.max_context_tokens {
            let (pruned, stats) = prune_to_budget(&messages, max_tokens);
            if !stats.is_noop() {
                TraceEvent::ContextPruned {
                    agent_id: self.agent.agent_id.clone(),
                    dropped_messages: stats.dropped_messages,
                    trimmed_results: stats.trimmed_results,
                }
                .emit();
                messages = pruned;
            }
        }

        ChatRequest {
            messages,
            tools: self.agent.tool_definitions(),
            model: self.agent.model.clone(),
            ..Default::default()
        }
    }

    // ── Model turn ───────────────────────────────────────────────────

    async fn model_turn(&mut self, meta: &EventMeta, request: ChatRequest) -> Result<StreamedTurn> {
        self.send(BranchSignal::ModelStarted {
            meta: meta.clone(),
            provider: self.agent.provider_id().to_owned(),
            model: self.agent.model_name().to_owned(),
        })
        .await;
        self.open_turn = Some(meta.clone());

        let span = tracing::info_span!(
            "llm.call",
            "otel.kind" = "CLIENT",
            agent_id = %self.agent.agent_id,
            model = %self.agent.model_name(),
            input_tokens = tracing::field::Empty,
            output_tokens = tracing::field::Empty,
        );
        let start = Instant::now();
        let result = self.stream(meta, request).instrument(span.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let usage = result.as_ref().ok().and_then(|t| t.usage);
        if let Some(u) = &usage {
            span.record("input_tokens", u.prompt_tokens);
            span.record("output_tokens", u.completion_tokens);
            self.record.usage.add(u);
        }
        self.record.turns += 1;

        TraceEvent::ModelRequest {
            provider: self.agent.provider_id().to_owned(),
            model: self.agent.model_name().to_owned(),
            agent_id: self.agent.agent_id.clone(),
            duration_ms,
            prompt_tokens: usage.map(|u| u.prompt_tokens),
            completion_tokens: usage.map(|u| u.completion_tokens),
        }
        .emit();

        self.open_turn = None;
        self.send(BranchSignal::ModelEnded {
            meta: meta.clone(),
            usage,
            finish_reason: result.as_ref().ok().and_then(|t| t.finish_reason.clone()),
            error: result.as_ref().err().map(ToString::to_string),
        })
        .await;
        result
    }

    async fn stream(&self, meta: &EventMeta, request: ChatRequest) -> Result<StreamedTurn> {
        let mut stream = self.agent.adapter.chat_stream(request).await?;
        let mut assembler = ToolCallAssembler::new();
        let mut turn = StreamedTurn::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => next,
            };
            let Some(item) = next else { break };
            let Some(chunk) = assembler.observe(item?) else {
                continue;
            };

            match &chunk {
                ModelChunk::Token { text } => turn.text.push_str(text),
                ModelChunk::Thinking { text, signature } => {
                    turn.thinking.push_str(text);
                    if signature.is_some() {
                        turn.signature = signature.clone();
                    }
                }
                ModelChunk::Done { usage, finish_reason } => {
                    turn.usage = *usage;
                    turn.finish_reason = finish_reason.clone();
                }
                _ => {}
            }

            let failure = match &chunk {
                ModelChunk::Error { message } => Some(message.clone()),
                _ => None,
            };
            self.send(BranchSignal::Chunk { meta: meta.clone(), chunk }).await;
            if let Some(message) = failure {
                return Err(Error::Provider {
                    provider: self.agent.provider_id().to_owned(),
                    message,
                });
            }
        }

        turn.calls = assembler.finish();
        Ok(turn)
    }

    /// Append the assistant message for a turn, then the results of any
    /// calls the backend executed itself.
    fn push_assistant(&mut self, turn: &StreamedTurn) {
        let mut blocks = Vec::new();
        if !turn.thinking.is_empty() {
            blocks.push(ContentBlock::Thinking {
                thinking: turn.thinking.clone(),
                signature: turn.signature.clone(),
            });
        }
        if !turn.text.is_empty() {
            blocks.push(ContentBlock::Text { text: turn.text.clone() });
        }
        let calls = turn.calls.client.iter().chain(turn.calls.server.iter().map(|s| &s.call));
        for call in calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.call_id.clone(),
                name: call.tool_name.clone(),
                input: call.arguments.clone(),
            });
        }

        let message = match blocks.as_slice() {
            [] => return,
            [ContentBlock::Text { text }] => Message::assistant(text.clone()),
            _ => Message::assistant_blocks(blocks),
        };
        self.messages.push(message.named(self.agent.name.clone()));

        for server in &turn.calls.server {
            self.messages.push(Message::tool_result(
                server.call.call_id.clone(),
                server.output.clone(),
                false,
            ));
        }
    }

    // ── Tool batch ───────────────────────────────────────────────────

    async fn run_tools(&mut self, meta: &EventMeta, calls: &[ToolCall]) -> Result<()> {
        // Registered before the send so an abort mid-send still answers it.
        for call in calls {
            self.pending_tools.push((meta.clone(), call.clone()));
            self.send(BranchSignal::ToolStarted {
                meta: meta.clone(),
                call_id: call.call_id.clone(),
                name: call.tool_name.clone(),
                args: call.arguments.clone(),
            })
            .await;
        }

        // Handoff calls resolve locally; the first one wins.
        let mut results: Vec<Option<ToolExecution>> = vec![None; calls.len()];
        let mut regular = Vec::new();
        for (i, call) in calls.iter().enumerate() {
            let Some(target) = self.agent.handoff_target(&call.tool_name) else {
                regular.push(i);
                continue;
            };
            let output = if let Some(first) = &self.handoff {
                format!("Skipped: already transferring to {}", first.target)
            } else {
                let output = format!("Transferred to {target}");
                self.handoff = Some(Handoff {
                    target: target.to_owned(),
                    instructions: call
                        .arguments
                        .get("instructions")
                        .and_then(Value::as_str)
                        .filter(|s| !s.trim().is_empty())
                        .map(str::to_owned),
                });
                output
            };
            results[i] = Some(ToolExecution {
                output,
                is_error: false,
                artifact: None,
                duration_ms: 0,
            });
        }

        let executor = ToolExecutor::new(self.agent.as_ref(), &self.ctx);
        let executor = &executor;
        let futures = regular.iter().map(|&i| {
            let call = &calls[i];
            let span = tracing::info_span!(
                "tool.call",
                tool_name = %call.tool_name,
                call_id = %call.call_id,
            );
            async move { (i, executor.execute(call).await) }.instrument(span)
        });
        let executed = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => return Err(Error::Cancelled),
            done = join_all(futures) => done,
        };
        for (i, exec) in executed {
            results[i] = Some(exec);
        }

        for (call, exec) in calls.iter().zip(results) {
            let exec = exec.unwrap_or_else(|| ToolExecution {
                output: error_output("tool produced no result"),
                is_error: true,
                artifact: None,
                duration_ms: 0,
            });
            self.send(BranchSignal::ToolEnded {
                meta: meta.clone(),
                call_id: call.call_id.clone(),
                name: call.tool_name.clone(),
                output: exec.output.clone(),
                is_error: exec.is_error,
                artifact: exec.artifact.as_ref().map(|a| a.to_value()),
            })
            .await;
            self.messages.push(Message::tool_result(call.call_id.clone(), exec.output, exec.is_error));
            self.pending_tools.retain(|(_, pending)| pending.call_id != call.call_id);
        }
        Ok(())
    }

    // ── Termination ──────────────────────────────────────────────────

    /// Close whatever the failed drive left open so every started model
    /// turn ends and every announced tool call gets a result.
    async fn abort(&mut self, error: &Error) {
        let reason = error.to_string();
        if let Some(meta) = self.open_turn.take() {
            self.send(BranchSignal::ModelEnded {
                meta,
                usage: None,
                finish_reason: None,
                error: Some(reason.clone()),
            })
            .await;
        }
        for (meta, call) in std::mem::take(&mut self.pending_tools) {
            let output = error_output(&reason);
            self.send(BranchSignal::ToolEnded {
                meta,
                call_id: call.call_id.clone(),
                name: call.tool_name.clone(),
                output: output.clone(),
                is_error: true,
                artifact: None,
            })
            .await;
            self.messages.push(Message::tool_result(call.call_id, output, true));
        }
    }

    fn finish(mut self, input_len: usize, error: Option<Error>) -> NodeOutput {
        if let Some(e) = &error {
            if let Err(invalid) = self.record.status.transition(BranchStatus::Failed) {
                tracing::debug!(error = %invalid, "branch already terminal");
                self.record.status = BranchStatus::Failed;
            }
            tracing::warn!(
                agent_id = %self.agent.agent_id,
                branch = self.branch,
                error = %e,
                "branch failed"
            );
        }
        self.record.close(error.as_ref().map(ToString::to_string));

        TraceEvent::BranchFinished {
            run_id: self.ctx.run_id.clone(),
            agent_id: self.agent.agent_id.clone(),
            branch: self.branch,
            status: self.record.status.as_str().to_owned(),
            turns: self.record.turns,
            duration_ms: self.record.duration_ms.unwrap_or(0),
        }
        .emit();

        NodeOutput {
            record: self.record,
            messages: self.messages,
            input_len,
            handoff: self.handoff,
            error,
        }
    }
}
