//! Graph execution: superstep scheduling over an [`ExecutableGraph`].
//!
//! A run proceeds in waves. Every node activated for the current wave runs
//! concurrently on the caller's task (`join_all`), streaming its signals to
//! a single [`Coordinator`]. When the wave finishes, each completed node's
//! outgoing edges decide the next wave: a handoff activates its target with
//! the full branch history, direct edges activate every destination, and
//! conditional edges activate whatever their condition chooses.
//!
//! A node waits while any other activation of the wave can still reach one
//! of its predecessors, so fan-in nodes start only after every branch that
//! could feed them has finished. Activations of the same agent within a wave
//! are merged.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::Instrument;

use sy_domain::config::{Config, RunConfig};
use sy_domain::content::ContentPart;
use sy_domain::error::{Error, Result};
use sy_domain::events::GraphEventHandler;
use sy_domain::session::CodeSessions;
use sy_domain::step::RunStep;
use sy_domain::stream::Usage;
use sy_domain::tool::Message;
use sy_domain::trace::TraceEvent;
use sy_providers::AdapterRegistry;
use sy_tools::ToolRegistry;

use super::cancel::CancelToken;
use super::coordinator::Coordinator;
use super::graph::{BranchState, Edge, EdgeKind, ExecutableGraph, PromptContext};
use super::runs::{BranchRecord, RunRecord, RunStatus};
use super::turn::{run_node, BranchSignal, NodeInput, NodeOutput};
use crate::state::RunContext;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input / outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct RunInput {
    pub message: String,
    /// Prior conversation, e.g. a re-labeled thread.
    pub history: Vec<Message>,
    /// Code sessions carried over from earlier runs of the thread.
    pub code_sessions: CodeSessions,
    pub thread_id: Option<String>,
    pub run_id: Option<String>,
    pub cancel: Option<CancelToken>,
    /// Start from these agents instead of the graph's entry nodes.
    pub entry: Option<Vec<String>>,
}

impl RunInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_code_sessions(mut self, sessions: CodeSessions) -> Self {
        self.code_sessions = sessions;
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn starting_at(mut self, agents: Vec<String>) -> Self {
        self.entry = Some(agents);
        self
    }
}

/// Everything a run produced, including partial content of a failed or
/// stopped run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub content_parts: Vec<ContentPart>,
    /// Content part index → agent id.
    pub agent_map: BTreeMap<usize, String>,
    /// Input history, the user message, then every produced message in
    /// wave order.
    pub messages: Vec<Message>,
    pub steps: Vec<RunStep>,
    pub code_sessions: CodeSessions,
    pub usage: Usage,
    pub record: RunRecord,
}

impl RunOutcome {
    /// Text parts joined by blank lines.
    pub fn text(&self) -> String {
        self.content_parts
            .iter()
            .filter_map(ContentPart::as_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One node activation queued for a wave.
#[derive(Debug, Clone, PartialEq)]
struct Activation {
    agent_id: String,
    messages: Vec<Message>,
    instructions: Vec<String>,
}

impl Activation {
    /// Fan-in: keep the shared prefix once, then append what the other
    /// branch added.
    fn absorb(&mut self, other: Activation) {
        let common = self
            .messages
            .iter()
            .zip(&other.messages)
            .take_while(|(a, b)| a == b)
            .count();
        self.messages.extend(other.messages.into_iter().skip(common));
        for instruction in other.instructions {
            if !self.instructions.contains(&instruction) {
                self.instructions.push(instruction);
            }
        }
    }
}

#[derive(Debug)]
struct Driven {
    produced: Vec<Message>,
    branches: Vec<BranchRecord>,
    supersteps: u32,
    status: RunStatus,
    error: Option<String>,
}

pub struct GraphRunner {
    graph: Arc<ExecutableGraph>,
    config: RunConfig,
}

impl GraphRunner {
    pub fn new(graph: ExecutableGraph, config: RunConfig) -> Self {
        Self {
            graph: Arc::new(graph),
            config,
        }
    }

    pub fn from_config(
        config: &Config,
        adapters: &AdapterRegistry,
        tools: &ToolRegistry,
    ) -> Result<Self> {
        let graph = ExecutableGraph::from_config(config, adapters, tools)?;
        Ok(Self::new(graph, config.run.clone()))
    }

    pub fn graph(&self) -> &ExecutableGraph {
        &self.graph
    }

    /// Agent id → display name, for history re-labeling.
    pub fn agent_names(&self) -> BTreeMap<String, String> {
        self.graph.names()
    }

    /// Execute the graph for one user message.
    ///
    /// Returns `Err` only when the run cannot start; every failure after
    /// that is reported in the outcome together with the partial content.
    pub async fn run(
        &self,
        input: RunInput,
        handler: &mut dyn GraphEventHandler,
    ) -> Result<RunOutcome> {
        let entry = match &input.entry {
            Some(ids) => {
                if ids.is_empty() {
                    return Err(Error::Graph("no entry agents given".into()));
                }
                if let Some(unknown) = ids.iter().find(|id| !self.graph.contains(id)) {
                    return Err(Error::Graph(format!("unknown entry agent '{unknown}'")));
                }
                ids.clone()
            }
            None => self.graph.entry_nodes().to_vec(),
        };

        let run_id = input.run_id.clone().unwrap_or_else(RunContext::new_run_id);
        let ctx = RunContext::new(run_id.clone(), self.config.clone())
            .with_thread(input.thread_id.clone())
            .with_sessions(input.code_sessions.clone())
            .with_cancel(input.cancel.clone().unwrap_or_default());

        let span = tracing::info_span!(
            "run",
            run_id = %run_id,
            thread_id = input.thread_id.as_deref().unwrap_or(""),
        );
        Ok(self.execute(ctx, input, entry, handler).instrument(span).await)
    }

    async fn execute(
        &self,
        ctx: RunContext,
        input: RunInput,
        entry: Vec<String>,
        handler: &mut dyn GraphEventHandler,
    ) -> RunOutcome {
        let started = Instant::now();
        let mut record = RunRecord::new(ctx.run_id.clone(), ctx.thread_id.clone(), &input.message);
        tracing::info!(entry = ?entry, agents = self.graph.agents().count(), "run started");

        let mut messages = input.history;
        messages.push(Message::user(input.message));

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let mut coordinator = Coordinator::new(ctx.clone(), handler);
        let (driven, ()) = tokio::join!(
            self.drive(&ctx, messages.clone(), entry, tx),
            coordinator.consume(rx)
        );
        let collected = coordinator.finish();

        messages.extend(driven.produced);
        record.supersteps = driven.supersteps;
        for branch in driven.branches {
            record.push_branch(branch);
        }
        record.finish(driven.status, driven.error.clone());

        TraceEvent::RunFinished {
            run_id: ctx.run_id.clone(),
            status: driven.status.as_str().to_owned(),
            duration_ms: started.elapsed().as_millis() as u64,
            content_parts: collected.parts.len(),
        }
        .emit();
        tracing::info!(
            status = driven.status.as_str(),
            supersteps = record.supersteps,
            events = collected.events,
            "run finished"
        );

        RunOutcome {
            run_id: ctx.run_id.clone(),
            status: driven.status,
            error: driven.error,
            content_parts: collected.parts,
            agent_map: collected.agent_map,
            messages,
            steps: collected.steps,
            code_sessions: ctx.code_sessions(),
            usage: record.usage,
            record,
        }
    }

    // ── Superstep loop ───────────────────────────────────────────────

    async fn drive(
        &self,
        ctx: &RunContext,
        seed: Vec<Message>,
        entry: Vec<String>,
        tx: mpsc::Sender<BranchSignal>,
    ) -> Driven {
        let mut driven = Driven {
            produced: Vec::new(),
            branches: Vec::new(),
            supersteps: 0,
            status: RunStatus::Completed,
            error: None,
        };
        let mut wave: Vec<Activation> = entry
            .into_iter()
            .map(|agent_id| Activation {
                agent_id,
                messages: seed.clone(),
                instructions: Vec::new(),
            })
            .collect();
        let mut superstep = 0u32;
        let mut next_branch = 0u32;

        while !wave.is_empty() {
            if ctx.cancel.is_cancelled() {
                driven.status = RunStatus::Stopped;
                driven.error = Some(Error::Cancelled.to_string());
                break;
            }
            if superstep >= self.config.recursion_limit {
                tracing::warn!(limit = self.config.recursion_limit, "recursion limit reached");
                driven.status = RunStatus::Failed;
                driven.error = Some(Error::RecursionLimit(self.config.recursion_limit).to_string());
                break;
            }

            let (ready, deferred) = self.schedule(merge_activations(wave));
            tracing::debug!(
                superstep,
                ready = ?ready.iter().map(|a| a.agent_id.as_str()).collect::<Vec<_>>(),
                deferred = deferred.len(),
                "superstep"
            );

            let nodes: Vec<_> = ready
                .into_iter()
                .filter_map(|act| {
                    let agent = self.graph.agent(&act.agent_id)?.clone();
                    let branch = next_branch;
                    next_branch += 1;
                    let span = tracing::info_span!(
                        "branch",
                        agent_id = %act.agent_id,
                        branch,
                        superstep,
                    );
                    let input = NodeInput {
                        branch,
                        superstep,
                        messages: act.messages,
                        instructions: act.instructions,
                    };
                    Some(run_node(agent, ctx.clone(), input, tx.clone()).instrument(span))
                })
                .collect();
            let outputs = join_all(nodes).await;
            superstep += 1;
            driven.supersteps = superstep;

            let mut next = deferred;
            let mut failure: Option<(bool, String)> = None;
            for out in outputs {
                driven.produced.extend_from_slice(out.produced());
                match &out.error {
                    Some(e) => {
                        if failure.is_none() {
                            failure = Some((out.is_cancelled(), e.to_string()));
                        }
                    }
                    None => next.extend(self.route(&out)),
                }
                driven.branches.push(out.record);
            }

            if let Some((cancelled, error)) = failure {
                driven.status = if cancelled { RunStatus::Stopped } else { RunStatus::Failed };
                driven.error = Some(error);
                break;
            }
            wave = next;
        }
        driven
    }

    /// Split a wave into nodes that may start now and nodes that must wait.
    ///
    /// A node waits while another activation in the wave can still reach one
    /// of its predecessors, so fan-in nodes start once, after every branch
    /// that could feed them has finished. Activations sitting on a cycle
    /// never hold others back, since their completion is unbounded. A wave
    /// where every node waits runs as a whole.
    fn schedule(&self, wave: Vec<Activation>) -> (Vec<Activation>, Vec<Activation>) {
        let upstream: Vec<(&str, HashSet<&str>)> = wave
            .iter()
            .map(|a| (a.agent_id.as_str(), self.graph.downstream(&a.agent_id)))
            .filter(|(id, reach)| !reach.contains(id))
            .collect();

        let blocked: HashSet<String> = wave
            .iter()
            .filter(|a| {
                let preds: Vec<&str> = self
                    .graph
                    .predecessors(&a.agent_id)
                    .into_iter()
                    .filter(|p| *p != a.agent_id)
                    .collect();
                upstream.iter().any(|(q, reach)| {
                    *q != a.agent_id && preds.iter().any(|p| p == q || reach.contains(p))
                })
            })
            .map(|a| a.agent_id.clone())
            .collect();

        let (ready, deferred): (Vec<_>, Vec<_>) =
            wave.into_iter().partition(|a| !blocked.contains(&a.agent_id));
        if ready.is_empty() {
            return (deferred, Vec::new());
        }
        (ready, deferred)
    }

    // ── Routing ──────────────────────────────────────────────────────

    fn route(&self, out: &NodeOutput) -> Vec<Activation> {
        let source = out.record.agent_id.as_str();

        if let Some(handoff) = &out.handoff {
            let mut messages = out.messages.clone();
            if let Some(instructions) = &handoff.instructions {
                messages.push(Message::user(instructions.clone()));
            }
            return vec![Activation {
                agent_id: handoff.target.clone(),
                messages,
                instructions: Vec::new(),
            }];
        }

        let last_output = out.last_output();
        let state = BranchState {
            agent_id: source,
            messages: &out.messages,
            last_output: &last_output,
        };

        let mut next = Vec::new();
        for edge in self.graph.outgoing(source) {
            let targets = match &edge.kind {
                EdgeKind::Handoff => continue,
                EdgeKind::Direct => edge.to.clone(),
                EdgeKind::Conditional(condition) => {
                    let chosen = condition.route(&state);
                    if chosen.is_empty() {
                        tracing::debug!(source, "condition chose no destination");
                    }
                    chosen
                        .into_iter()
                        .filter(|target| {
                            let known = self.graph.contains(target);
                            if !known {
                                tracing::warn!(source, target = %target, "condition chose an unknown agent, skipping");
                            }
                            known
                        })
                        .collect()
                }
            };
            for target in targets {
                next.push(forward(edge, out, &last_output, target));
            }
        }
        next
    }
}

/// Build a destination's input from a completed source branch.
fn forward(edge: &Edge, out: &NodeOutput, last_output: &str, target: String) -> Activation {
    let mut messages = if edge.exclude_results {
        out.messages[..out.input_len.min(out.messages.len())].to_vec()
    } else {
        out.messages.clone()
    };
    let mut instructions = Vec::new();

    if let Some(prompt) = &edge.prompt {
        let rendered = prompt.render(&PromptContext {
            source: &out.record.agent_id,
            results: last_output,
            messages: &out.messages,
        });
        if edge.prompt_as_message() {
            messages.push(Message::user(rendered));
        } else {
            instructions.push(rendered);
        }
    }

    Activation {
        agent_id: target,
        messages,
        instructions,
    }
}

/// Collapse activations of the same agent, keeping first-appearance order.
fn merge_activations(wave: Vec<Activation>) -> Vec<Activation> {
    let mut merged: Vec<Activation> = Vec::new();
    for act in wave {
        match merged.iter_mut().find(|m| m.agent_id == act.agent_id) {
            Some(existing) => existing.absorb(act),
            None => merged.push(act),
        }
    }
    merged
}

impl std::fmt::Debug for GraphRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRunner")
            .field("graph", &self.graph)
            .field("config", &self.config)
            .finish()
    }
}
