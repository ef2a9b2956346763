//! `switchyard run`: one-shot execution command.
//!
//! Sends a single message through the agent graph, streams every agent's
//! text to stdout, appends the run to its thread and exits. Passing
//! `--thread` resumes an earlier conversation with re-labeled history.

use std::io::Write;

use anyhow::Context;
use chrono::Utc;
use sy_domain::config::Config;
use sy_domain::events::{GraphEventHandler, ModelStarted, MessageDelta, ReasoningDelta, ToolEnded, ToolStarted};
use sy_providers::AdapterRegistry;
use sy_sessions::{StoredRun, ThreadStore};
use sy_tools::ToolRegistry;

use crate::runtime::cancel::CancelToken;
use crate::runtime::executor::{GraphRunner, RunInput, RunOutcome};
use crate::runtime::relabel::thread_history;

/// Execute one run and print the response.
///
/// Returns whether the run completed.
pub async fn run(
    config: &Config,
    message: String,
    thread: Option<String>,
    start: Vec<String>,
    json_output: bool,
) -> anyhow::Result<bool> {
    // 1. Compile the graph.
    let runner = GraphRunner::from_config(
        config,
        &AdapterRegistry::with_builtins(),
        &ToolRegistry::with_builtins(),
    )?;

    // 2. Resume or start the thread.
    let store = ThreadStore::open(&config.sessions.path)
        .with_context(|| format!("opening thread store {}", config.sessions.path.display()))?;
    let thread_id = thread.unwrap_or_else(ThreadStore::new_thread_id);
    let prior = store.read_async(&thread_id).await?;
    let history = thread_history(&prior);
    let code_sessions = store.latest_code_sessions(&thread_id)?;
    tracing::debug!(thread_id = %thread_id, prior_runs = prior.len(), "resuming thread");

    // 3. Ctrl-C stops the run; partial output is still persisted.
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut input = RunInput::new(message.clone())
        .with_history(history)
        .with_code_sessions(code_sessions)
        .with_thread(&thread_id)
        .with_cancel(cancel);
    if !start.is_empty() {
        input = input.starting_at(start);
    }

    // 4. Run, streaming unless JSON output was requested.
    let outcome = if json_output {
        runner.run(input, &mut sy_domain::events::NoopHandler).await?
    } else {
        let mut printer = StreamPrinter::default();
        let outcome = runner.run(input, &mut printer).await?;
        printer.finish();
        outcome
    };
    interrupt.abort();

    // 5. Persist before reporting so a failed run can still be resumed.
    let stored = stored_run(&outcome, &thread_id, &message, runner.agent_names());
    if let Err(e) = store.append_async(&stored).await {
        tracing::warn!(error = %e, thread_id = %thread_id, "thread append failed");
    }

    if json_output {
        let json = serde_json::to_string_pretty(&outcome_json(&outcome, &thread_id))
            .map_err(|e| anyhow::anyhow!("serializing outcome: {e}"))?;
        println!("{json}");
    } else {
        if let Some(error) = &outcome.error {
            eprintln!("error: {error}");
        } else if !outcome.is_success() {
            eprintln!("run {}", outcome.status.as_str());
        }
        eprintln!("\x1b[2mthread: {thread_id}\x1b[0m");
    }

    Ok(outcome.is_success())
}

/// The thread record for a finished run.
pub fn stored_run(
    outcome: &RunOutcome,
    thread_id: &str,
    user_message: &str,
    agent_names: std::collections::BTreeMap<String, String>,
) -> StoredRun {
    StoredRun {
        run_id: outcome.run_id.clone(),
        thread_id: thread_id.to_owned(),
        timestamp: Utc::now(),
        status: outcome.status.as_str().to_owned(),
        user_message: user_message.to_owned(),
        content_parts: outcome.content_parts.clone(),
        agent_map: outcome.agent_map.clone(),
        agent_names,
        code_sessions: outcome.code_sessions.clone(),
    }
}

fn outcome_json(outcome: &RunOutcome, thread_id: &str) -> serde_json::Value {
    serde_json::json!({
        "run_id": outcome.run_id,
        "thread_id": thread_id,
        "status": outcome.status,
        "error": outcome.error,
        "text": outcome.text(),
        "content_parts": outcome.content_parts,
        "agent_map": outcome.agent_map,
        "steps": outcome.steps,
        "usage": outcome.usage,
        "code_sessions": outcome.code_sessions,
    })
}

// ── Terminal streaming ────────────────────────────────────────────────

/// Prints message text to stdout and everything else, dimmed, to stderr.
#[derive(Default)]
struct StreamPrinter {
    agent: Option<String>,
    mid_line: bool,
}

impl StreamPrinter {
    fn break_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }

    fn finish(&mut self) {
        self.break_line();
    }
}

impl GraphEventHandler for StreamPrinter {
    fn on_model_started(&mut self, event: &ModelStarted) {
        if self.agent.as_deref() == Some(event.meta.agent_id.as_str()) {
            return;
        }
        self.break_line();
        eprintln!("\x1b[2m[{}]\x1b[0m", event.meta.agent_id);
        self.agent = Some(event.meta.agent_id.clone());
    }

    fn on_message_delta(&mut self, event: &MessageDelta) {
        print!("{}", event.text);
        std::io::stdout().flush().ok();
        self.mid_line = !event.text.ends_with('\n');
    }

    fn on_reasoning_delta(&mut self, event: &ReasoningDelta) {
        eprint!("\x1b[2m{}\x1b[0m", event.text);
        std::io::stderr().flush().ok();
    }

    fn on_tool_started(&mut self, event: &ToolStarted) {
        self.break_line();
        eprintln!("\x1b[2m[tool: {}]\x1b[0m", event.name);
    }

    fn on_tool_ended(&mut self, event: &ToolEnded) {
        if event.is_error {
            self.break_line();
            eprintln!("\x1b[2m[tool failed: {}]\x1b[0m", event.name);
        }
    }
}
