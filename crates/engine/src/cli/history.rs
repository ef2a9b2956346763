use std::fmt::Write as _;

use anyhow::Context;

use sy_domain::config::Config;
use sy_domain::tool::{ContentBlock, Message, MessageContent, Role};
use sy_sessions::{StoredRun, ThreadStore};

use crate::runtime::relabel::relabel_history;

/// List threads, or print one thread's runs as re-labeled history.
pub fn show(config: &Config, thread: Option<&str>) -> anyhow::Result<()> {
    let store = ThreadStore::open(&config.sessions.path)
        .with_context(|| format!("opening thread store {}", config.sessions.path.display()))?;

    let Some(thread_id) = thread else {
        let threads = store.list_threads()?;
        if threads.is_empty() {
            println!("No threads in {}", config.sessions.path.display());
        }
        for id in threads {
            println!("{id}");
        }
        return Ok(());
    };

    let runs = store.read(thread_id)?;
    if runs.is_empty() {
        anyhow::bail!("thread '{thread_id}' has no runs");
    }
    print!("{}", render_thread(&runs));
    Ok(())
}

/// One block per run: header, user message, then each agent message.
pub fn render_thread(runs: &[StoredRun]) -> String {
    let mut out = String::new();
    for run in runs {
        let _ = writeln!(
            out,
            "── {} ({}) {} ──",
            run.run_id,
            run.status,
            run.timestamp.format("%Y-%m-%d %H:%M:%S"),
        );
        let _ = writeln!(out, "> {}", run.user_message);
        for msg in relabel_history(&run.content_parts, &run.agent_map, &run.agent_names) {
            let _ = writeln!(out, "{}", render_message(&msg));
        }
        out.push('\n');
    }
    out
}

fn render_message(msg: &Message) -> String {
    let speaker = match msg.role {
        Role::Tool => "tool",
        _ => msg.name.as_deref().unwrap_or("assistant"),
    };
    let body = match &msg.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.clone()),
                ContentBlock::ToolUse { name, input, .. } => Some(format!("[{name} {input}]")),
                ContentBlock::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" "),
    };
    format!("{speaker}: {body}")
}
