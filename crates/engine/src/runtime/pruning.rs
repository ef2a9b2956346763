//! Context budget pruning: fit a branch's history into an agent's
//! `max_context_tokens` before each model call.
//!
//! - Budget is estimated at 4 chars per token
//! - Tool results of the last 2 assistant turns are protected from trimming
//! - Oversized older tool results are soft-trimmed (head + tail)
//! - If still over budget, the oldest turns are dropped whole: an assistant
//!   turn goes together with its tool results, so no result is orphaned
//! - Leading system messages and the most recent turn are always kept

use sy_domain::tool::{ContentBlock, Message, MessageContent, Role};

pub const CHARS_PER_TOKEN: usize = 4;
const KEEP_LAST_ASSISTANTS: usize = 2;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub dropped_messages: usize,
    pub trimmed_results: usize,
}

impl PruneStats {
    pub fn is_noop(&self) -> bool {
        self.dropped_messages == 0 && self.trimmed_results == 0
    }
}

/// Prune `messages` to roughly `max_tokens`, returning a new copy.
pub fn prune_to_budget(messages: &[Message], max_tokens: usize) -> (Vec<Message>, PruneStats) {
    let budget = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut stats = PruneStats::default();
    if total_chars(messages) <= budget {
        return (messages.to_vec(), stats);
    }

    // Pass 1: soft-trim unprotected tool results.
    let cutoff = find_protection_cutoff(messages, KEEP_LAST_ASSISTANTS);
    let soft_threshold = (budget * 3 / 10).max(1);
    let keep = (soft_threshold / 3).max(1);
    let mut out: Vec<Message> = messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            if msg.role != Role::Tool || i >= cutoff {
                return msg.clone();
            }
            let (trimmed, n) = trim_tool_message(msg, soft_threshold, keep);
            stats.trimmed_results += n;
            trimmed
        })
        .collect();

    // Pass 2: drop the oldest turn groups.
    let pinned = out.iter().take_while(|m| m.role == Role::System).count();
    while total_chars(&out) > budget {
        let groups = turn_groups(&out[pinned..]);
        if groups.len() <= 1 {
            break;
        }
        let len = groups[0];
        out.drain(pinned..pinned + len);
        stats.dropped_messages += len;
    }

    (out, stats)
}

fn total_chars(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum()
}

/// Index before which tool results may be trimmed.
fn find_protection_cutoff(messages: &[Message], keep_last_assistants: usize) -> usize {
    let mut assistant_count = 0;
    for (i, msg) in messages.iter().enumerate().rev() {
        if msg.role == Role::Assistant {
            assistant_count += 1;
            if assistant_count >= keep_last_assistants {
                return i;
            }
        }
    }
    // Fewer turns than the protection window: every result is recent.
    0
}

/// Lengths of consecutive turn groups. An assistant message owns the tool
/// messages that follow it.
fn turn_groups(messages: &[Message]) -> Vec<usize> {
    let mut groups: Vec<usize> = Vec::new();
    for msg in messages {
        match (msg.role, groups.last_mut()) {
            (Role::Tool, Some(last)) => *last += 1,
            _ => groups.push(1),
        }
    }
    groups
}

fn trim_tool_message(msg: &Message, threshold: usize, keep: usize) -> (Message, usize) {
    let mut trimmed = 0;
    let content = match &msg.content {
        MessageContent::Text(text) => {
            MessageContent::Text(trim_text(text, threshold, keep, &mut trimmed))
        }
        MessageContent::Blocks(blocks) => MessageContent::Blocks(
            blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                        ContentBlock::ToolResult {
                            tool_use_id: tool_use_id.clone(),
                            content: trim_text(content, threshold, keep, &mut trimmed),
                            is_error: *is_error,
                        }
                    }
                    other => other.clone(),
                })
                .collect(),
        ),
    };
    (Message { role: msg.role, content, name: msg.name.clone() }, trimmed)
}

fn trim_text(text: &str, threshold: usize, keep: usize, trimmed: &mut usize) -> String {
    let len = text.len();
    if len < threshold || keep * 2 >= len {
        return text.to_owned();
    }
    *trimmed += 1;
    let head = floor_boundary(text, keep);
    let tail = ceil_boundary(text, len - keep);
    format!(
        "{}\n\n... [{} chars trimmed] ...\n\n{}\n(original size: {len} chars)",
        &text[..head],
        tail - head,
        &text[tail..]
    )
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant_call(id: &str) -> Message {
        Message::assistant_blocks(vec![ContentBlock::ToolUse {
            id: id.into(),
            name: "search".into(),
            input: serde_json::json!({}),
        }])
    }

    fn result_text(msg: &Message) -> &str {
        match &msg.content {
            MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolResult { content, .. } => content.as_str(),
                _ => "",
            },
            MessageContent::Text(t) => t.as_str(),
        }
    }

    #[test]
    fn under_budget_is_untouched() {
        let messages = vec![Message::user("hello"), Message::assistant("hi")];
        let (out, stats) = prune_to_budget(&messages, 100);
        assert_eq!(out, messages);
        assert!(stats.is_noop());
    }

    #[test]
    fn old_tool_results_are_trimmed_recent_ones_protected() {
        let big = "x".repeat(600);
        let messages = vec![
            Message::user("q1"),
            assistant_call("c1"),
            Message::tool_result("c1", &big, false),
            assistant_call("c2"),
            Message::tool_result("c2", &big, false),
            assistant_call("c3"),
            Message::tool_result("c3", &big, false),
        ];
        // 1800 chars: trimming the oldest result alone is enough.
        let (out, stats) = prune_to_budget(&messages, 450);
        assert_eq!(out.len(), 7);
        assert_eq!(stats.trimmed_results, 1);
        assert!(result_text(&out[2]).contains("chars trimmed"));
        assert_eq!(result_text(&out[4]), big);
        assert_eq!(result_text(&out[6]), big);
    }

    #[test]
    fn oldest_turns_are_dropped_with_their_results() {
        let big = "y".repeat(2000);
        let messages = vec![
            Message::system("be brief"),
            Message::user("first"),
            assistant_call("c1"),
            Message::tool_result("c1", &big, false),
            Message::user("second"),
            Message::assistant("done"),
        ];
        let (out, stats) = prune_to_budget(&messages, 10);
        assert_eq!(out[0].role, Role::System);
        assert!(stats.dropped_messages >= 3);
        // No tool result survives without its assistant turn.
        for (i, m) in out.iter().enumerate() {
            if m.role == Role::Tool {
                assert_eq!(out[i - 1].role, Role::Assistant);
            }
        }
        assert_eq!(out.last().unwrap().content.joined_text(), "done");
    }

    #[test]
    fn trim_respects_char_boundaries() {
        let text = "é".repeat(300);
        let mut n = 0;
        let out = trim_text(&text, 100, 33, &mut n);
        assert_eq!(n, 1);
        assert!(out.contains("chars trimmed"));
    }

    #[test]
    fn groups_attach_tool_results_to_their_assistant() {
        let messages = vec![
            Message::user("u"),
            assistant_call("c"),
            Message::tool_result("c", "r", false),
            Message::tool_result("c2", "r", false),
            Message::user("u2"),
        ];
        assert_eq!(turn_groups(&messages), vec![1, 3, 1]);
    }
}
