//! Reasoning-block continuity across providers.
//!
//! Some backends reject history containing an assistant tool-use turn that
//! does not start with a reasoning block. When such an agent receives
//! history produced by a backend without that requirement, every offending
//! turn is collapsed, together with its tool results, into a plain user
//! message holding a text rendering of the exchange.

use std::collections::HashMap;

use sy_domain::tool::{ContentBlock, Message, MessageContent, Role};

pub const CONTEXT_HEADER: &str = "[Previous agent context]";

/// Rewrite tool-use turns that lack a reasoning block.
///
/// Returns the new history and the number of collapsed turns.
pub fn ensure_thinking_continuity(messages: &[Message]) -> (Vec<Message>, usize) {
    let mut out = Vec::with_capacity(messages.len());
    let mut collapsed = 0;
    let mut i = 0;

    while i < messages.len() {
        let msg = &messages[i];
        let uses = msg.tool_uses();
        if msg.role != Role::Assistant || uses.is_empty() || msg.has_thinking() {
            out.push(msg.clone());
            i += 1;
            continue;
        }

        let ids: Vec<&str> = uses.iter().map(|(id, _, _)| *id).collect();
        let mut end = i + 1;
        while end < messages.len() && answers_any(&messages[end], &ids) {
            end += 1;
        }

        out.push(Message::user(format!(
            "{CONTEXT_HEADER}\n{}",
            buffer_string(&messages[i..end])
        )));
        collapsed += 1;
        i = end;
    }

    (out, collapsed)
}

/// Render messages as a readable transcript.
pub fn buffer_string(messages: &[Message]) -> String {
    let mut names: HashMap<&str, &str> = HashMap::new();
    let mut lines = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => lines.push(format!("System: {}", msg.content.joined_text())),
            Role::User => lines.push(format!("Human: {}", msg.content.joined_text())),
            Role::Assistant => {
                let label = match &msg.name {
                    Some(name) => format!("AI ({name})"),
                    None => "AI".to_owned(),
                };
                let text = msg.content.joined_text();
                if !text.is_empty() {
                    lines.push(format!("{label}: {text}"));
                }
                for (id, name, input) in msg.tool_uses() {
                    names.insert(id, name);
                    lines.push(format!("{label} called tool {name} with {input}"));
                }
            }
            Role::Tool => {
                if let MessageContent::Blocks(blocks) = &msg.content {
                    for block in blocks {
                        if let ContentBlock::ToolResult { tool_use_id, content, is_error } = block {
                            let name = names.get(tool_use_id.as_str()).copied().unwrap_or("tool");
                            let tag = if *is_error { " (error)" } else { "" };
                            lines.push(format!("Tool {name}{tag}: {content}"));
                        }
                    }
                } else {
                    lines.push(format!("Tool: {}", msg.content.joined_text()));
                }
            }
        }
    }
    lines.join("\n")
}

fn answers_any(msg: &Message, ids: &[&str]) -> bool {
    if msg.role != Role::Tool {
        return false;
    }
    match &msg.content {
        MessageContent::Blocks(blocks) => blocks.iter().any(|b| {
            matches!(b, ContentBlock::ToolResult { tool_use_id, .. } if ids.contains(&tool_use_id.as_str()))
        }),
        MessageContent::Text(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_turn(id: &str, thinking: bool) -> Message {
        let mut blocks = Vec::new();
        if thinking {
            blocks.push(ContentBlock::Thinking {
                thinking: "hmm".into(),
                signature: Some("sig".into()),
            });
        }
        blocks.push(ContentBlock::Text { text: "Let me check.".into() });
        blocks.push(ContentBlock::ToolUse {
            id: id.into(),
            name: "search".into(),
            input: json!({"q": "rust"}),
        });
        Message::assistant_blocks(blocks).named("agent_a")
    }

    #[test]
    fn collapses_tool_turn_without_thinking() {
        let history = vec![
            Message::user("find rust"),
            tool_turn("c1", false),
            Message::tool_result("c1", "rust-lang.org", false),
            Message::assistant("Found it.").named("agent_a"),
        ];
        let (out, collapsed) = ensure_thinking_continuity(&history);

        assert_eq!(collapsed, 1);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].role, Role::User);
        let text = out[1].content.joined_text();
        assert!(text.starts_with(CONTEXT_HEADER));
        assert!(text.contains("AI (agent_a): Let me check."));
        assert!(text.contains("called tool search with {\"q\":\"rust\"}"));
        assert!(text.contains("Tool search: rust-lang.org"));
        // Text-only assistant turns are kept as they are.
        assert_eq!(out[2], history[3]);
    }

    #[test]
    fn turns_with_thinking_are_preserved() {
        let history = vec![
            Message::user("q"),
            tool_turn("c1", true),
            Message::tool_result("c1", "r", false),
        ];
        let (out, collapsed) = ensure_thinking_continuity(&history);
        assert_eq!(collapsed, 0);
        assert_eq!(out, history);
    }

    #[test]
    fn consecutive_offending_turns_collapse_separately() {
        let history = vec![
            tool_turn("c1", false),
            Message::tool_result("c1", "r1", true),
            tool_turn("c2", false),
            Message::tool_result("c2", "r2", false),
        ];
        let (out, collapsed) = ensure_thinking_continuity(&history);
        assert_eq!(collapsed, 2);
        assert_eq!(out.len(), 2);
        assert!(out[0].content.joined_text().contains("Tool search (error): r1"));
        assert!(out.iter().all(|m| m.role == Role::User));
    }
}
