//! History re-labeling.
//!
//! Turns a stored run (content parts + part → agent map) back into message
//! history for the next run. Parts are grouped into per-agent segments, and
//! each segment becomes assistant / tool messages named after its agent.

use std::collections::BTreeMap;

use sy_domain::content::ContentPart;
use sy_domain::tool::{ContentBlock, Message, MessageContent};
use sy_sessions::StoredRun;

/// Agent id used for leading parts with no attribution.
pub const UNKNOWN_AGENT: &str = "unknown";

/// Consecutive parts produced by one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSegment {
    pub agent_id: String,
    /// Display name, from the name table or the agent id.
    pub label: String,
    pub parts: Vec<ContentPart>,
}

/// Group parts into runs of the same agent.
///
/// A part missing from `agent_map` belongs to the preceding agent.
pub fn label_content_by_agent(
    parts: &[ContentPart],
    agent_map: &BTreeMap<usize, String>,
    names: &BTreeMap<String, String>,
) -> Vec<AgentSegment> {
    let mut segments: Vec<AgentSegment> = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        let agent_id = match agent_map.get(&i) {
            Some(id) => id.as_str(),
            None => segments.last().map_or(UNKNOWN_AGENT, |s| s.agent_id.as_str()),
        }
        .to_owned();

        match segments.last_mut() {
            Some(seg) if seg.agent_id == agent_id => seg.parts.push(part.clone()),
            _ => {
                let label = names.get(&agent_id).cloned().unwrap_or_else(|| agent_id.clone());
                segments.push(AgentSegment {
                    agent_id,
                    label,
                    parts: vec![part.clone()],
                });
            }
        }
    }
    segments
}

/// Rebuild message boundaries from segments.
///
/// Within a segment, text and tool calls accumulate into one assistant
/// message; every tool call that has an output is followed by its tool
/// result, and text after a result starts a new assistant message. Tool
/// calls without an output and reasoning parts are not replayed.
pub fn format_agent_messages(segments: &[AgentSegment]) -> Vec<Message> {
    let mut out = Vec::new();
    for seg in segments {
        let mut blocks: Vec<ContentBlock> = Vec::new();
        let mut results: Vec<Message> = Vec::new();

        for part in &seg.parts {
            match part {
                ContentPart::Text { text } => {
                    if !results.is_empty() {
                        flush(&mut out, &seg.label, &mut blocks, &mut results);
                    }
                    if !text.is_empty() {
                        blocks.push(ContentBlock::Text { text: text.clone() });
                    }
                }
                ContentPart::ToolCall { tool_call } => {
                    let Some(output) = &tool_call.output else {
                        tracing::debug!(call_id = %tool_call.id, "dropping unfinished tool call from history");
                        continue;
                    };
                    let input = serde_json::from_str(&tool_call.args)
                        .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
                    blocks.push(ContentBlock::ToolUse {
                        id: tool_call.id.clone(),
                        name: tool_call.name.clone(),
                        input,
                    });
                    results.push(Message::tool_result(
                        tool_call.id.clone(),
                        output.clone(),
                        tool_call.is_error,
                    ));
                }
                ContentPart::Think { .. } | ContentPart::Other { .. } => {}
            }
        }
        flush(&mut out, &seg.label, &mut blocks, &mut results);
    }
    out
}

/// `format_agent_messages(label_content_by_agent(..))`.
pub fn relabel_history(
    parts: &[ContentPart],
    agent_map: &BTreeMap<usize, String>,
    names: &BTreeMap<String, String>,
) -> Vec<Message> {
    format_agent_messages(&label_content_by_agent(parts, agent_map, names))
}

/// Message history for resuming a thread: each stored run contributes its
/// user message followed by its re-labeled content.
pub fn thread_history(runs: &[StoredRun]) -> Vec<Message> {
    let mut out = Vec::new();
    for run in runs {
        out.push(Message::user(run.user_message.clone()));
        out.extend(relabel_history(&run.content_parts, &run.agent_map, &run.agent_names));
    }
    out
}

fn flush(
    out: &mut Vec<Message>,
    label: &str,
    blocks: &mut Vec<ContentBlock>,
    results: &mut Vec<Message>,
) {
    if blocks.is_empty() {
        return;
    }
    let blocks = std::mem::take(blocks);
    let msg = match blocks.as_slice() {
        [ContentBlock::Text { text }] => Message::assistant(text.clone()),
        _ => Message {
            content: MessageContent::Blocks(blocks),
            ..Message::assistant("")
        },
    };
    out.push(msg.named(label));
    out.append(results);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sy_domain::content::ToolCallPart;
    use sy_domain::tool::Role;

    fn tool(id: &str, output: Option<&str>) -> ContentPart {
        let mut call = ToolCallPart::new(id, "search");
        call.args = "{\"q\":\"x\"}".into();
        call.output = output.map(str::to_owned);
        ContentPart::ToolCall { tool_call: call }
    }

    fn map(entries: &[(usize, &str)]) -> BTreeMap<usize, String> {
        entries.iter().map(|(i, a)| (*i, a.to_string())).collect()
    }

    #[test]
    fn segments_follow_attribution() {
        let parts = vec![
            ContentPart::text("a1"),
            ContentPart::text("a2"),
            ContentPart::text("b1"),
        ];
        let names: BTreeMap<String, String> = [("agent_b".to_string(), "Bee".to_string())].into();
        let segs = label_content_by_agent(&parts, &map(&[(0, "agent_a"), (2, "agent_b")]), &names);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].agent_id, "agent_a");
        assert_eq!(segs[0].label, "agent_a");
        assert_eq!(segs[0].parts.len(), 2);
        assert_eq!(segs[1].label, "Bee");
    }

    #[test]
    fn leading_unmapped_parts_are_unknown() {
        let parts = vec![ContentPart::text("?"), ContentPart::text("a")];
        let segs = label_content_by_agent(&parts, &map(&[(1, "agent_a")]), &BTreeMap::new());
        assert_eq!(segs[0].agent_id, UNKNOWN_AGENT);
        assert_eq!(segs[1].agent_id, "agent_a");
    }

    #[test]
    fn tool_calls_split_assistant_messages() {
        let parts = vec![
            ContentPart::text("Looking."),
            tool("c1", Some("found")),
            tool("c2", Some("also")),
            ContentPart::text("Done."),
        ];
        let msgs = relabel_history(&parts, &map(&[(0, "agent_a")]), &BTreeMap::new());

        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, Role::Assistant);
        assert_eq!(msgs[0].tool_uses().len(), 2);
        assert_eq!(msgs[0].content.joined_text(), "Looking.");
        assert_eq!(msgs[1].role, Role::Tool);
        assert_eq!(msgs[2].role, Role::Tool);
        assert_eq!(msgs[3].content, MessageContent::Text("Done.".into()));
        assert!(msgs
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .all(|m| m.name.as_deref() == Some("agent_a")));
    }

    #[test]
    fn unfinished_tool_calls_and_reasoning_are_dropped() {
        let parts = vec![ContentPart::think("hmm"), tool("c1", None), ContentPart::text("ok")];
        let msgs = relabel_history(&parts, &map(&[(0, "a")]), &BTreeMap::new());
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, MessageContent::Text("ok".into()));
    }

    #[test]
    fn thread_history_interleaves_user_turns() {
        let run = |user: &str, text: &str| StoredRun {
            run_id: "run_1".into(),
            thread_id: "thread_1".into(),
            timestamp: chrono::Utc::now(),
            status: "completed".into(),
            user_message: user.into(),
            content_parts: vec![ContentPart::text(text)],
            agent_map: map(&[(0, "agent_a")]),
            agent_names: [("agent_a".to_string(), "Alpha".to_string())].into(),
            code_sessions: Default::default(),
        };
        let msgs = thread_history(&[run("hi", "hello"), run("again", "back")]);
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].name.as_deref(), Some("Alpha"));
        assert_eq!(msgs[2].content, MessageContent::Text("again".into()));
    }

    #[test]
    fn agents_never_share_a_message() {
        let parts = vec![ContentPart::text("from a"), ContentPart::text("from b")];
        let msgs = relabel_history(&parts, &map(&[(0, "a"), (1, "b")]), &BTreeMap::new());
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].name.as_deref(), Some("a"));
        assert_eq!(msgs[1].name.as_deref(), Some("b"));
    }
}
