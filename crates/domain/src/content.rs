//! Aggregated run output.
//!
//! A run's visible output is an ordered list of [`ContentPart`]s. Each part
//! is owned by exactly one agent; the owning agent is recorded in a separate
//! index-to-agent map so parts stay small and serializable.

use serde::{Deserialize, Serialize};

/// One unit of aggregated output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Think { think: String },
    ToolCall { tool_call: ToolCallPart },
    /// Content types the engine does not interpret; passed through as-is.
    Other { value: serde_json::Value },
}

/// A tool call as it appears in aggregated output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub id: String,
    pub name: String,
    /// Raw argument text as streamed. May be partial until the call completes.
    pub args: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    /// 0.0 while arguments stream, 1.0 once the result is attached.
    #[serde(default)]
    pub progress: f32,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn think(think: impl Into<String>) -> Self {
        ContentPart::Think { think: think.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            ContentPart::ToolCall { tool_call } => Some(tool_call),
            _ => None,
        }
    }

    /// Short kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ContentPart::Text { .. } => "text",
            ContentPart::Think { .. } => "think",
            ContentPart::ToolCall { .. } => "tool_call",
            ContentPart::Other { .. } => "other",
        }
    }
}

impl ToolCallPart {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args: String::new(),
            output: None,
            is_error: false,
            progress: 0.0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.output.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_serialize_with_type_tag() {
        let v = serde_json::to_value(ContentPart::think("plan")).unwrap();
        assert_eq!(v["type"], "think");
        assert_eq!(v["think"], "plan");

        let mut call = ToolCallPart::new("call_1", "search");
        call.output = Some("ok".into());
        let v = serde_json::to_value(ContentPart::ToolCall { tool_call: call }).unwrap();
        assert_eq!(v["type"], "tool_call");
        assert_eq!(v["tool_call"]["id"], "call_1");
        assert_eq!(v["tool_call"]["output"], "ok");
    }

    #[test]
    fn tool_call_part_completes_on_output() {
        let mut call = ToolCallPart::new("call_1", "search");
        assert!(!call.is_complete());
        call.output = Some(String::new());
        assert!(call.is_complete());
    }
}
