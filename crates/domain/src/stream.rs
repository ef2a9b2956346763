use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Canonical delta emitted by a model adapter (backend-agnostic).
///
/// Every adapter translates its wire protocol into this vocabulary; the
/// engine never sees provider-specific payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModelChunk {
    /// A text token chunk.
    #[serde(rename = "token")]
    Token { text: String },

    /// Reasoning ("thinking") text. The signature, when the backend sends
    /// one, must be replayed verbatim on later turns.
    #[serde(rename = "thinking")]
    Thinking {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// A tool call has started. `call_id` may be absent for backends that
    /// only address tool calls by position.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted {
        index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        tool_name: String,
    },

    /// Incremental tool call argument text.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta {
        index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        delta: String,
    },

    /// Result of a tool the backend executed itself. May be redelivered.
    #[serde(rename = "server_tool_result")]
    ServerToolResult {
        call_id: String,
        tool_name: String,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<serde_json::Value>,
    },

    /// Stream is finished.
    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    /// An error occurred during streaming.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_add_saturates_instead_of_overflowing() {
        let mut total = Usage { prompt_tokens: u32::MAX - 1, completion_tokens: 5, total_tokens: u32::MAX };
        total.add(&Usage { prompt_tokens: 10, completion_tokens: 7, total_tokens: 1 });
        assert_eq!(total.prompt_tokens, u32::MAX);
        assert_eq!(total.completion_tokens, 12);
        assert_eq!(total.total_tokens, u32::MAX);
    }
}
