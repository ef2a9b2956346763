use serde::{Deserialize, Serialize};

/// Model capabilities advertised by every adapter.
/// The engine consults these before each model call, never the provider name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub supports_tools: ToolSupport,
    pub supports_streaming: bool,
    /// The backend rejects assistant tool-use turns that lack a leading
    /// thinking block. History must be rewritten before such a call.
    #[serde(default)]
    pub requires_thinking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: ToolSupport::Basic,
            supports_streaming: true,
            requires_thinking: false,
            context_window_tokens: None,
        }
    }
}

/// Tool support level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSupport {
    /// No tool calling support.
    None,
    /// Basic tool calling (function calling).
    Basic,
    /// Strict JSON schema-validated tool calling.
    StrictJson,
}
