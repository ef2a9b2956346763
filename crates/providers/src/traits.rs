use sy_domain::capability::ModelCapabilities;
use sy_domain::error::Result;
use sy_domain::stream::{BoxStream, ModelChunk};
use sy_domain::tool::{Message, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A backend-agnostic streaming chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send, system prompt first when present.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature (0.0 – 2.0). `None` lets the backend choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the backend choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override. When `None`, the adapter uses its default.
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core adapter trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every model adapter must implement.
///
/// An adapter translates one backend's wire protocol into the canonical
/// [`ModelChunk`] vocabulary. Backend quirks (usage extraction, reasoning
/// blocks, content coercion) stay inside the adapter.
#[async_trait::async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Start a streaming completion.
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<ModelChunk>>>;

    /// The advertised capabilities of this backend/model combination.
    fn capabilities(&self) -> &ModelCapabilities;

    /// The backend selector this adapter was built for.
    fn provider_id(&self) -> &str;

    /// Default model name, for logging.
    fn model(&self) -> &str {
        "default"
    }
}
