use sy_domain::capability::{ModelCapabilities, ToolSupport};
use sy_domain::error::Result;
use sy_domain::stream::{BoxStream, ModelChunk, Usage};
use sy_domain::tool::Role;

use crate::traits::{ChatRequest, ModelAdapter};

/// Replies with the text of the latest user message, word by word.
pub struct EchoAdapter {
    id: String,
    prefix: String,
    capabilities: ModelCapabilities,
}

impl EchoAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prefix: String::new(),
            capabilities: ModelCapabilities {
                supports_tools: ToolSupport::None,
                ..ModelCapabilities::default()
            },
        }
    }

    /// `client_options.prefix` is prepended to every reply.
    pub fn from_options(id: &str, options: &serde_json::Value) -> Self {
        let mut adapter = Self::new(id);
        if let Some(p) = options.get("prefix").and_then(|v| v.as_str()) {
            adapter.prefix = p.to_owned();
        }
        adapter
    }
}

#[async_trait::async_trait]
impl ModelAdapter for EchoAdapter {
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<ModelChunk>>> {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.joined_text())
            .unwrap_or_default();
        let reply = format!("{}{}", self.prefix, last_user);
        let words: Vec<String> = reply.split_inclusive(' ').map(str::to_owned).collect();
        let completion_tokens = words.len() as u32;

        let stream = async_stream::stream! {
            for text in words {
                yield Ok(ModelChunk::Token { text });
            }
            yield Ok(ModelChunk::Done {
                usage: Some(Usage {
                    prompt_tokens: 0,
                    completion_tokens,
                    total_tokens: completion_tokens,
                }),
                finish_reason: Some("stop".into()),
            });
        };
        Ok(Box::pin(stream))
    }

    fn capabilities(&self) -> &ModelCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use sy_domain::tool::Message;

    #[tokio::test]
    async fn echoes_last_user_message() {
        let adapter = EchoAdapter::from_options("echo", &serde_json::json!({ "prefix": "> " }));
        let req = ChatRequest {
            messages: vec![
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("hello there"),
            ],
            ..Default::default()
        };
        let chunks: Vec<ModelChunk> = adapter
            .chat_stream(req)
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        let text: String = chunks
            .iter()
            .filter_map(|c| match c {
                ModelChunk::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "> hello there");
        assert!(matches!(chunks.last(), Some(ModelChunk::Done { .. })));
    }
}
