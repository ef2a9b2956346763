use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sy_domain::session::{ArtifactFile, CodeSessionContext};
use sy_domain::tool::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Execution(String),
    #[error("tool '{0}' is not permitted for this agent")]
    Denied(String),
    #[error("cancelled")]
    Cancelled,
}

/// Session metadata reported by a stateful tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub files: Vec<ArtifactFile>,
    /// Anything else the tool wants surfaced, passed through untouched.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
}

impl ToolArtifact {
    pub fn session(session_id: impl Into<String>, files: Vec<ArtifactFile>) -> Self {
        Self { session_id: Some(session_id.into()), files, extra: Value::Null }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parse an artifact forwarded as JSON (e.g. by a backend-executed tool).
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// What a tool returns: content, plus an optional artifact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub artifact: Option<ToolArtifact>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), artifact: None }
    }

    pub fn with_artifact(content: impl Into<String>, artifact: ToolArtifact) -> Self {
        Self { content: content.into(), artifact: Some(artifact) }
    }
}

impl From<String> for ToolOutput {
    fn from(content: String) -> Self {
        Self::text(content)
    }
}

impl From<&str> for ToolOutput {
    fn from(content: &str) -> Self {
        Self::text(content)
    }
}

impl From<(String, ToolArtifact)> for ToolOutput {
    fn from((content, artifact): (String, ToolArtifact)) -> Self {
        Self::with_artifact(content, artifact)
    }
}

/// Per-call context handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub call_id: String,
    pub agent_id: String,
    pub run_id: String,
    /// Current code session for this tool, if one exists.
    pub session: Option<CodeSessionContext>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(call_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            agent_id: agent_id.into(),
            run_id: String::new(),
            session: None,
            cancel: CancellationToken::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Definition advertised to the model. The name is the registry key.
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, ctx: ToolContext, args: Value) -> Result<ToolOutput, ToolError>;

    fn name(&self) -> String {
        self.definition().name
    }
}

/// A tool backed by a synchronous closure.
pub struct FnTool<F> {
    definition: ToolDefinition,
    f: F,
}

impl<F> FnTool<F>
where
    F: Fn(&ToolContext, Value) -> Result<ToolOutput, ToolError> + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            f,
        }
    }
}

#[async_trait::async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(&ToolContext, Value) -> Result<ToolOutput, ToolError> + Send + Sync,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn call(&self, ctx: ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        (self.f)(&ctx, args)
    }

    fn name(&self) -> String {
        self.definition.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_round_trips_through_value() {
        let artifact = ToolArtifact::session(
            "sess_1",
            vec![ArtifactFile { name: "out.csv".into(), id: Some("f1".into()) }],
        );
        let v = artifact.to_value();
        assert_eq!(v["session_id"], "sess_1");
        assert!(v.get("extra").is_none());
        assert_eq!(ToolArtifact::from_value(&v), Some(artifact));
    }

    #[test]
    fn outputs_convert_from_plain_and_pair() {
        let plain: ToolOutput = "42".into();
        assert_eq!(plain.content, "42");
        assert!(plain.artifact.is_none());

        let pair: ToolOutput = ("done".to_string(), ToolArtifact::default()).into();
        assert!(pair.artifact.is_some());
    }

    #[tokio::test]
    async fn fn_tool_invokes_closure() {
        let tool = FnTool::new(
            "double",
            "Doubles n",
            serde_json::json!({ "type": "object" }),
            |_ctx: &ToolContext, args: Value| {
                let n = args["n"]
                    .as_i64()
                    .ok_or_else(|| ToolError::InvalidArguments("n is required".into()))?;
                Ok(ToolOutput::text((n * 2).to_string()))
            },
        );
        assert_eq!(tool.name(), "double");
        let out = tool
            .call(ToolContext::new("c1", "a"), serde_json::json!({ "n": 21 }))
            .await
            .unwrap();
        assert_eq!(out.content, "42");
        let err = tool.call(ToolContext::new("c2", "a"), Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid arguments: n is required");
    }
}
