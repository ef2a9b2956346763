//! Built-in tools available to every configuration.

use serde_json::Value;

use sy_domain::tool::ToolDefinition;

use crate::tool::{Tool, ToolContext, ToolError, ToolOutput};

/// Reports the current UTC time, optionally in a caller-supplied format.
pub struct CurrentTime;

#[async_trait::async_trait]
impl Tool for CurrentTime {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "current_time".into(),
            description: "Current UTC date and time.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "format": {
                        "type": "string",
                        "description": "strftime format, RFC 3339 when omitted"
                    }
                }
            }),
        }
    }

    async fn call(&self, _ctx: ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let now = chrono::Utc::now();
        let text = match args.get("format").and_then(Value::as_str) {
            Some(fmt) if !fmt.is_empty() => {
                let mut out = String::new();
                use std::fmt::Write;
                write!(out, "{}", now.format(fmt))
                    .map_err(|_| ToolError::InvalidArguments(format!("bad format '{fmt}'")))?;
                out
            }
            _ => now.to_rfc3339(),
        };
        Ok(ToolOutput::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn formats_year() {
        let out = CurrentTime
            .call(ToolContext::new("c1", "a"), serde_json::json!({ "format": "%Y" }))
            .await
            .unwrap();
        assert_eq!(out.content.len(), 4);
        assert!(out.content.chars().all(|c| c.is_ascii_digit()));
    }
}
