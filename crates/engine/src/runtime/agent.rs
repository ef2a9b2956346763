//! Per-agent runtime context.
//!
//! An `AgentContext` is built once per graph from an [`AgentConfig`]: the
//! model adapter resolved through the adapter registry, the bound tool set
//! resolved through the tool registry, and the handoff tools synthesized
//! from the agent's outgoing handoff edges.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sy_domain::config::{AgentConfig, ToolPolicy};
use sy_domain::tool::ToolDefinition;
use sy_providers::ModelAdapter;
use sy_tools::ToolRegistry;

/// Prefix of every synthesized handoff tool.
pub const TRANSFER_PREFIX: &str = "transfer_to_";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handoff tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A `transfer_to_<agent>` tool offered to the source of a handoff edge.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffTool {
    pub name: String,
    pub target: String,
    pub description: String,
}

impl HandoffTool {
    pub fn new(target: &str, target_label: &str, description: Option<&str>) -> Self {
        Self {
            name: Self::tool_name(target),
            target: target.to_owned(),
            description: description
                .map(str::to_owned)
                .unwrap_or_else(|| format!("Transfer control to {target_label}.")),
        }
    }

    pub fn tool_name(target: &str) -> String {
        format!("{TRANSFER_PREFIX}{target}")
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "instructions": {
                        "type": "string",
                        "description": "Optional instructions for the agent taking over."
                    }
                }
            }),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct AgentContext {
    pub agent_id: String,
    /// Label used for message names and history re-labeling.
    pub name: String,
    pub adapter: Arc<dyn ModelAdapter>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    /// Tools bound from the agent's `tools` list.
    pub tools: ToolRegistry,
    pub tool_policy: ToolPolicy,
    pub handoffs: Vec<HandoffTool>,
    pub max_context_tokens: Option<usize>,
    pub max_duration: Option<Duration>,
}

impl AgentContext {
    pub fn new(config: &AgentConfig, adapter: Arc<dyn ModelAdapter>, tools: ToolRegistry) -> Self {
        Self {
            agent_id: config.agent_id.clone(),
            name: config.display_name().to_owned(),
            adapter,
            model: config.model.clone(),
            system_prompt: config.system_prompt(),
            tools,
            tool_policy: config.tool_policy.clone(),
            handoffs: Vec::new(),
            max_context_tokens: config.max_context_tokens,
            max_duration: (config.limits.max_duration_ms > 0)
                .then(|| Duration::from_millis(config.limits.max_duration_ms)),
        }
    }

    /// Add a handoff tool, ignoring a second tool for the same target.
    pub fn add_handoff(&mut self, tool: HandoffTool) -> bool {
        if self.handoffs.iter().any(|h| h.name == tool.name) {
            return false;
        }
        self.handoffs.push(tool);
        true
    }

    /// Definitions advertised to the model: permitted, non-deferred bound
    /// tools followed by the handoff tools.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.tools.definitions(Some(&self.tool_policy));
        defs.extend(self.handoffs.iter().map(HandoffTool::definition));
        defs
    }

    /// The target agent if `tool_name` is one of this agent's handoff tools.
    pub fn handoff_target(&self, tool_name: &str) -> Option<&str> {
        self.handoffs
            .iter()
            .find(|h| h.name == tool_name)
            .map(|h| h.target.as_str())
    }

    /// Whether this agent's backend rejects tool-use turns lacking a
    /// reasoning block.
    pub fn requires_thinking(&self) -> bool {
        self.adapter.capabilities().requires_thinking
    }

    pub fn provider_id(&self) -> &str {
        self.adapter.provider_id()
    }

    /// Model name reported in events: the configured one, else the adapter's.
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or_else(|| self.adapter.model())
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("agent_id", &self.agent_id)
            .field("provider", &self.adapter.provider_id())
            .field("tools", &self.tools.names())
            .field("handoffs", &self.handoffs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sy_providers::ScriptedAdapter;

    fn agent(config: AgentConfig) -> AgentContext {
        AgentContext::new(&config, Arc::new(ScriptedAdapter::new("s")), ToolRegistry::with_builtins())
    }

    #[test]
    fn handoff_tools_are_advertised_after_bound_tools() {
        let mut ctx = agent(AgentConfig::new("a", "scripted"));
        assert!(ctx.add_handoff(HandoffTool::new("b", "Bee", None)));
        assert!(!ctx.add_handoff(HandoffTool::new("b", "Bee", Some("dup"))));

        let names: Vec<String> = ctx.tool_definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["current_time", "transfer_to_b"]);
        assert_eq!(ctx.handoff_target("transfer_to_b"), Some("b"));
        assert_eq!(ctx.handoff_target("current_time"), None);
        assert_eq!(ctx.handoffs[0].description, "Transfer control to Bee.");
    }

    #[test]
    fn policy_filters_advertised_tools() {
        let mut config = AgentConfig::new("a", "scripted");
        config.tool_policy.deny = vec!["current_*".into()];
        let ctx = agent(config);
        assert!(ctx.tool_definitions().is_empty());
    }

    #[test]
    fn limits_and_names_come_from_config() {
        let mut config = AgentConfig::new("a", "scripted");
        config.name = Some("Alpha".into());
        config.limits.max_duration_ms = 250;
        let ctx = agent(config);
        assert_eq!(ctx.name, "Alpha");
        assert_eq!(ctx.max_duration, Some(Duration::from_millis(250)));
        assert_eq!(ctx.model_name(), "scripted");
        assert!(!ctx.requires_thinking());
    }
}
