use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Declarative definition of one graph node.
///
/// Agents are listed in order; when no agent lacks an incoming edge the
/// first listed agent is the sole entry node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    /// Human-readable label used when re-labeling history.
    /// Falls back to `agent_id` if not set.
    #[serde(default)]
    pub name: Option<String>,
    /// Backend selector, resolved through the adapter registry.
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Free-form options handed to the adapter factory.
    #[serde(default = "d_empty_object")]
    pub client_options: serde_json::Value,
    /// Tool names resolved from the tool registry.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Tool allow/deny policy.
    #[serde(default)]
    pub tool_policy: ToolPolicy,
    #[serde(default)]
    pub instructions: Option<String>,
    /// Appended after `instructions`, separated by a blank line.
    #[serde(default)]
    pub additional_instructions: Option<String>,
    /// Context budget in tokens. History is pruned to fit before each call.
    #[serde(default)]
    pub max_context_tokens: Option<usize>,
    #[serde(default)]
    pub limits: AgentLimits,
}

impl AgentConfig {
    pub fn new(agent_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: None,
            provider: provider.into(),
            model: None,
            client_options: d_empty_object(),
            tools: Vec::new(),
            tool_policy: ToolPolicy::default(),
            instructions: None,
            additional_instructions: None,
            max_context_tokens: None,
            limits: AgentLimits::default(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.agent_id)
    }

    /// Combined system instructions, if any.
    pub fn system_prompt(&self) -> Option<String> {
        match (&self.instructions, &self.additional_instructions) {
            (Some(a), Some(b)) => Some(format!("{a}\n\n{b}")),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        }
    }
}

/// Per-branch execution ceilings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentLimits {
    /// Wall-clock timeout per node invocation (milliseconds). 0 = no limit.
    #[serde(default)]
    pub max_duration_ms: u64,
}

/// Tool allow/deny policy, matched by prefix.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPolicy {
    /// Tool name prefixes this agent may use.  `["*"]` or empty = unrestricted.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Tool name prefixes this agent is denied (evaluated before allow).
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    /// Check whether the given tool name is permitted by this policy.
    ///
    /// Matching is **case-insensitive**.  An entry matches the exact name,
    /// a dotted namespace (`code` matches `code.run`), or a trailing-star
    /// prefix (`web_*` matches `web_search`).  Deny always wins over allow.
    pub fn allows(&self, tool_name: &str) -> bool {
        let name = tool_name.to_ascii_lowercase();

        if self.deny.iter().any(|d| entry_matches(d, &name)) {
            return false;
        }
        if self.allow.is_empty() || self.allow.iter().any(|a| a == "*") {
            return true;
        }
        self.allow.iter().any(|a| entry_matches(a, &name))
    }
}

fn entry_matches(entry: &str, name: &str) -> bool {
    let entry = entry.to_ascii_lowercase();
    if entry == "*" || name == entry {
        return true;
    }
    if let Some(prefix) = entry.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    name.starts_with(&format!("{entry}."))
}

// ── serde default helpers ───────────────────────────────────────────

fn d_empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_policy_empty_allows_all() {
        let policy = ToolPolicy::default();
        assert!(policy.allows("execute_code"));
        assert!(policy.allows("web.search"));
        assert!(policy.allows("transfer_to_agent_b"));
    }

    #[test]
    fn tool_policy_allow_restricts() {
        let policy = ToolPolicy {
            allow: vec!["calculator".into(), "web".into()],
            deny: vec![],
        };
        assert!(policy.allows("calculator"));
        assert!(policy.allows("web.search"));
        assert!(policy.allows("web.fetch"));
        assert!(!policy.allows("execute_code"));
        assert!(!policy.allows("webhook"));
    }

    #[test]
    fn tool_policy_trailing_star_is_a_prefix() {
        let policy = ToolPolicy {
            allow: vec!["web_*".into()],
            deny: vec![],
        };
        assert!(policy.allows("web_search"));
        assert!(!policy.allows("calculator"));
    }

    #[test]
    fn tool_policy_deny_takes_precedence() {
        let policy = ToolPolicy {
            allow: vec!["*".into()],
            deny: vec!["execute_code".into()],
        };
        assert!(!policy.allows("execute_code"));
        assert!(policy.allows("web.search"));
    }

    #[test]
    fn tool_policy_deny_star_blocks_all() {
        let policy = ToolPolicy {
            allow: vec!["calculator".into()],
            deny: vec!["*".into()],
        };
        assert!(!policy.allows("calculator"));
        assert!(!policy.allows("web.search"));
    }

    #[test]
    fn tool_policy_case_insensitive() {
        let policy = ToolPolicy {
            allow: vec!["Calculator".into(), "Web".into()],
            deny: vec![],
        };
        assert!(policy.allows("calculator"));
        assert!(policy.allows("CALCULATOR"));
        assert!(policy.allows("Web.Search"));
        assert!(!policy.allows("execute_code"));
    }

    #[test]
    fn system_prompt_joins_instructions() {
        let mut agent = AgentConfig::new("a", "echo");
        assert_eq!(agent.system_prompt(), None);
        agent.instructions = Some("Be brief.".into());
        agent.additional_instructions = Some("Cite sources.".into());
        assert_eq!(agent.system_prompt().as_deref(), Some("Be brief.\n\nCite sources."));
        assert_eq!(agent.display_name(), "a");
    }

    #[test]
    fn agent_limits_default_to_unbounded() {
        assert_eq!(AgentLimits::default().max_duration_ms, 0);
    }
}
