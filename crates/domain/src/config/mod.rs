mod agents;
mod edges;
mod observability;
mod run;
mod sessions;

pub use agents::*;
pub use edges::*;
pub use observability::*;
pub use run::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Graph nodes, in declaration order.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
}

impl Config {
    pub fn agent(&self, agent_id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Error, field: field.into(), message: message.into() }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Warning, field: field.into(), message: message.into() }
    }

    pub fn is_error(&self) -> bool {
        self.severity == ConfigSeverity::Error
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.run.max_tool_loops == 0 {
            errors.push(ConfigError::error("run.max_tool_loops", "must be greater than 0"));
        }
        if self.run.recursion_limit == 0 {
            errors.push(ConfigError::error("run.recursion_limit", "must be greater than 0"));
        }
        if self.run.event_buffer == 0 {
            errors.push(ConfigError::error("run.event_buffer", "must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::warning(
                "observability.sample_rate",
                "outside 0.0..=1.0, will be clamped",
            ));
        }

        if self.agents.is_empty() {
            errors.push(ConfigError::error("agents", "at least one agent is required"));
        }

        let mut seen = HashSet::new();
        for (i, agent) in self.agents.iter().enumerate() {
            if agent.agent_id.is_empty() {
                errors.push(ConfigError::error(
                    format!("agents[{i}].agent_id"),
                    "agent_id must not be empty",
                ));
            } else if !seen.insert(agent.agent_id.as_str()) {
                errors.push(ConfigError::error(
                    format!("agents[{i}].agent_id"),
                    format!("duplicate agent_id '{}'", agent.agent_id),
                ));
            }
            if agent.provider.is_empty() {
                errors.push(ConfigError::error(
                    format!("agents[{i}].provider"),
                    "provider must not be empty",
                ));
            }
            if agent.max_context_tokens == Some(0) {
                errors.push(ConfigError::error(
                    format!("agents[{i}].max_context_tokens"),
                    "must be greater than 0 when set",
                ));
            }
        }

        for (i, edge) in self.edges.iter().enumerate() {
            self.validate_edge(i, edge, &seen, &mut errors);
        }

        errors
    }

    fn validate_edge(
        &self,
        i: usize,
        edge: &EdgeConfig,
        known: &HashSet<&str>,
        errors: &mut Vec<ConfigError>,
    ) {
        let field = |name: &str| format!("edges[{i}].{name}");

        if edge.from.is_empty() {
            errors.push(ConfigError::error(field("from"), "must name at least one agent"));
        }
        if edge.to.is_empty() {
            errors.push(ConfigError::error(field("to"), "must name at least one agent"));
        }
        for id in edge.from.iter().chain(edge.to.iter()) {
            if !known.contains(id) {
                errors.push(ConfigError::error(
                    field(if edge.from.iter().any(|f| f == id) { "from" } else { "to" }),
                    format!("unknown agent '{id}'"),
                ));
            }
        }

        for from in edge.from.iter() {
            if edge.to.iter().any(|to| to == from) {
                match edge.edge_type {
                    EdgeType::Handoff => errors.push(ConfigError::warning(
                        field("to"),
                        format!("'{from}' hands off to itself"),
                    )),
                    _ => errors.push(ConfigError::error(
                        field("to"),
                        format!("{} edge from '{from}' to itself", edge.edge_type.as_str()),
                    )),
                }
            }
        }

        match (edge.edge_type, &edge.condition) {
            (EdgeType::Conditional, None) => {
                errors.push(ConfigError::error(
                    field("condition"),
                    "conditional edge requires a condition",
                ));
            }
            (EdgeType::Conditional, Some(cond)) => {
                let targets: Vec<&str> = edge.to.iter().collect();
                for (r, rule) in cond.rules.iter().enumerate() {
                    if let Err(e) = regex::Regex::new(&rule.pattern) {
                        errors.push(ConfigError::error(
                            field(&format!("condition.rules[{r}].pattern")),
                            format!("invalid regex: {e}"),
                        ));
                    }
                    if !targets.contains(&rule.to.as_str()) {
                        errors.push(ConfigError::error(
                            field(&format!("condition.rules[{r}].to")),
                            format!("'{}' is not one of the edge's destinations", rule.to),
                        ));
                    }
                }
                if let Some(d) = &cond.default {
                    if !targets.contains(&d.as_str()) {
                        errors.push(ConfigError::error(
                            field("condition.default"),
                            format!("'{d}' is not one of the edge's destinations"),
                        ));
                    }
                }
            }
            (_, Some(_)) => {
                errors.push(ConfigError::warning(
                    field("condition"),
                    "condition is ignored on non-conditional edges",
                ));
            }
            (_, None) => {}
        }

        if edge.edge_type == EdgeType::Handoff
            && (edge.prompt.is_some() || edge.exclude_results)
        {
            errors.push(ConfigError::warning(
                field("prompt"),
                "prompt and exclude_results are ignored on handoff edges",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_agents() -> Config {
        Config {
            agents: vec![AgentConfig::new("a", "echo"), AgentConfig::new("b", "echo")],
            ..Default::default()
        }
    }

    fn errors_only(cfg: &Config) -> Vec<ConfigError> {
        cfg.validate().into_iter().filter(ConfigError::is_error).collect()
    }

    #[test]
    fn minimal_graph_is_valid() {
        let mut cfg = two_agents();
        cfg.edges.push(EdgeConfig::direct("a", "b"));
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
    }

    #[test]
    fn empty_agent_list_is_an_error() {
        let errs = errors_only(&Config::default());
        assert!(errs.iter().any(|e| e.field == "agents"));
    }

    #[test]
    fn duplicate_agent_ids_are_rejected() {
        let mut cfg = two_agents();
        cfg.agents.push(AgentConfig::new("a", "echo"));
        let errs = errors_only(&cfg);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("duplicate"));
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let mut cfg = two_agents();
        cfg.edges.push(EdgeConfig::handoff("a", "ghost"));
        let errs = errors_only(&cfg);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].field, "edges[0].to");
    }

    #[test]
    fn self_loops_depend_on_edge_type() {
        let mut cfg = two_agents();
        cfg.edges.push(EdgeConfig::handoff("a", "a"));
        let issues = cfg.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Warning);

        cfg.edges = vec![EdgeConfig::direct("b", "b")];
        assert_eq!(errors_only(&cfg).len(), 1);
    }

    #[test]
    fn conditional_edge_requires_valid_condition() {
        let mut cfg = two_agents();
        cfg.agents.push(AgentConfig::new("c", "echo"));
        let mut edge = EdgeConfig::new("a", vec!["b", "c"], EdgeType::Conditional);
        cfg.edges.push(edge.clone());
        assert!(errors_only(&cfg).iter().any(|e| e.field == "edges[0].condition"));

        edge.condition = Some(ConditionConfig {
            rules: vec![
                ConditionRule { pattern: "(".into(), to: "b".into() },
                ConditionRule { pattern: "x".into(), to: "z".into() },
            ],
            default: Some("c".into()),
        });
        cfg.edges = vec![edge];
        let errs = errors_only(&cfg);
        assert_eq!(errs.len(), 2, "{errs:?}");
    }

    #[test]
    fn zero_run_limits_are_rejected() {
        let mut cfg = two_agents();
        cfg.run.max_tool_loops = 0;
        cfg.run.event_buffer = 0;
        assert_eq!(errors_only(&cfg).len(), 2);
    }

    #[test]
    fn display_tags_severity() {
        let e = ConfigError::warning("edges[0].to", "hands off to itself");
        assert_eq!(e.to_string(), "[WARN] edges[0].to: hands off to itself");
    }
}
