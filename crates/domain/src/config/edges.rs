use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Graph edges
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single agent id or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            OneOrMany::One(s) => std::slice::from_ref(s),
            OneOrMany::Many(v) => v,
        };
        slice.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            OneOrMany::One(s) => s.is_empty(),
            OneOrMany::Many(v) => v.is_empty(),
        }
    }
}

impl From<&str> for OneOrMany {
    fn from(s: &str) -> Self {
        OneOrMany::One(s.to_owned())
    }
}

impl From<Vec<&str>> for OneOrMany {
    fn from(v: Vec<&str>) -> Self {
        OneOrMany::Many(v.into_iter().map(str::to_owned).collect())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// Automatic transition once the source completes.
    Direct,
    /// Tool-mediated transfer (`transfer_to_<agent>`).
    #[default]
    Handoff,
    /// Destination chosen by evaluating a condition over the source's output.
    Conditional,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Direct => "direct",
            EdgeType::Handoff => "handoff",
            EdgeType::Conditional => "conditional",
        }
    }
}

/// Declarative routing condition: the first rule whose pattern matches the
/// source's final output text selects the destination.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConditionConfig {
    #[serde(default)]
    pub rules: Vec<ConditionRule>,
    /// Destination when no rule matches. None = stop the branch.
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRule {
    /// Regular expression tested against the output text.
    pub pattern: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub from: OneOrMany,
    pub to: OneOrMany,
    #[serde(default)]
    pub edge_type: EdgeType,
    /// Shown to the model as the handoff tool description.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub condition: Option<ConditionConfig>,
    /// Template with `{results}` and `{convo}` placeholders.
    #[serde(default)]
    pub prompt: Option<String>,
    /// `messages` (default) appends the prompt as a user message; any other
    /// key appends it to the destination's instructions.
    #[serde(default)]
    pub prompt_key: Option<String>,
    /// Forward only the derived prompt, not the source's output.
    #[serde(default)]
    pub exclude_results: bool,
}

impl EdgeConfig {
    pub fn new(from: impl Into<OneOrMany>, to: impl Into<OneOrMany>, edge_type: EdgeType) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            edge_type,
            description: None,
            condition: None,
            prompt: None,
            prompt_key: None,
            exclude_results: false,
        }
    }

    pub fn direct(from: impl Into<OneOrMany>, to: impl Into<OneOrMany>) -> Self {
        Self::new(from, to, EdgeType::Direct)
    }

    pub fn handoff(from: impl Into<OneOrMany>, to: impl Into<OneOrMany>) -> Self {
        Self::new(from, to, EdgeType::Handoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_accepts_string_or_list() {
        let one: EdgeConfig = toml::from_str(
            r#"
            from = "a"
            to = "b"
            "#,
        )
        .unwrap();
        assert_eq!(one.to.to_vec(), vec!["b"]);
        assert_eq!(one.edge_type, EdgeType::Handoff);

        let many: EdgeConfig = toml::from_str(
            r#"
            from = ["a", "b"]
            to = ["c", "d"]
            edge_type = "direct"
            exclude_results = true
            "#,
        )
        .unwrap();
        assert_eq!(many.from.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(many.to.to_vec(), vec!["c", "d"]);
        assert_eq!(many.edge_type, EdgeType::Direct);
        assert!(many.exclude_results);
    }

    #[test]
    fn conditional_edge_parses_rules() {
        let edge: EdgeConfig = serde_yaml::from_str(
            r#"
from: router
to: [math, prose]
edge_type: conditional
condition:
  rules:
    - pattern: "\\d+"
      to: math
  default: prose
"#,
        )
        .unwrap();
        let cond = edge.condition.unwrap();
        assert_eq!(cond.rules.len(), 1);
        assert_eq!(cond.rules[0].to, "math");
        assert_eq!(cond.default.as_deref(), Some("prose"));
    }
}
