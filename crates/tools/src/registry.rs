//! Named tool registry.
//!
//! Entries may be *deferred*: callable by name but left out of the
//! definitions advertised to the model. Advertising and lookup both honour
//! an optional [`ToolPolicy`].

use std::collections::BTreeMap;
use std::sync::Arc;

use sy_domain::config::ToolPolicy;
use sy_domain::tool::ToolDefinition;

use crate::tool::Tool;

#[derive(Clone)]
pub struct ToolEntry {
    pub tool: Arc<dyn Tool>,
    pub deferred: bool,
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: BTreeMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in tools.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(crate::builtin::CurrentTime));
        reg
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.insert(tool, false);
    }

    /// Register a tool that is callable but not advertised.
    pub fn register_deferred(&mut self, tool: Arc<dyn Tool>) {
        self.insert(tool, true);
    }

    fn insert(&mut self, tool: Arc<dyn Tool>, deferred: bool) {
        let name = tool.name();
        if self.entries.insert(name.clone(), ToolEntry { tool, deferred }).is_some() {
            tracing::warn!(tool = %name, "tool registered twice, keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entries.get(name).map(|e| e.tool.clone())
    }

    pub fn entry(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    /// Look a tool up, refusing names the policy does not permit.
    pub fn get_permitted(&self, name: &str, policy: Option<&ToolPolicy>) -> Option<Arc<dyn Tool>> {
        if policy.is_some_and(|p| !p.allows(name)) {
            return None;
        }
        self.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_deferred(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| e.deferred)
    }

    /// Definitions to advertise: non-deferred entries the policy permits,
    /// sorted by name.
    pub fn definitions(&self, policy: Option<&ToolPolicy>) -> Vec<ToolDefinition> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.deferred)
            .filter(|(name, _)| policy.map_or(true, |p| p.allows(name)))
            .map(|(_, e)| e.tool.definition())
            .collect()
    }

    /// A registry holding only `names`. Returns the names that were missing.
    pub fn subset(&self, names: &[String]) -> (ToolRegistry, Vec<String>) {
        let mut out = ToolRegistry::new();
        let mut missing = Vec::new();
        for name in names {
            match self.entries.get(name) {
                Some(e) => {
                    out.entries.insert(name.clone(), e.clone());
                }
                None => missing.push(name.clone()),
            }
        }
        (out, missing)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{FnTool, ToolContext, ToolOutput};

    fn tool(name: &str) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(name, "test tool", serde_json::json!({}), |_: &ToolContext, _: serde_json::Value| {
            Ok(ToolOutput::text("ok"))
        }))
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(tool("web_search"));
        reg.register(tool("calculator"));
        reg.register_deferred(tool("execute_code"));
        reg
    }

    #[test]
    fn deferred_tools_are_callable_but_not_advertised() {
        let reg = registry();
        let names: Vec<String> = reg.definitions(None).into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["calculator", "web_search"]);
        assert!(reg.get("execute_code").is_some());
        assert!(reg.is_deferred("execute_code"));
    }

    #[test]
    fn policy_filters_definitions_and_lookup() {
        let reg = registry();
        let policy = ToolPolicy { allow: vec![], deny: vec!["web_*".into()] };
        let names: Vec<String> =
            reg.definitions(Some(&policy)).into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["calculator"]);
        assert!(reg.get_permitted("web_search", Some(&policy)).is_none());
        assert!(reg.get_permitted("calculator", Some(&policy)).is_some());
    }

    #[test]
    fn subset_reports_missing_names() {
        let reg = registry();
        let (sub, missing) = reg.subset(&["calculator".into(), "ghost".into()]);
        assert_eq!(sub.names(), vec!["calculator"]);
        assert_eq!(missing, vec!["ghost"]);
    }

    #[test]
    fn builtins_include_current_time() {
        assert!(ToolRegistry::with_builtins().contains("current_time"));
    }
}
