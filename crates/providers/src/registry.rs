//! Adapter registry.
//!
//! Maps a backend selector (the `provider` field of an agent definition) to a
//! factory that builds a [`ModelAdapter`] for that agent. The registry is
//! built once at startup and consulted while the graph is built, so an
//! unknown selector fails the run before any model is called.

use crate::echo::EchoAdapter;
use crate::scripted::ScriptedAdapter;
use crate::traits::ModelAdapter;
use std::collections::HashMap;
use std::sync::Arc;
use sy_domain::config::AgentConfig;
use sy_domain::error::{Error, Result};

/// What a factory receives to build one agent's adapter.
#[derive(Debug, Clone)]
pub struct AdapterSpec {
    pub agent_id: String,
    pub provider: String,
    pub model: Option<String>,
    pub client_options: serde_json::Value,
}

impl From<&AgentConfig> for AdapterSpec {
    fn from(agent: &AgentConfig) -> Self {
        Self {
            agent_id: agent.agent_id.clone(),
            provider: agent.provider.clone(),
            model: agent.model.clone(),
            client_options: agent.client_options.clone(),
        }
    }
}

pub type AdapterFactory = Arc<dyn Fn(&AdapterSpec) -> Result<Arc<dyn ModelAdapter>> + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AdapterRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `echo` and `scripted` backends.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("echo", |spec| {
            Ok(Arc::new(EchoAdapter::from_options(&spec.agent_id, &spec.client_options))
                as Arc<dyn ModelAdapter>)
        });
        reg.register("scripted", |spec| {
            ScriptedAdapter::from_options(&spec.agent_id, spec.model.as_deref(), &spec.client_options)
                .map(|a| Arc::new(a) as Arc<dyn ModelAdapter>)
        });
        reg
    }

    /// Register a factory under a backend selector, replacing any previous one.
    pub fn register<F>(&mut self, selector: impl Into<String>, factory: F)
    where
        F: Fn(&AdapterSpec) -> Result<Arc<dyn ModelAdapter>> + Send + Sync + 'static,
    {
        let selector = selector.into();
        if self.factories.insert(selector.clone(), Arc::new(factory)).is_some() {
            tracing::debug!(selector = %selector, "replaced adapter factory");
        }
    }

    /// Register a pre-built adapter shared by every agent using `selector`.
    pub fn register_instance(&mut self, selector: impl Into<String>, adapter: Arc<dyn ModelAdapter>) {
        self.register(selector, move |_| Ok(adapter.clone()));
    }

    /// Build the adapter for one agent.
    pub fn create(&self, spec: &AdapterSpec) -> Result<Arc<dyn ModelAdapter>> {
        let factory = self
            .factories
            .get(&spec.provider)
            .ok_or_else(|| Error::UnknownBackend(spec.provider.clone()))?;
        let adapter = factory(spec)?;
        tracing::debug!(
            agent_id = %spec.agent_id,
            provider = %spec.provider,
            model = %adapter.model(),
            "built model adapter"
        );
        Ok(adapter)
    }

    pub fn for_agent(&self, agent: &AgentConfig) -> Result<Arc<dyn ModelAdapter>> {
        self.create(&AdapterSpec::from(agent))
    }

    pub fn contains(&self, selector: &str) -> bool {
        self.factories.contains_key(selector)
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// List all registered selectors (sorted).
    pub fn list_selectors(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}
