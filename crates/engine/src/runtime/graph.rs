//! Graph builder.
//!
//! Turns agent definitions plus edges into an [`ExecutableGraph`]: one
//! [`AgentContext`] per agent (adapter and bound tools resolved), the edge
//! list, the entry nodes, and a `transfer_to_<agent>` tool on the source of
//! every handoff edge.
//!
//! Structural problems (unknown agents, a direct self-loop, an unknown
//! backend selector or tool) fail the build, before any model is called.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use sy_domain::config::{
    AgentConfig, ConditionConfig, Config, EdgeConfig, EdgeType, OneOrMany,
};
use sy_domain::error::{Error, Result};
use sy_domain::tool::Message;
use sy_domain::trace::TraceEvent;
use sy_providers::AdapterRegistry;
use sy_tools::ToolRegistry;

use super::agent::{AgentContext, HandoffTool};
use super::continuity::buffer_string;

/// `prompt_key` value that appends an edge prompt as a user message.
pub const PROMPT_KEY_MESSAGES: &str = "messages";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conditions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a condition sees when its source node completes.
#[derive(Debug, Clone, Copy)]
pub struct BranchState<'a> {
    pub agent_id: &'a str,
    /// Full branch history: the node's input plus what it produced.
    pub messages: &'a [Message],
    /// Text of the node's final assistant message.
    pub last_output: &'a str,
}

/// Chooses the destinations of a conditional edge. An empty result stops
/// the branch.
pub trait EdgeCondition: Send + Sync {
    fn route(&self, state: &BranchState<'_>) -> Vec<String>;

    /// Every destination this condition can name, when known up front.
    /// Checked against the edge's `to` list when the graph is built.
    fn targets(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> EdgeCondition for F
where
    F: Fn(&BranchState<'_>) -> Vec<String> + Send + Sync,
{
    fn route(&self, state: &BranchState<'_>) -> Vec<String> {
        self(state)
    }
}

/// Declarative condition: the first rule whose regex matches the source's
/// last output picks the destination, else the default.
#[derive(Debug, Clone)]
pub struct RuleCondition {
    rules: Vec<(Regex, String)>,
    default: Option<String>,
}

impl RuleCondition {
    pub fn from_config(config: &ConditionConfig) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let re = Regex::new(&rule.pattern).map_err(|e| {
                Error::Graph(format!("invalid condition pattern '{}': {e}", rule.pattern))
            })?;
            rules.push((re, rule.to.clone()));
        }
        Ok(Self { rules, default: config.default.clone() })
    }
}

impl EdgeCondition for RuleCondition {
    fn route(&self, state: &BranchState<'_>) -> Vec<String> {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(state.last_output))
            .map(|(_, to)| to.clone())
            .or_else(|| self.default.clone())
            .into_iter()
            .collect()
    }

    fn targets(&self) -> Vec<String> {
        self.rules
            .iter()
            .map(|(_, to)| to.clone())
            .chain(self.default.clone())
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Edges
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub enum EdgeKind {
    Direct,
    Handoff,
    Conditional(Arc<dyn EdgeCondition>),
}

/// Inputs to an edge prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub source: &'a str,
    /// The source's last output text.
    pub results: &'a str,
    /// Full branch history of the source.
    pub messages: &'a [Message],
}

pub type PromptFn = Arc<dyn Fn(&PromptContext<'_>) -> String + Send + Sync>;

/// Derives the next agent's input from the source branch.
#[derive(Clone)]
pub enum EdgePrompt {
    /// `{results}` and `{convo}` are substituted.
    Template(String),
    Func(PromptFn),
}

impl EdgePrompt {
    pub fn func(f: impl Fn(&PromptContext<'_>) -> String + Send + Sync + 'static) -> Self {
        EdgePrompt::Func(Arc::new(f))
    }

    pub fn render(&self, ctx: &PromptContext<'_>) -> String {
        match self {
            EdgePrompt::Template(t) => {
                let mut out = t.replace("{results}", ctx.results);
                if out.contains("{convo}") {
                    out = out.replace("{convo}", &buffer_string(ctx.messages));
                }
                out
            }
            EdgePrompt::Func(f) => f(ctx),
        }
    }
}

#[derive(Clone)]
pub struct Edge {
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub kind: EdgeKind,
    /// Handoff tool description.
    pub description: Option<String>,
    pub prompt: Option<EdgePrompt>,
    pub prompt_key: Option<String>,
    pub exclude_results: bool,
}

impl Edge {
    fn new(from: OneOrMany, to: OneOrMany, kind: EdgeKind) -> Self {
        Self {
            from: from.to_vec(),
            to: to.to_vec(),
            kind,
            description: None,
            prompt: None,
            prompt_key: None,
            exclude_results: false,
        }
    }

    pub fn direct(from: impl Into<OneOrMany>, to: impl Into<OneOrMany>) -> Self {
        Self::new(from.into(), to.into(), EdgeKind::Direct)
    }

    pub fn handoff(from: impl Into<OneOrMany>, to: impl Into<OneOrMany>) -> Self {
        Self::new(from.into(), to.into(), EdgeKind::Handoff)
    }

    pub fn conditional(
        from: impl Into<OneOrMany>,
        to: impl Into<OneOrMany>,
        condition: impl EdgeCondition + 'static,
    ) -> Self {
        Self::new(from.into(), to.into(), EdgeKind::Conditional(Arc::new(condition)))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_prompt(mut self, prompt: EdgePrompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_prompt_key(mut self, key: impl Into<String>) -> Self {
        self.prompt_key = Some(key.into());
        self
    }

    pub fn excluding_results(mut self) -> Self {
        self.exclude_results = true;
        self
    }

    pub fn from_config(config: &EdgeConfig) -> Result<Self> {
        let kind = match config.edge_type {
            EdgeType::Direct => EdgeKind::Direct,
            EdgeType::Handoff => EdgeKind::Handoff,
            EdgeType::Conditional => {
                let cond = config.condition.as_ref().ok_or_else(|| {
                    Error::Graph(format!(
                        "conditional edge from {:?} has no condition",
                        config.from.to_vec()
                    ))
                })?;
                EdgeKind::Conditional(Arc::new(RuleCondition::from_config(cond)?))
            }
        };
        let mut edge = Self::new(config.from.clone(), config.to.clone(), kind);
        edge.description = config.description.clone();
        edge.prompt = config.prompt.clone().map(EdgePrompt::Template);
        edge.prompt_key = config.prompt_key.clone();
        edge.exclude_results = config.exclude_results;
        Ok(edge)
    }

    pub fn edge_type(&self) -> EdgeType {
        match self.kind {
            EdgeKind::Direct => EdgeType::Direct,
            EdgeKind::Handoff => EdgeType::Handoff,
            EdgeKind::Conditional(_) => EdgeType::Conditional,
        }
    }

    pub fn is_handoff(&self) -> bool {
        matches!(self.kind, EdgeKind::Handoff)
    }

    /// Whether a rendered prompt goes into the message list rather than
    /// the destination's instructions.
    pub fn prompt_as_message(&self) -> bool {
        self.prompt_key.as_deref().map_or(true, |k| k == PROMPT_KEY_MESSAGES)
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("type", &self.edge_type().as_str())
            .field("prompt", &self.prompt.is_some())
            .field("exclude_results", &self.exclude_results)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GraphBuilder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GraphBuilder {
    agents: Vec<AgentConfig>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new(agents: Vec<AgentConfig>) -> Self {
        Self { agents, edges: Vec::new() }
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn edges(mut self, edges: impl IntoIterator<Item = Edge>) -> Self {
        self.edges.extend(edges);
        self
    }

    pub fn build(self, adapters: &AdapterRegistry, tools: &ToolRegistry) -> Result<ExecutableGraph> {
        if self.agents.is_empty() {
            return Err(Error::Graph("graph has no agents".into()));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.agent_id.is_empty() {
                return Err(Error::Graph("agent with an empty agent_id".into()));
            }
            if !seen.insert(agent.agent_id.as_str()) {
                return Err(Error::Graph(format!("duplicate agent_id '{}'", agent.agent_id)));
            }
        }

        for edge in &self.edges {
            validate_edge(edge, &seen)?;
        }

        let mut contexts = Vec::with_capacity(self.agents.len());
        for config in &self.agents {
            let adapter = adapters.for_agent(config)?;
            let (bound, missing) = tools.subset(&config.tools);
            if let Some(tool) = missing.into_iter().next() {
                return Err(Error::UnknownTool { agent_id: config.agent_id.clone(), tool });
            }
            contexts.push(AgentContext::new(config, adapter, bound));
        }

        // ── Handoff tools ──
        let labels: BTreeMap<&str, &str> = self
            .agents
            .iter()
            .map(|a| (a.agent_id.as_str(), a.display_name()))
            .collect();
        let mut handoff_tools = 0;
        for edge in self.edges.iter().filter(|e| e.is_handoff()) {
            for source in &edge.from {
                let Some(ctx) = contexts.iter_mut().find(|c| &c.agent_id == source) else {
                    continue;
                };
                for target in &edge.to {
                    let label = labels.get(target.as_str()).copied().unwrap_or(target.as_str());
                    let tool = HandoffTool::new(target, label, edge.description.as_deref());
                    if ctx.tools.contains(&tool.name) {
                        return Err(Error::Graph(format!(
                            "agent '{source}' binds a tool named '{}', which collides with its handoff tool",
                            tool.name
                        )));
                    }
                    if target == source {
                        tracing::warn!(agent_id = %source, "agent hands off to itself");
                    }
                    if ctx.add_handoff(tool) {
                        handoff_tools += 1;
                    }
                }
            }
        }

        let graph = ExecutableGraph::assemble(contexts, self.edges);
        TraceEvent::GraphBuilt {
            agents: graph.agents.len(),
            edges: graph.edges.len(),
            entry_nodes: graph.entry.clone(),
            handoff_tools,
        }
        .emit();
        Ok(graph)
    }
}

fn validate_edge(edge: &Edge, known: &HashSet<&str>) -> Result<()> {
    let kind = edge.edge_type().as_str();
    if edge.from.is_empty() || edge.to.is_empty() {
        return Err(Error::Graph(format!("{kind} edge needs at least one source and destination")));
    }
    for id in edge.from.iter().chain(&edge.to) {
        if !known.contains(id.as_str()) {
            return Err(Error::Graph(format!("{kind} edge references unknown agent '{id}'")));
        }
    }
    if !edge.is_handoff() {
        if let Some(id) = edge.from.iter().find(|f| edge.to.contains(*f)) {
            return Err(Error::Graph(format!("{kind} edge from '{id}' to itself")));
        }
    }
    if let EdgeKind::Conditional(cond) = &edge.kind {
        for target in cond.targets() {
            if !edge.to.contains(&target) {
                return Err(Error::Graph(format!(
                    "conditional edge from {:?} routes to '{target}', which is not one of its destinations {:?}",
                    edge.from, edge.to
                )));
            }
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ExecutableGraph
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ExecutableGraph {
    /// Declaration order.
    agents: Vec<Arc<AgentContext>>,
    edges: Vec<Edge>,
    entry: Vec<String>,
}

impl ExecutableGraph {
    pub fn from_config(
        config: &Config,
        adapters: &AdapterRegistry,
        tools: &ToolRegistry,
    ) -> Result<Self> {
        let edges = config
            .edges
            .iter()
            .map(Edge::from_config)
            .collect::<Result<Vec<_>>>()?;
        GraphBuilder::new(config.agents.clone()).edges(edges).build(adapters, tools)
    }

    fn assemble(contexts: Vec<AgentContext>, edges: Vec<Edge>) -> Self {
        let targets: HashSet<&str> =
            edges.iter().flat_map(|e| e.to.iter().map(String::as_str)).collect();
        let mut entry: Vec<String> = contexts
            .iter()
            .filter(|c| !targets.contains(c.agent_id.as_str()))
            .map(|c| c.agent_id.clone())
            .collect();
        if entry.is_empty() {
            // Every agent has an incoming edge: start from the first one.
            entry.extend(contexts.first().map(|c| c.agent_id.clone()));
        }
        Self {
            agents: contexts.into_iter().map(Arc::new).collect(),
            edges,
            entry,
        }
    }

    pub fn entry_nodes(&self) -> &[String] {
        &self.entry
    }

    pub fn agent(&self, agent_id: &str) -> Option<&Arc<AgentContext>> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agent(agent_id).is_some()
    }

    pub fn agents(&self) -> impl Iterator<Item = &Arc<AgentContext>> {
        self.agents.iter()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges leaving `agent_id`, in declaration order.
    pub fn outgoing<'a>(&'a self, agent_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from.iter().any(|f| f == agent_id))
    }

    /// Destinations of every edge leaving `agent_id`, deduplicated.
    pub fn successors(&self, agent_id: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for edge in self.edges.iter().filter(|e| e.from.iter().any(|f| f == agent_id)) {
            for to in &edge.to {
                if !out.contains(&to.as_str()) {
                    out.push(to);
                }
            }
        }
        out
    }

    /// Sources of every edge entering `agent_id`, deduplicated.
    pub fn predecessors(&self, agent_id: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for edge in self.edges.iter().filter(|e| e.to.iter().any(|t| t == agent_id)) {
            for from in &edge.from {
                if !out.contains(&from.as_str()) {
                    out.push(from);
                }
            }
        }
        out
    }

    /// Every agent reachable from `agent_id` over one or more edges of any
    /// type. Contains `agent_id` itself only when it sits on a cycle.
    pub fn downstream(&self, agent_id: &str) -> HashSet<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack = self.successors(agent_id);
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.successors(next));
            }
        }
        seen
    }

    /// Names of the tools advertised to an agent's model.
    pub fn tool_names(&self, agent_id: &str) -> Vec<String> {
        self.agent(agent_id)
            .map(|a| a.tool_definitions().into_iter().map(|d| d.name).collect())
            .unwrap_or_default()
    }

    /// Agent id → display name.
    pub fn names(&self) -> BTreeMap<String, String> {
        self.agents
            .iter()
            .map(|a| (a.agent_id.clone(), a.name.clone()))
            .collect()
    }

    pub fn handoff_count(&self) -> usize {
        self.agents.iter().map(|a| a.handoffs.len()).sum()
    }
}

impl fmt::Debug for ExecutableGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableGraph")
            .field("agents", &self.agents.iter().map(|a| &a.agent_id).collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("entry", &self.entry)
            .finish()
    }
}
