use std::fmt::Write as _;

use crate::runtime::graph::ExecutableGraph;

/// Human-readable summary of a compiled graph.
pub fn describe(graph: &ExecutableGraph) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Entry: {}", graph.entry_nodes().join(", "));

    let _ = writeln!(out, "\nAgents:");
    for agent in graph.agents() {
        let label = if agent.name == agent.agent_id {
            String::new()
        } else {
            format!(" ({})", agent.name)
        };
        let _ = writeln!(
            out,
            "  {}{label}  {}/{}",
            agent.agent_id,
            agent.adapter.provider_id(),
            agent.model.as_deref().unwrap_or_else(|| agent.adapter.model()),
        );
        let tools = graph.tool_names(&agent.agent_id);
        if !tools.is_empty() {
            let _ = writeln!(out, "    tools: {}", tools.join(", "));
        }
    }

    if !graph.edges().is_empty() {
        let _ = writeln!(out, "\nEdges:");
        for edge in graph.edges() {
            let _ = writeln!(
                out,
                "  {} -> {}  [{}]",
                edge.from.join(", "),
                edge.to.join(", "),
                edge.edge_type().as_str(),
            );
        }
    }

    out
}
