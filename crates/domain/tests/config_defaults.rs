use sy_domain::config::{Config, EdgeType};

#[test]
fn empty_document_uses_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.run.max_tool_loops, 25);
    assert_eq!(config.run.recursion_limit, 25);
    assert_eq!(config.run.event_buffer, 64);
    assert_eq!(config.sessions.path.to_str(), Some("./data/threads"));
    assert_eq!(config.observability.service_name, "switchyard");
    assert!(config.agents.is_empty());
}

#[test]
fn toml_graph_parses_in_declaration_order() {
    let toml_str = r#"
[run]
max_tool_loops = 4

[[agents]]
agent_id = "researcher"
provider = "scripted"
tools = ["web_search"]
instructions = "Find facts."

[[agents]]
agent_id = "writer"
name = "Writer"
provider = "echo"
max_context_tokens = 8000

[agents.limits]
max_duration_ms = 5000

[[edges]]
from = "researcher"
to = "writer"
edge_type = "direct"
prompt = "Summarize: {results}"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.run.max_tool_loops, 4);
    assert_eq!(config.run.recursion_limit, 25);

    let ids: Vec<_> = config.agents.iter().map(|a| a.agent_id.as_str()).collect();
    assert_eq!(ids, vec!["researcher", "writer"]);

    let writer = config.agent("writer").unwrap();
    assert_eq!(writer.display_name(), "Writer");
    assert_eq!(writer.max_context_tokens, Some(8000));
    assert_eq!(writer.limits.max_duration_ms, 5000);
    assert!(writer.client_options.is_object());

    assert_eq!(config.edges[0].edge_type, EdgeType::Direct);
    assert!(config.validate().is_empty());
}

#[test]
fn yaml_graph_parses() {
    let yaml = r#"
agents:
  - agent_id: triage
    provider: scripted
    client_options:
      thinking: true
  - agent_id: billing
    provider: scripted
edges:
  - from: triage
    to: [billing]
    description: Billing questions
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.agents.len(), 2);
    assert_eq!(config.agents[0].client_options["thinking"], true);
    assert_eq!(config.edges[0].edge_type, EdgeType::Handoff);
    assert_eq!(config.edges[0].description.as_deref(), Some("Billing questions"));
}
