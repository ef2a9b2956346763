//! Adapter registry resolution, end to end through `AgentConfig`.

use std::sync::Arc;

use futures_util::StreamExt;
use sy_domain::config::AgentConfig;
use sy_domain::error::Error;
use sy_domain::stream::ModelChunk;
use sy_providers::scripted::{self, ScriptedAdapter};
use sy_providers::{AdapterRegistry, ChatRequest, ModelAdapter};

#[test]
fn builtins_are_registered() {
    let reg = AdapterRegistry::with_builtins();
    assert_eq!(reg.list_selectors(), vec!["echo", "scripted"]);
}

#[test]
fn unknown_selector_fails() {
    let reg = AdapterRegistry::with_builtins();
    let agent = AgentConfig::new("a", "gpt-nowhere");
    match reg.for_agent(&agent) {
        Err(Error::UnknownBackend(sel)) => assert_eq!(sel, "gpt-nowhere"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected an error"),
    }
}

#[test]
fn scripted_agent_reads_client_options() {
    let reg = AdapterRegistry::with_builtins();
    let mut agent = AgentConfig::new("thinker", "scripted");
    agent.client_options = serde_json::json!({ "thinking": true });
    let adapter = reg.for_agent(&agent).unwrap();
    assert!(adapter.capabilities().requires_thinking);
    assert_eq!(adapter.provider_id(), "thinker");
}

#[tokio::test]
async fn registered_instance_is_shared() {
    let shared = Arc::new(ScriptedAdapter::new("shared").turn(scripted::text("hi")));
    let mut reg = AdapterRegistry::new();
    reg.register_instance("mock", shared.clone());

    let adapter = reg.for_agent(&AgentConfig::new("a", "mock")).unwrap();
    let chunks: Vec<ModelChunk> = adapter
        .chat_stream(ChatRequest::default())
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;
    assert_eq!(chunks[0], ModelChunk::Token { text: "hi".into() });
    assert_eq!(shared.requests().len(), 1);
}
