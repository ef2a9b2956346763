//! Persisting a run to its thread and resuming from it.

use std::sync::Arc;

use serde_json::json;
use sy_domain::config::{AgentConfig, RunConfig};
use sy_domain::session::ArtifactFile;
use sy_domain::stream::ModelChunk;
use sy_domain::tool::Role;
use sy_engine::cli::run::stored_run;
use sy_engine::runtime::graph::Edge;
use sy_engine::runtime::relabel::thread_history;
use sy_engine::{GraphBuilder, GraphRunner, RunInput};
use sy_providers::scripted::{text, tool_call};
use sy_providers::{AdapterRegistry, ScriptedAdapter};
use sy_sessions::ThreadStore;
use sy_tools::{ToolArtifact, ToolRegistry};

fn runner(a: &Arc<ScriptedAdapter>, b: &Arc<ScriptedAdapter>) -> GraphRunner {
    let mut adapters = AdapterRegistry::new();
    adapters.register_instance("a", a.clone());
    adapters.register_instance("b", b.clone());
    let mut writer = AgentConfig::new("writer", "a");
    writer.name = Some("Writer".into());
    let graph = GraphBuilder::new(vec![writer, AgentConfig::new("editor", "b")])
        .edge(Edge::direct("writer", "editor"))
        .build(&adapters, &ToolRegistry::with_builtins())
        .unwrap();
    GraphRunner::new(graph, RunConfig::default())
}

#[tokio::test]
async fn second_run_sees_relabeled_history_and_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let store = ThreadStore::open(dir.path()).unwrap();
    let thread_id = ThreadStore::new_thread_id();

    let mut first_turn = tool_call("s1", "execute_code", json!({"code": "plot()"}));
    first_turn.push(ModelChunk::ServerToolResult {
        call_id: "s1".into(),
        tool_name: "execute_code".into(),
        output: "saved".into(),
        artifact: Some(
            ToolArtifact::session("sess_1", vec![ArtifactFile { name: "plot.png".into(), id: None }])
                .to_value(),
        ),
    });
    first_turn.extend(text("Draft one."));
    let a = Arc::new(
        ScriptedAdapter::new("a")
            .turn(first_turn)
            .turn(text("Draft two.")),
    );
    let b = Arc::new(
        ScriptedAdapter::new("b")
            .turn(text("Edited one."))
            .turn(text("Edited two.")),
    );
    let runner = runner(&a, &b);

    // ── First run ──
    let mut sink = sy_domain::events::NoopHandler;
    let first = runner
        .run(RunInput::new("write a post").with_thread(&thread_id), &mut sink)
        .await
        .unwrap();
    assert!(first.is_success());
    store
        .append_async(&stored_run(&first, &thread_id, "write a post", runner.agent_names()))
        .await
        .unwrap();

    // ── Resume ──
    let prior = store.read_async(&thread_id).await.unwrap();
    assert_eq!(prior.len(), 1);
    assert_eq!(prior[0].agent_names["writer"], "Writer");
    let history = thread_history(&prior);
    let sessions = store.latest_code_sessions(&thread_id).unwrap();
    assert_eq!(sessions["execute_code"].file_names(), vec!["plot.png"]);

    let second = runner
        .run(
            RunInput::new("shorter please")
                .with_history(history)
                .with_code_sessions(sessions)
                .with_thread(&thread_id),
            &mut sink,
        )
        .await
        .unwrap();
    assert!(second.is_success());

    let seen = &a.requests()[1].messages;
    assert_eq!(seen[0].role, Role::User);
    assert_eq!(seen[0].content.joined_text(), "write a post");
    let writer_turns: Vec<_> = seen
        .iter()
        .filter(|m| m.role == Role::Assistant && m.name.as_deref() == Some("Writer"))
        .collect();
    assert_eq!(writer_turns.len(), 2, "tool turn and text turn, both labeled");
    assert!(seen
        .iter()
        .any(|m| m.role == Role::Assistant && m.name.as_deref() == Some("editor")));
    assert_eq!(seen.last().unwrap().content.joined_text(), "shorter please");

    // Sessions carried over even though the second run produced no artifact.
    assert_eq!(second.code_sessions["execute_code"].session_id, "sess_1");
}
