use serde::Serialize;

/// Structured trace events emitted across all switchyard crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    GraphBuilt {
        agents: usize,
        edges: usize,
        entry_nodes: Vec<String>,
        handoff_tools: usize,
    },
    BranchStarted {
        run_id: String,
        agent_id: String,
        branch: u32,
        superstep: u32,
    },
    BranchFinished {
        run_id: String,
        agent_id: String,
        branch: u32,
        status: String,
        turns: u32,
        duration_ms: u64,
    },
    ModelRequest {
        provider: String,
        model: String,
        agent_id: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ToolDispatched {
        agent_id: String,
        call_id: String,
        tool_name: String,
        duration_ms: u64,
    },
    ToolFailed {
        agent_id: String,
        call_id: String,
        tool_name: String,
        error: String,
    },
    HistoryRewritten {
        agent_id: String,
        collapsed_turns: usize,
    },
    ContextPruned {
        agent_id: String,
        dropped_messages: usize,
        trimmed_results: usize,
    },
    EventSkipped {
        kind: String,
        reason: String,
    },
    SessionMerged {
        tool_name: String,
        session_id: String,
        files: usize,
    },
    RunFinished {
        run_id: String,
        status: String,
        duration_ms: u64,
        content_parts: usize,
    },
    ThreadAppend {
        thread_id: String,
        lines: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sy_event");
    }
}
