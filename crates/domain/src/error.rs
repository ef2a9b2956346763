/// Shared error type used across all switchyard crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("graph: {0}")]
    Graph(String),

    #[error("unknown backend selector '{0}'")]
    UnknownBackend(String),

    #[error("unknown tool '{tool}' for agent '{agent_id}'")]
    UnknownTool { agent_id: String, tool: String },

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("tool: {0}")]
    Tool(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("recursion limit reached ({0} supersteps)")]
    RecursionLimit(u32),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Configuration errors are detected before any model call and abort
    /// the run outright instead of producing a partial result.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Graph(_)
                | Error::UnknownBackend(_)
                | Error::UnknownTool { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
