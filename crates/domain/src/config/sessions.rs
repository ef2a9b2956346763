use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Thread persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Directory holding one `<thread_id>.jsonl` file per thread.
    #[serde(default = "d_threads_path")]
    pub path: PathBuf,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { path: d_threads_path() }
    }
}

fn d_threads_path() -> PathBuf {
    PathBuf::from("./data/threads")
}
