use serde::{Deserialize, Serialize};

/// Execution ceilings for one graph run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum model turns with tool calls per node invocation.
    #[serde(default = "d_25")]
    pub max_tool_loops: u32,
    /// Maximum supersteps before the run is stopped.
    #[serde(default = "d_25")]
    pub recursion_limit: u32,
    /// Capacity of the branch → coordinator event channel.
    #[serde(default = "d_64")]
    pub event_buffer: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_tool_loops: d_25(),
            recursion_limit: d_25(),
            event_buffer: d_64(),
        }
    }
}

fn d_25() -> u32 {
    25
}
fn d_64() -> usize {
    64
}
