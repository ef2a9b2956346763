//! Tool contract and registry.
//!
//! A tool takes structured JSON arguments and returns either plain content
//! or content plus an artifact. Artifacts carry code-session metadata
//! (session id and files) back to the engine.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::{ToolEntry, ToolRegistry};
pub use tool::{FnTool, Tool, ToolArtifact, ToolContext, ToolError, ToolOutput};
