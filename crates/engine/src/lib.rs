//! Multi-agent graph execution engine.
//!
//! Builds an executable agent graph from declarative configuration, runs its
//! branches concurrently, and folds every branch's model stream into one
//! ordered, agent-attributed transcript.

pub mod cli;
pub mod runtime;
pub mod state;

pub use runtime::executor::{GraphRunner, RunInput, RunOutcome};
pub use runtime::graph::{ExecutableGraph, GraphBuilder};
pub use state::RunContext;
