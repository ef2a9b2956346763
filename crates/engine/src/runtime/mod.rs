//! Core runtime: graph construction and execution.
//!
//! Entry point: [`executor::GraphRunner::run`] takes a user message and
//! drives the agent graph to completion, streaming canonical events into a
//! caller-supplied handler and returning the assembled content.

pub mod agent;
pub mod aggregator;
pub mod cancel;
pub mod continuity;
mod coordinator;
pub mod executor;
pub mod graph;
pub mod pruning;
pub mod relabel;
pub mod runs;
pub mod steps;
pub mod tools;
pub mod turn;
