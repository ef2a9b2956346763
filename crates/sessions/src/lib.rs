//! Thread persistence for switchyard.
//!
//! A thread is the sequence of runs sharing one conversation. Each finished
//! run is appended to the thread's JSONL file with enough state (content
//! parts, agent attribution, code sessions) to seed the next run.

pub mod thread;

pub use thread::{StoredRun, ThreadStore};
