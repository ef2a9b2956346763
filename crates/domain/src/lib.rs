pub mod capability;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod session;
pub mod step;
pub mod stream;
pub mod tool;
pub mod trace;
