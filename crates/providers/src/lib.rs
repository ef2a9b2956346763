pub mod echo;
pub mod registry;
pub mod scripted;
pub mod traits;

// Re-exports for convenience.
pub use echo::EchoAdapter;
pub use registry::{AdapterRegistry, AdapterSpec};
pub use scripted::ScriptedAdapter;
pub use traits::{ChatRequest, ModelAdapter};
