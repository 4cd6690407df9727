//! Agent infrastructure for the agent execution core: the polymorphic
//! Agent Adapter trait (native and wrapper bindings), the driver factory
//! seam that wires adapters to real model SDKs, the reasoning-step vocabulary
//! shared with the Session Hub, the Agent Registry, the Response Cache, and
//! the tool-result cache consulted by the Wrapper Adapter.

pub mod adapters;
pub mod cache;
pub mod driver_factory;
pub mod reasoning;
pub mod registry;
pub mod response_cache;

// Re-exports for convenience
pub use adapters::{AgentAdapter, CancelSignal, NativeAdapter, WrapperAdapter};
pub use cache::cache_handler::CacheHandler;
pub use reasoning::{FinalResponse, FinishReason, ReasoningStep, SessionHistory, StepContent};
pub use registry::{AgentRegistry, DriverFactory};
pub use response_cache::ResponseCache;
