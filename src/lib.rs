//! # Agent execution core
//!
//! A local-first runtime that routes chat and tool-call traffic to AI
//! agents defined in declarative config: MCP tool-server transport and
//! routing, polymorphic agent adapters over native and wrapper model
//! bindings, a cron/interval/once task scheduler, and a streaming Session
//! Hub fanning reasoning steps out over WebSocket.

pub mod agents;
pub mod config;
pub mod errors;
pub mod llms;
pub mod mcp;
pub mod scheduler;
pub mod server;
pub mod types;

pub use agents::{AgentRegistry, DriverFactory, ResponseCache};
pub use config::Config;
pub use llms::base_llm::BaseLLM;
pub use mcp::router::McpRouter;

/// Library version.
pub const VERSION: &str = "1.9.3";
