//! Model Context Protocol (MCP) transport, routing, and tool catalog.
//!
//! This module provides the MCP client, server configuration types,
//! transport layers (Stdio, HTTP, SSE), and tool filtering for connecting
//! agents to MCP-compatible tool servers.
//!
//! MCP allows agents to discover and invoke tools exposed by external
//! servers using a standardized protocol with different transport mechanisms.

pub mod catalog;
pub mod client;
pub mod codec;
pub mod filters;
pub mod router;
pub mod transports;

// Re-export main types.
pub use catalog::{FunctionCallSchema, ToolCatalog, ToolOrigin};
pub use client::MCPClient;
pub use codec::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
pub use filters::{StaticToolFilter, ToolFilterContext};
pub use router::{Binding, McpRouter};
pub use transports::{BaseTransport, TransportType};
