//! Transport layer implementations for MCP connections.
//!
//! This module provides the transport abstraction and concrete implementations
//! for communicating with MCP servers over different protocols (spec §4.2/§4.3
//! name exactly two: stdio and SSE):
//!
//! - **Stdio** (`StdioTransport`): Connects to local MCP servers running as
//!   child processes, communicating via stdin/stdout.
//! - **SSE** (`SSETransport`): Connects to remote MCP servers using
//!   Server-Sent Events (or a single JSON response) over HTTP POST.
//!
//! All transports implement the `BaseTransport` trait, which defines the common
//! interface for connection management. The `TransportType` enum identifies
//! the type of transport being used.

pub mod sse;
pub mod stdio;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use sse::SSETransport;
pub use stdio::StdioTransport;

use crate::errors::TransportError;
use crate::mcp::codec::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ---------------------------------------------------------------------------
// TransportType
// ---------------------------------------------------------------------------

/// MCP transport types.
///
/// Identifies the protocol used by a transport implementation.
///
/// Corresponds to `crewai.mcp.transports.base.TransportType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Standard I/O transport (local child process).
    Stdio,
    /// Server-Sent Events transport.
    Sse,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Stdio => write!(f, "stdio"),
            TransportType::Sse => write!(f, "sse"),
        }
    }
}

impl TransportType {
    /// Get the string value of the transport type.
    ///
    /// Returns the same string as `Display`, matching the Python
    /// `TransportType(str, Enum)` `.value` attribute.
    pub fn value(&self) -> &str {
        match self {
            TransportType::Stdio => "stdio",
            TransportType::Sse => "sse",
        }
    }

    /// Parse a transport type from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String to parse (case-insensitive).
    ///
    /// # Returns
    ///
    /// The matching `TransportType`, or `None` if the string is not recognized.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stdio" => Some(TransportType::Stdio),
            "sse" => Some(TransportType::Sse),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// BaseTransport
// ---------------------------------------------------------------------------

/// Base trait for MCP transport implementations.
///
/// Defines the interface that all transport implementations must follow.
/// Transports handle the low-level communication with MCP servers,
/// including connection establishment, disconnection, and stream management.
///
/// In the Python implementation, `BaseTransport` also manages read/write
/// streams and acts as an async context manager. In Rust, the stream
/// management is handled internally by each transport implementation.
///
/// Corresponds to `crewai.mcp.transports.base.BaseTransport`.
#[async_trait]
pub trait BaseTransport: Send + Sync {
    /// Return the transport type.
    ///
    /// Corresponds to `BaseTransport.transport_type` property in Python.
    fn transport_type(&self) -> TransportType;

    /// Check if transport is currently connected.
    ///
    /// Returns `true` if the transport has an active connection to the
    /// MCP server.
    ///
    /// Corresponds to `BaseTransport.connected` property in Python.
    fn connected(&self) -> bool;

    /// Establish connection to the MCP server.
    ///
    /// Sets up the underlying communication channel (process, HTTP connection,
    /// or SSE stream) and prepares the transport for sending/receiving messages.
    ///
    /// If the transport is already connected, this should be a no-op.
    ///
    /// # Errors
    ///
    /// * Connection failures (server unreachable, authentication errors, etc.).
    /// * MCP SDK not available (dependency not installed).
    ///
    /// Corresponds to `BaseTransport.connect()` in Python.
    async fn connect(&mut self) -> Result<(), anyhow::Error>;

    /// Close connection to the MCP server.
    ///
    /// Cleans up the underlying communication channel and releases resources.
    /// If the transport is not connected, this should be a no-op.
    ///
    /// # Errors
    ///
    /// * Clean-up failures (process termination errors, etc.).
    ///
    /// Corresponds to `BaseTransport.disconnect()` in Python.
    async fn disconnect(&mut self) -> Result<(), anyhow::Error>;

    /// Return a string identifier for this server.
    ///
    /// Used for caching, logging, and event emission. The format
    /// depends on the transport type:
    /// - Stdio: `"stdio:{command}:{arg1}:{arg2}:..."`
    /// - SSE: `"sse:{url}"`
    fn server_identifier(&self) -> String;

    /// Send one JSON-RPC request and await its matched response.
    ///
    /// Implementations own demultiplexing: concurrent in-flight requests
    /// are matched to their response by id, independent of submission
    /// order. Connection-level failures map to `TransportError::Unavailable`
    /// or `TransportError::Transient` per the transport's own error policy.
    async fn send_request(
        &self,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Send a notification; no response is expected.
    async fn send_notification(
        &self,
        notification: JsonRpcNotification,
    ) -> Result<(), TransportError>;

    /// Subscribe to server-initiated notifications (progress events,
    /// log messages) that arrive outside the request/response cycle.
    fn subscribe_notifications(&self) -> broadcast::Receiver<JsonRpcNotification>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_type_display() {
        assert_eq!(TransportType::Stdio.to_string(), "stdio");
        assert_eq!(TransportType::Sse.to_string(), "sse");
    }

    #[test]
    fn test_transport_type_value() {
        assert_eq!(TransportType::Stdio.value(), "stdio");
        assert_eq!(TransportType::Sse.value(), "sse");
    }

    #[test]
    fn test_transport_type_from_str() {
        assert_eq!(TransportType::from_str_opt("stdio"), Some(TransportType::Stdio));
        assert_eq!(TransportType::from_str_opt("sse"), Some(TransportType::Sse));
        assert_eq!(TransportType::from_str_opt("unknown"), None);
    }

    #[test]
    fn test_transport_type_from_str_case_insensitive() {
        assert_eq!(TransportType::from_str_opt("STDIO"), Some(TransportType::Stdio));
        assert_eq!(TransportType::from_str_opt("SSE"), Some(TransportType::Sse));
    }

    #[test]
    fn test_transport_type_equality() {
        assert_eq!(TransportType::Stdio, TransportType::Stdio);
        assert_ne!(TransportType::Stdio, TransportType::Sse);
    }

    #[test]
    fn test_transport_type_clone() {
        let t = TransportType::Sse;
        let t2 = t;
        assert_eq!(t, t2);
    }

    #[test]
    fn test_transport_type_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(TransportType::Stdio);
        set.insert(TransportType::Sse);
        assert_eq!(set.len(), 2);

        // Inserting a duplicate should not increase the set size.
        set.insert(TransportType::Stdio);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_stdio_transport_basic() {
        let transport = StdioTransport::new("echo", None, None);
        assert_eq!(transport.transport_type(), TransportType::Stdio);
        assert!(!transport.connected());
        assert!(transport.server_identifier().starts_with("stdio:echo"));
    }

    #[test]
    fn test_sse_transport_basic() {
        let transport = SSETransport::new("https://example.com/sse", None);
        assert_eq!(transport.transport_type(), TransportType::Sse);
        assert!(!transport.connected());
        assert!(transport.server_identifier().starts_with("sse:"));
    }
}
