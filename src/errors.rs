//! Domain error kinds for the agent execution core.
//!
//! One enum per failure family, composed via `#[from]` the way
//! `utilities::errors` composes `DatabaseError` into `AgentRepositoryError`.
//! Process boundaries (the server binary, top-level HTTP handlers) convert
//! these into `anyhow::Error`; domain code never depends on `anyhow`.

use thiserror::Error;

/// Failures while starting up from declarative configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config invalid: {message}")]
    Invalid { message: String },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Framing/shape errors from the JSON-RPC codec (C1).
///
/// Per-frame: a bad frame does not invalidate the connection.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("malformed JSON-RPC frame: {message}")]
    ProtocolFraming { message: String },

    #[error("valid JSON but not a JSON-RPC 2.0 shape: {message}")]
    ProtocolShape { message: String },
}

/// Transport-layer errors (C2/C3), surfaced by the Tool Client.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("transport unavailable: {message}")]
    Unavailable { message: String },

    #[error("transport transient failure: {message}")]
    Transient { message: String },

    #[error("transport protocol error (HTTP {status}): {message}")]
    Protocol { status: u16, message: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors from a Tool Client operation (C4), or routed through it from the
/// Router (C6).
#[derive(Debug, Error, Clone)]
pub enum ToolError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("tool not found: {tool_name}")]
    NotFound { tool_name: String },

    #[error("tool execution error: {message}")]
    ExecutionError { message: String },

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("service unavailable: tool server session is errored")]
    ServiceUnavailable,
}

/// Errors surfaced while running an agent adapter (C7/C8).
#[derive(Debug, Error, Clone)]
pub enum RunError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("exceeded max_iterations ({max_iterations})")]
    IterationLimit { max_iterations: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("model call failed: {message}")]
    ModelError { message: String },
}

/// Errors from the Task Store (C11).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation failed: {message}")]
    OperationError { message: String },

    #[error("task not found: {task_id}")]
    NotFound { task_id: String },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Errors from the Scheduler (C12).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid schedule: {message}")]
    InvalidSchedule { message: String },

    #[error("task already running: {task_id}")]
    Coalesced { task_id: String },
}

/// Errors from the Session Hub (C13).
#[derive(Debug, Error)]
pub enum HubError {
    #[error("backpressure: outbound queue overflowed for session {session_id}")]
    Backpressure { session_id: String },

    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error(transparent)]
    Run(#[from] RunError),
}
