//! HTTP/WebSocket surface for the agent execution core (§6):
//!
//! - `POST /v1/chat/completions` — OpenAI-style non-streaming/streaming
//!   agent invocation (C9, C10).
//! - `GET  /v1/ws` — bidirectional Session Hub connection (C13).
//! - `POST /sse/tools/call` — raw SSE tool-call stream (C4, C6).
//! - `GET|POST|DELETE /v1/tasks...` — scheduled task management (C11, C12).

pub mod application;
pub mod chat;
pub mod hub;
pub mod routes;
pub mod sse;
pub mod tasks;

pub use application::Application;
pub use routes::app_router;
