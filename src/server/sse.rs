//! SSE tool-call stream endpoint (§6): `POST /sse/tools/call`.
//!
//! Addresses a tool server directly by name — independent of any agent's
//! native/wrapper binding — and re-exposes the Tool Client's
//! `call_tool_stream` (C4) progress/terminal frames as `start`/`chunk`/`done`
//! SSE events (§8 Scenario 4).

use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::client::ToolCallFrame;
use crate::server::application::Application;

#[derive(Debug, Deserialize)]
pub struct SseToolCallRequest {
    pub server_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseToolEvent {
    Start {
        server: String,
        tool: String,
    },
    Chunk {
        data: Value,
        index: u32,
    },
    Done {
        total_chunks: u32,
    },
    Error {
        message: String,
    },
}

fn to_event(e: SseToolEvent) -> Event {
    Event::default().json_data(&e).unwrap_or_else(|_| Event::default().data("{}"))
}

/// `POST /sse/tools/call` — streams progress notifications from a single
/// `tools/call` as they arrive, terminated by one `done` (or `error`) event.
pub async fn sse_tool_call(
    State(app): State<Application>,
    Json(req): Json<SseToolCallRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let router = app.registry.router();
    let server_name = req.server_name.clone();
    let tool_name = req.tool_name.clone();

    let stream = async_stream::stream! {
        yield Ok(to_event(SseToolEvent::Start { server: server_name.clone(), tool: tool_name.clone() }));

        let session = match router.session_for_tool_call(&server_name).await {
            Ok(s) => s,
            Err(e) => {
                yield Ok(to_event(SseToolEvent::Error { message: e.to_string() }));
                return;
            }
        };

        let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        let mut index: u32 = 0;
        let guard = session.lock().await;
        let mut frames = Box::pin(guard.call_tool_stream(tool_name.clone(), req.arguments.clone(), cancel_rx));

        loop {
            use tokio_stream::StreamExt as _;
            match frames.next().await {
                Some(ToolCallFrame::Progress(value)) => {
                    index += 1;
                    yield Ok(to_event(SseToolEvent::Chunk { data: value, index }));
                }
                Some(ToolCallFrame::Done(Ok(_result))) => {
                    yield Ok(to_event(SseToolEvent::Done { total_chunks: index }));
                    break;
                }
                Some(ToolCallFrame::Done(Err(e))) => {
                    yield Ok(to_event(SseToolEvent::Error { message: e.to_string() }));
                    break;
                }
                None => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
