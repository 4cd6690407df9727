//! Agent-invocation wire protocol, OpenAI-style compatibility (§6):
//! `POST /v1/chat/completions`, non-streaming and streaming.
//!
//! The request's `model` field names an agent (not a vendor model — that
//! binding already lives in the Agent Definition, §3). This endpoint is
//! stateless across calls: there is no `session_id` in the OpenAI wire
//! shape, so only the most recent user message becomes the prompt handed
//! to the adapter; continuity across turns is a Session Hub (C13)
//! concern, not this endpoint's.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agents::adapters::new_cancel_signal;
use crate::agents::reasoning::{split_into_sentences, FinishReason};
use crate::agents::response_cache::cache_key;
use crate::server::application::Application;

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    /// Agent name (§6: "`model:<agent_name>`").
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
}

fn last_user_prompt(messages: &[ChatMessage]) -> String {
    messages.iter().rev().find(|m| m.role == "user").map(|m| m.content.clone()).unwrap_or_default()
}

fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4())
}

/// `POST /v1/chat/completions`. Dispatches to the streaming or
/// non-streaming path by the body's `stream` flag, as one axum handler so
/// both forms share request parsing and agent lookup.
pub async fn chat_completions(State(app): State<Application>, Json(req): Json<ChatCompletionRequest>) -> Response {
    if req.tools.is_some() {
        // Client-supplied tool schemas are not honored: an agent's tool
        // bindings come from its own Agent/Tool-Server Definitions (§3),
        // decided once at registry build time, not per request.
        tracing::debug!(model = %req.model, "ignoring client-supplied `tools`: agent's own bindings take precedence");
    }

    if req.stream {
        chat_completions_stream(app, req).await.into_response()
    } else {
        chat_completions_buffered(app, req).await.into_response()
    }
}

async fn chat_completions_buffered(app: Application, req: ChatCompletionRequest) -> Response {
    let created = chrono::Utc::now().timestamp();
    let id = completion_id();
    let model = req.model.clone();
    let prompt = last_user_prompt(&req.messages);

    let Some(adapter) = app.registry.get(&model) else {
        return (
            axum::http::StatusCode::NOT_FOUND,
            Json(json!({"error": {"message": format!("unknown agent '{model}'"), "type": "invalid_request_error"}})),
        )
            .into_response();
    };

    let key = cache_key(&model, &prompt, &Value::Null);
    let adapter_for_compute = adapter.clone();
    let prompt_for_compute = prompt.clone();
    let result = app
        .response_cache
        .get_or_compute(key, move || async move {
            let (_tx, cancel) = new_cancel_signal();
            adapter_for_compute
                .run(&prompt_for_compute, None, cancel)
                .await
                .map_err(|e| e.to_string())
        })
        .await;

    // §7: failed runs still return HTTP 200 with the error text folded
    // into the assistant message and `finish_reason:"error"`, so generic
    // OpenAI clients keep working.
    let (content, finish_reason) = match result {
        Ok(response) => (
            response.text,
            match response.finish_reason {
                FinishReason::Stop => "stop",
                FinishReason::Error => "error",
                FinishReason::Cancelled => "error",
                FinishReason::IterationLimit => "length",
            },
        ),
        Err(message) => (message, "error"),
    };

    Json(json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": finish_reason,
        }],
        "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0},
    }))
    .into_response()
}

#[derive(Serialize)]
struct ChunkDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
}

fn chunk_payload(id: &str, created: i64, model: &str, content: Option<&str>, finish_reason: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "delta": ChunkDelta { content },
            "finish_reason": finish_reason,
        }],
    })
}

async fn chat_completions_stream(
    app: Application,
    req: ChatCompletionRequest,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = completion_id();
    let created = chrono::Utc::now().timestamp();
    let model = req.model.clone();
    let prompt = last_user_prompt(&req.messages);

    let stream = async_stream::stream! {
        let Some(adapter) = app.registry.get(&model) else {
            let payload = chunk_payload(&id, created, &model, None, Some("error"));
            yield Ok(Event::default().json_data(&payload).unwrap_or_default());
            yield Ok(Event::default().data("[DONE]"));
            return;
        };

        let (_tx, cancel) = new_cancel_signal();
        match adapter.run(&prompt, None, cancel).await {
            Ok(response) => {
                let sentences = split_into_sentences(&response.text);
                let finish_reason = match response.finish_reason {
                    FinishReason::Stop => "stop",
                    FinishReason::Error => "error",
                    FinishReason::Cancelled => "error",
                    FinishReason::IterationLimit => "length",
                };
                if sentences.is_empty() {
                    let payload = chunk_payload(&id, created, &model, None, Some(finish_reason));
                    yield Ok(Event::default().json_data(&payload).unwrap_or_default());
                } else {
                    let last = sentences.len() - 1;
                    for (i, sentence) in sentences.iter().enumerate() {
                        let reason = if i == last { Some(finish_reason) } else { None };
                        let payload = chunk_payload(&id, created, &model, Some(sentence.as_str()), reason);
                        yield Ok(Event::default().json_data(&payload).unwrap_or_default());
                    }
                }
            }
            Err(e) => {
                let payload = chunk_payload(&id, created, &model, Some(&e.to_string()), Some("error"));
                yield Ok(Event::default().json_data(&payload).unwrap_or_default());
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
