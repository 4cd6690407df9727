//! Axum route table for the agent execution core's external interfaces (§6).

use std::collections::HashMap;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::server::application::Application;
use crate::server::{chat, sse, tasks};

/// Build the axum router. `Application` is the one piece of shared state
/// every handler extracts (§9: no global singletons).
pub fn app_router(app: Application) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/ws", get(ws_upgrade_handler))
        .route("/sse/tools/call", post(sse::sse_tool_call))
        .route("/v1/tasks", get(tasks::list_tasks))
        .route("/v1/tasks/{id}", get(tasks::get_task).delete(tasks::delete_task))
        .route("/v1/tasks/{id}/enable", post(tasks::enable_task))
        .route("/v1/tasks/{id}/disable", post(tasks::disable_task))
        .layer(CorsLayer::permissive())
        .with_state(app)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "agent-execution-core",
    }))
}

/// `GET /v1/ws` — upgrade to the bidirectional Session Hub connection
/// (§4.13, §6). An optional `?session_id=` query param lets a
/// reconnecting client ask for a specific id; otherwise one is generated.
async fn ws_upgrade_handler(
    State(app): State<Application>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let session_id = params.get("session_id").cloned();
    let hub = app.hub.clone();
    let registry = app.registry.clone();
    ws.on_upgrade(move |socket| hub.handle_socket(socket, registry, session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::registry::DriverFactory;
    use crate::config::{ApplicationConfig, Config, TaskStoreBackendConfig};
    use crate::errors::ConfigError;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct EmptyFactory;
    impl DriverFactory for EmptyFactory {
        fn native_driver(&self, model_id: &str) -> Result<Arc<dyn crate::agents::adapters::native::NativeModelDriver>, ConfigError> {
            Err(ConfigError::Invalid { message: format!("no models configured ({model_id})") })
        }
        fn function_call_model(&self, model_id: &str) -> Result<Arc<dyn crate::agents::adapters::wrapper::FunctionCallModel>, ConfigError> {
            Err(ConfigError::Invalid { message: format!("no models configured ({model_id})") })
        }
    }

    async fn empty_app() -> Application {
        let config = Config {
            agents: vec![],
            models: vec![],
            tool_servers: vec![],
            application: ApplicationConfig { task_store: TaskStoreBackendConfig::Embedded { path: ":memory:".to_string() }, ..ApplicationConfig::default() },
        };
        Application::build(config, Arc::new(EmptyFactory)).await.unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let app = app_router(empty_app().await);

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], crate::VERSION);
    }

    #[tokio::test]
    async fn tasks_list_is_empty_for_fresh_store() {
        let app = app_router(empty_app().await);

        let request = Request::builder().uri("/v1/tasks").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_completions_rejects_unknown_agent() {
        let app = app_router(empty_app().await);

        let request = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_string(&serde_json::json!({
                "model": "no-such-agent",
                "messages": [{"role": "user", "content": "hi"}],
            })).unwrap()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
