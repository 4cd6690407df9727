//! Agent execution core HTTP/WebSocket server binary.
//!
//! Starts an axum server exposing the chat-completions, Session Hub,
//! SSE tool-call, and task-management endpoints (§6), and starts the
//! Scheduler's tick loop alongside it as a second ingress path (§1).
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 8080)
//! - `AGENTS_CONFIG` / `MODELS_CONFIG` / `TOOL_SERVERS_CONFIG` /
//!   `APPLICATION_CONFIG` — paths to the four declarative config documents
//!   (§6 "Configuration"), default to `config/{agents,models,tool_servers,application}.yaml`.
//! - `RUST_LOG` — tracing filter (default: "info")
//! - any variable referenced by `${VAR}`/`$VAR` in the config documents
//!   themselves (e.g. provider API keys named by `api_key_ref`).

use std::sync::Arc;

use crewai::agents::driver_factory::LlmDriverFactory;
use crewai::config::Config;
use crewai::server::{app_router, Application};

fn config_path(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,crewai=debug".into()),
        )
        .init();

    let config = Config::load(
        config_path("AGENTS_CONFIG", "config/agents.yaml"),
        config_path("MODELS_CONFIG", "config/models.yaml"),
        config_path("TOOL_SERVERS_CONFIG", "config/tool_servers.yaml"),
        config_path("APPLICATION_CONFIG", "config/application.yaml"),
    )
    .unwrap_or_else(|e| {
        // §7: config errors fail fast at startup with an actionable message.
        eprintln!("fatal: failed to load configuration: {e}");
        std::process::exit(1);
    });

    let driver_factory = Arc::new(LlmDriverFactory::new(config.models.clone()));
    let app = Application::build(config, driver_factory).await.unwrap_or_else(|e| {
        eprintln!("fatal: failed to build application: {e}");
        std::process::exit(1);
    });

    app.start().await.unwrap_or_else(|e| {
        eprintln!("fatal: failed to start scheduler: {e}");
        std::process::exit(1);
    });

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{port}");
    let router = app_router(app.clone());

    tracing::info!("agent execution core starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                    — liveness probe");
    tracing::info!("  POST /v1/chat/completions        — agent invocation (OpenAI-compatible)");
    tracing::info!("  GET  /v1/ws                       — bidirectional reasoning-step session");
    tracing::info!("  POST /sse/tools/call              — raw SSE tool-call stream");
    tracing::info!("  GET|POST|DELETE /v1/tasks...      — scheduled task management");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind");

    let shutdown_app = app.clone();
    let shutdown_signal = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight work");
        shutdown_app.shutdown().await;
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .expect("server failed");
}
