//! Task management HTTP (§6):
//! `GET /v1/tasks`, `GET /v1/tasks/{id}`, `POST /v1/tasks/{id}/enable|disable`,
//! `DELETE /v1/tasks/{id}`.
//!
//! Schedule values are rendered the way §6 specifies: a cron expression, an
//! integer-seconds interval, or an ISO-8601 instant for `Once`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::scheduler::{Schedule, ScheduledTask};
use crate::server::application::Application;

#[derive(Debug, Serialize)]
struct TaskView {
    id: String,
    name: String,
    description: Option<String>,
    agent_name: String,
    prompt: String,
    schedule_kind: &'static str,
    schedule_value: String,
    repeat: bool,
    enabled: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    last_status: Option<&'static str>,
    total_runs: u64,
    successful_runs: u64,
    failed_runs: u64,
}

fn status_label(status: crate::scheduler::store::TaskStatus) -> &'static str {
    use crate::scheduler::store::TaskStatus::*;
    match status {
        Idle => "pending",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl From<&ScheduledTask> for TaskView {
    fn from(task: &ScheduledTask) -> Self {
        let (schedule_kind, schedule_value) = match &task.schedule {
            Schedule::Cron(expr) => ("cron", expr.clone()),
            Schedule::Interval { seconds } => ("interval", seconds.to_string()),
            Schedule::Once(at) => ("once", at.to_rfc3339()),
        };
        TaskView {
            id: task.id.clone(),
            name: task.name.clone(),
            description: task.description.clone(),
            agent_name: task.agent_name.clone(),
            prompt: task.prompt.clone(),
            schedule_kind,
            schedule_value,
            repeat: task.repeat,
            enabled: task.enabled,
            created_at: task.created_at,
            last_run_at: task.last_run_at,
            next_run_at: task.next_run_at,
            last_status: task.last_status.map(status_label),
            total_runs: task.total_runs,
            successful_runs: task.successful_runs,
            failed_runs: task.failed_runs,
        }
    }
}

fn not_found(id: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": format!("task '{id}' not found")}))).into_response()
}

/// `GET /v1/tasks`
pub async fn list_tasks(State(app): State<Application>) -> Response {
    match app.scheduler.list_tasks(None).await {
        Ok(tasks) => Json(tasks.iter().map(TaskView::from).collect::<Vec<_>>()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

/// `GET /v1/tasks/{id}`
pub async fn get_task(State(app): State<Application>, Path(id): Path<String>) -> Response {
    match app.scheduler.get_task(&id).await {
        Ok(Some(task)) => {
            let executions = app.scheduler.list_executions(&id, Some(50)).await.unwrap_or_default();
            Json(json!({
                "task": TaskView::from(&task),
                "executions": executions,
            }))
            .into_response()
        }
        Ok(None) => not_found(&id),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn set_enabled(app: Application, id: String, enabled: bool) -> Response {
    match app.scheduler.get_task(&id).await {
        Ok(Some(mut task)) => {
            task.enabled = enabled;
            match app.scheduler.upsert_task(task).await {
                Ok(()) => StatusCode::NO_CONTENT.into_response(),
                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
            }
        }
        Ok(None) => not_found(&id),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

/// `POST /v1/tasks/{id}/enable`
pub async fn enable_task(State(app): State<Application>, Path(id): Path<String>) -> Response {
    set_enabled(app, id, true).await
}

/// `POST /v1/tasks/{id}/disable`
pub async fn disable_task(State(app): State<Application>, Path(id): Path<String>) -> Response {
    set_enabled(app, id, false).await
}

/// `DELETE /v1/tasks/{id}`
pub async fn delete_task(State(app): State<Application>, Path(id): Path<String>) -> Response {
    match app.scheduler.delete_task(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}
