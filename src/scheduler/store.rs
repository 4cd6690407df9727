//! Task Store (C11): the pluggable persistence back-end for scheduled
//! tasks and their execution history.
//!
//! Two reference back-ends, selected by `config::TaskStoreBackendConfig`:
//! embedded SQLite (`rusqlite`, always available) and client/server
//! Postgres (`sqlx`, behind the `postgres` feature). Both speak the same
//! six-operation trait; `rusqlite` is synchronous, so its methods hop onto
//! `spawn_blocking` the way a blocking driver is bridged into an async
//! surface elsewhere in this codebase (`mcp::transports::stdio`'s child
//! process I/O).

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::scheduler::schedule::Schedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(TaskStatus::Idle),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(StoreError::OperationError { message: format!("unknown task status '{other}'") }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub agent_name: String,
    pub prompt: String,
    pub schedule: Schedule,
    pub repeat: bool,
    pub enabled: bool,
    pub status: TaskStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<TaskStatus>,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn new(
        id: String,
        name: String,
        agent_name: String,
        prompt: String,
        schedule: Schedule,
        repeat: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            description: None,
            agent_name,
            prompt,
            schedule,
            repeat,
            enabled: true,
            status: TaskStatus::Idle,
            last_run_at: None,
            next_run_at: None,
            last_status: None,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_succeeded(&self) -> bool {
        matches!(self.last_status, Some(TaskStatus::Succeeded))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionRecord {
    pub id: String,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Set when this record documents a trigger dropped because a prior
    /// execution of the same task was still in flight (§4.12).
    pub coalesced: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub agent_name: Option<String>,
    pub enabled: Option<bool>,
}

impl TaskFilter {
    fn matches(&self, task: &ScheduledTask) -> bool {
        if let Some(agent_name) = &self.agent_name {
            if &task.agent_name != agent_name {
                return false;
            }
        }
        if let Some(enabled) = self.enabled {
            if task.enabled != enabled {
                return false;
            }
        }
        true
    }
}

/// The six operations every Task Store back-end must expose (§4.11).
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn upsert_task(&self, task: &ScheduledTask) -> Result<(), StoreError>;
    async fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>, StoreError>;
    async fn list_tasks(&self, filter: Option<TaskFilter>) -> Result<Vec<ScheduledTask>, StoreError>;
    async fn delete_task(&self, id: &str) -> Result<(), StoreError>;
    async fn append_execution(&self, record: &TaskExecutionRecord) -> Result<(), StoreError>;
    async fn list_executions(&self, task_id: &str, limit: Option<u32>) -> Result<Vec<TaskExecutionRecord>, StoreError>;

    /// Crash recovery (§4.12): any task persisted as `running` is
    /// transitioned to `failed` with a synthetic execution record
    /// (`error="crash-recovered"`). Called once from `Scheduler::start()`.
    /// Returns the recovered tasks for logging.
    async fn recover_crashed_tasks(&self) -> Result<Vec<ScheduledTask>, StoreError>;
}

fn schedule_to_columns(schedule: &Schedule) -> (&'static str, String) {
    match schedule {
        Schedule::Cron(expr) => ("cron", expr.clone()),
        Schedule::Interval { seconds } => ("interval", seconds.to_string()),
        Schedule::Once(at) => ("once", at.to_rfc3339()),
    }
}

/// Parse a persisted RFC-3339 timestamp column, mapping a malformed value to
/// `StoreError` instead of panicking on corrupt data read back from disk.
fn parse_rfc3339_column(column: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::OperationError { message: format!("corrupt {column} timestamp '{value}': {e}") })
}

fn schedule_from_columns(kind: &str, value: &str) -> Result<Schedule, StoreError> {
    match kind {
        "cron" => Ok(Schedule::Cron(value.to_string())),
        "interval" => {
            let seconds = value.parse::<i64>().map_err(|e| StoreError::OperationError {
                message: format!("corrupt interval schedule '{value}': {e}"),
            })?;
            Ok(Schedule::Interval { seconds })
        }
        "once" => {
            let at = DateTime::parse_from_rfc3339(value)
                .map_err(|e| StoreError::OperationError { message: format!("corrupt once schedule '{value}': {e}") })?
                .with_timezone(&Utc);
            Ok(Schedule::Once(at))
        }
        other => Err(StoreError::OperationError { message: format!("unknown schedule kind '{other}'") }),
    }
}

// ---------------------------------------------------------------------------
// Embedded SQLite back-end
// ---------------------------------------------------------------------------

const SQLITE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    agent_name TEXT NOT NULL,
    prompt TEXT NOT NULL,
    schedule_kind TEXT NOT NULL,
    schedule_value TEXT NOT NULL,
    repeat INTEGER NOT NULL,
    enabled INTEGER NOT NULL,
    status TEXT NOT NULL,
    last_run_at TEXT,
    next_run_at TEXT,
    last_status TEXT,
    total_runs INTEGER NOT NULL,
    successful_runs INTEGER NOT NULL,
    failed_runs INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS task_executions (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL,
    output TEXT,
    error TEXT,
    coalesced INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_task_executions_task_id ON task_executions(task_id);
";

/// Single-connection embedded back-end (§4.11): one `rusqlite::Connection`
/// per scheduler process, guarded by a sync mutex and driven from
/// `spawn_blocking`.
pub struct SqliteTaskStore {
    conn: Arc<SyncMutex<rusqlite::Connection>>,
}

impl SqliteTaskStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(SQLITE_SCHEMA)?;
        Ok(Self { conn: Arc::new(SyncMutex::new(conn)) })
    }

    fn row_to_task(row: &rusqlite::Row) -> Result<(ScheduledTask, String, String), StoreError> {
        let schedule_kind: String = row.get("schedule_kind")?;
        let schedule_value: String = row.get("schedule_value")?;
        let last_run_at: Option<String> = row.get("last_run_at")?;
        let next_run_at: Option<String> = row.get("next_run_at")?;
        let last_status: Option<String> = row.get("last_status")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let status: String = row.get("status")?;

        let task = ScheduledTask {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            agent_name: row.get("agent_name")?,
            prompt: row.get("prompt")?,
            // placeholder; schedule filled in by the caller once it can
            // return a rusqlite::Error-compatible failure from parsing.
            schedule: Schedule::Interval { seconds: 0 },
            repeat: row.get::<_, i64>("repeat")? != 0,
            enabled: row.get::<_, i64>("enabled")? != 0,
            status: status.parse().unwrap_or(TaskStatus::Idle),
            last_run_at: last_run_at.as_deref().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|t| t.with_timezone(&Utc)),
            next_run_at: next_run_at.as_deref().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|t| t.with_timezone(&Utc)),
            last_status: last_status.as_deref().and_then(|s| s.parse().ok()),
            total_runs: row.get::<_, i64>("total_runs")? as u64,
            successful_runs: row.get::<_, i64>("successful_runs")? as u64,
            failed_runs: row.get::<_, i64>("failed_runs")? as u64,
            created_at: parse_rfc3339_column("created_at", &created_at)?,
            updated_at: parse_rfc3339_column("updated_at", &updated_at)?,
        };
        Ok((task, schedule_kind, schedule_value))
    }

    fn finish_task(row: Result<(ScheduledTask, String, String), StoreError>) -> Result<ScheduledTask, StoreError> {
        let (mut task, kind, value) = row?;
        task.schedule = schedule_from_columns(&kind, &value)?;
        Ok(task)
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn upsert_task(&self, task: &ScheduledTask) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let task = task.clone();
        tokio::task::spawn_blocking(move || {
            let (kind, value) = schedule_to_columns(&task.schedule);
            let guard = conn.lock();
            guard.execute(
                "INSERT INTO scheduled_tasks
                 (id, name, description, agent_name, prompt, schedule_kind, schedule_value, repeat, enabled, status,
                  last_run_at, next_run_at, last_status, total_runs, successful_runs, failed_runs, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    agent_name = excluded.agent_name,
                    prompt = excluded.prompt,
                    schedule_kind = excluded.schedule_kind,
                    schedule_value = excluded.schedule_value,
                    repeat = excluded.repeat,
                    enabled = excluded.enabled,
                    status = excluded.status,
                    last_run_at = excluded.last_run_at,
                    next_run_at = excluded.next_run_at,
                    last_status = excluded.last_status,
                    total_runs = excluded.total_runs,
                    successful_runs = excluded.successful_runs,
                    failed_runs = excluded.failed_runs,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    task.id,
                    task.name,
                    task.description,
                    task.agent_name,
                    task.prompt,
                    kind,
                    value,
                    task.repeat as i64,
                    task.enabled as i64,
                    task.status.as_str(),
                    task.last_run_at.map(|t| t.to_rfc3339()),
                    task.next_run_at.map(|t| t.to_rfc3339()),
                    task.last_status.map(|s| s.as_str().to_string()),
                    task.total_runs as i64,
                    task.successful_runs as i64,
                    task.failed_runs as i64,
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                ],
            )?;
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::OperationError { message: e.to_string() })?
    }

    async fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>, StoreError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut stmt = guard.prepare("SELECT * FROM scheduled_tasks WHERE id = ?1")?;
            let mut rows = stmt.query(rusqlite::params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(Self::finish_task(Self::row_to_task(row))?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| StoreError::OperationError { message: e.to_string() })?
    }

    async fn list_tasks(&self, filter: Option<TaskFilter>) -> Result<Vec<ScheduledTask>, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut stmt = guard.prepare("SELECT * FROM scheduled_tasks")?;
            let mut rows = stmt.query([])?;
            let mut tasks = Vec::new();
            while let Some(row) = rows.next()? {
                let task = Self::finish_task(Self::row_to_task(row))?;
                if filter.as_ref().map(|f| f.matches(&task)).unwrap_or(true) {
                    tasks.push(task);
                }
            }
            Ok::<_, StoreError>(tasks)
        })
        .await
        .map_err(|e| StoreError::OperationError { message: e.to_string() })?
    }

    async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            guard.execute("DELETE FROM task_executions WHERE task_id = ?1", rusqlite::params![id])?;
            guard.execute("DELETE FROM scheduled_tasks WHERE id = ?1", rusqlite::params![id])?;
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::OperationError { message: e.to_string() })?
    }

    async fn append_execution(&self, record: &TaskExecutionRecord) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            guard.execute(
                "INSERT INTO task_executions
                 (id, task_id, started_at, finished_at, status, output, error, coalesced)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    record.id,
                    record.task_id,
                    record.started_at.to_rfc3339(),
                    record.finished_at.map(|t| t.to_rfc3339()),
                    record.status.as_str(),
                    record.output,
                    record.error,
                    record.coalesced as i64,
                ],
            )?;
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::OperationError { message: e.to_string() })?
    }

    async fn list_executions(&self, task_id: &str, limit: Option<u32>) -> Result<Vec<TaskExecutionRecord>, StoreError> {
        let conn = self.conn.clone();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let limit = limit.unwrap_or(u32::MAX) as i64;
            let mut stmt = guard.prepare(
                "SELECT * FROM task_executions WHERE task_id = ?1 ORDER BY started_at DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![task_id, limit])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let status: String = row.get("status")?;
                let started_at: String = row.get("started_at")?;
                let finished_at: Option<String> = row.get("finished_at")?;
                records.push(TaskExecutionRecord {
                    id: row.get("id")?,
                    task_id: row.get("task_id")?,
                    started_at: parse_rfc3339_column("started_at", &started_at)?,
                    finished_at: finished_at.as_deref().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|t| t.with_timezone(&Utc)),
                    status: status.parse().unwrap_or(TaskStatus::Failed),
                    output: row.get("output")?,
                    error: row.get("error")?,
                    coalesced: row.get::<_, i64>("coalesced")? != 0,
                });
            }
            Ok::<_, StoreError>(records)
        })
        .await
        .map_err(|e| StoreError::OperationError { message: e.to_string() })?
    }

    async fn recover_crashed_tasks(&self) -> Result<Vec<ScheduledTask>, StoreError> {
        let running = self
            .list_tasks(None)
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Running)
            .collect::<Vec<_>>();

        for task in &running {
            let now = Utc::now();
            let mut recovered = task.clone();
            recovered.status = TaskStatus::Idle;
            recovered.last_status = Some(TaskStatus::Failed);
            recovered.last_run_at = Some(now);
            recovered.total_runs += 1;
            recovered.failed_runs += 1;
            recovered.updated_at = now;
            self.upsert_task(&recovered).await?;

            self.append_execution(&TaskExecutionRecord {
                id: uuid::Uuid::new_v4().to_string(),
                task_id: task.id.clone(),
                started_at: task.last_run_at.unwrap_or(now),
                finished_at: Some(now),
                status: TaskStatus::Failed,
                output: None,
                error: Some("crash-recovered".to_string()),
                coalesced: false,
            })
            .await?;
        }
        Ok(running)
    }
}

// ---------------------------------------------------------------------------
// Client/server Postgres back-end
// ---------------------------------------------------------------------------

#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use sqlx::{postgres::PgPoolOptions, PgPool, Row};

    const POSTGRES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS scheduled_tasks (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        agent_name TEXT NOT NULL,
        prompt TEXT NOT NULL,
        schedule_kind TEXT NOT NULL,
        schedule_value TEXT NOT NULL,
        repeat BOOLEAN NOT NULL,
        enabled BOOLEAN NOT NULL,
        status TEXT NOT NULL,
        last_run_at TIMESTAMPTZ,
        next_run_at TIMESTAMPTZ,
        last_status TEXT,
        total_runs BIGINT NOT NULL,
        successful_runs BIGINT NOT NULL,
        failed_runs BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    );
    CREATE TABLE IF NOT EXISTS task_executions (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL REFERENCES scheduled_tasks(id),
        started_at TIMESTAMPTZ NOT NULL,
        finished_at TIMESTAMPTZ,
        status TEXT NOT NULL,
        output TEXT,
        error TEXT,
        coalesced BOOLEAN NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_task_executions_task_id ON task_executions(task_id);
    ";

    /// Pooled client/server back-end (§4.11): `upsert_task`+`append_execution`
    /// run inside one transaction where both are updated by the same
    /// trigger firing (the Scheduler's own execution path).
    pub struct PostgresTaskStore {
        pool: PgPool,
    }

    impl PostgresTaskStore {
        pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?;
            sqlx::query(POSTGRES_SCHEMA).execute(&pool).await?;
            Ok(Self { pool })
        }

        fn row_to_task(row: &sqlx::postgres::PgRow) -> Result<ScheduledTask, StoreError> {
            let kind: String = row.try_get("schedule_kind")?;
            let value: String = row.try_get("schedule_value")?;
            let status: String = row.try_get("status")?;
            let last_status: Option<String> = row.try_get("last_status")?;
            Ok(ScheduledTask {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                agent_name: row.try_get("agent_name")?,
                prompt: row.try_get("prompt")?,
                schedule: schedule_from_columns(&kind, &value)?,
                repeat: row.try_get("repeat")?,
                enabled: row.try_get("enabled")?,
                status: status.parse().unwrap_or(TaskStatus::Idle),
                last_run_at: row.try_get("last_run_at")?,
                next_run_at: row.try_get("next_run_at")?,
                last_status: last_status.as_deref().and_then(|s| s.parse().ok()),
                total_runs: row.try_get::<i64, _>("total_runs")? as u64,
                successful_runs: row.try_get::<i64, _>("successful_runs")? as u64,
                failed_runs: row.try_get::<i64, _>("failed_runs")? as u64,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        }
    }

    #[async_trait]
    impl TaskStore for PostgresTaskStore {
        async fn upsert_task(&self, task: &ScheduledTask) -> Result<(), StoreError> {
            let (kind, value) = schedule_to_columns(&task.schedule);
            sqlx::query(
                "INSERT INTO scheduled_tasks
                 (id, name, description, agent_name, prompt, schedule_kind, schedule_value, repeat, enabled, status,
                  last_run_at, next_run_at, last_status, total_runs, successful_runs, failed_runs, created_at, updated_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
                 ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    description = EXCLUDED.description,
                    agent_name = EXCLUDED.agent_name,
                    prompt = EXCLUDED.prompt,
                    schedule_kind = EXCLUDED.schedule_kind,
                    schedule_value = EXCLUDED.schedule_value,
                    repeat = EXCLUDED.repeat,
                    enabled = EXCLUDED.enabled,
                    status = EXCLUDED.status,
                    last_run_at = EXCLUDED.last_run_at,
                    next_run_at = EXCLUDED.next_run_at,
                    last_status = EXCLUDED.last_status,
                    total_runs = EXCLUDED.total_runs,
                    successful_runs = EXCLUDED.successful_runs,
                    failed_runs = EXCLUDED.failed_runs,
                    updated_at = EXCLUDED.updated_at",
            )
            .bind(&task.id)
            .bind(&task.name)
            .bind(&task.description)
            .bind(&task.agent_name)
            .bind(&task.prompt)
            .bind(kind)
            .bind(value)
            .bind(task.repeat)
            .bind(task.enabled)
            .bind(task.status.as_str())
            .bind(task.last_run_at)
            .bind(task.next_run_at)
            .bind(task.last_status.map(|s| s.as_str().to_string()))
            .bind(task.total_runs as i64)
            .bind(task.successful_runs as i64)
            .bind(task.failed_runs as i64)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>, StoreError> {
            let row = sqlx::query("SELECT * FROM scheduled_tasks WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(Self::row_to_task).transpose()
        }

        async fn list_tasks(&self, filter: Option<TaskFilter>) -> Result<Vec<ScheduledTask>, StoreError> {
            let rows = sqlx::query("SELECT * FROM scheduled_tasks").fetch_all(&self.pool).await?;
            rows.iter()
                .map(Self::row_to_task)
                .collect::<Result<Vec<_>, _>>()
                .map(|tasks| {
                    tasks
                        .into_iter()
                        .filter(|t| filter.as_ref().map(|f| f.matches(t)).unwrap_or(true))
                        .collect()
                })
        }

        async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM task_executions WHERE task_id = $1").bind(id).execute(&mut *tx).await?;
            sqlx::query("DELETE FROM scheduled_tasks WHERE id = $1").bind(id).execute(&mut *tx).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn append_execution(&self, record: &TaskExecutionRecord) -> Result<(), StoreError> {
            sqlx::query(
                "INSERT INTO task_executions
                 (id, task_id, started_at, finished_at, status, output, error, coalesced)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
            )
            .bind(&record.id)
            .bind(&record.task_id)
            .bind(record.started_at)
            .bind(record.finished_at)
            .bind(record.status.as_str())
            .bind(&record.output)
            .bind(&record.error)
            .bind(record.coalesced)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_executions(&self, task_id: &str, limit: Option<u32>) -> Result<Vec<TaskExecutionRecord>, StoreError> {
            let limit = limit.unwrap_or(u32::MAX) as i64;
            let rows = sqlx::query(
                "SELECT * FROM task_executions WHERE task_id = $1 ORDER BY started_at DESC LIMIT $2",
            )
            .bind(task_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter()
                .map(|row| {
                    let status: String = row.try_get("status")?;
                    Ok(TaskExecutionRecord {
                        id: row.try_get("id")?,
                        task_id: row.try_get("task_id")?,
                        started_at: row.try_get("started_at")?,
                        finished_at: row.try_get("finished_at")?,
                        status: status.parse().unwrap_or(TaskStatus::Failed),
                        output: row.try_get("output")?,
                        error: row.try_get("error")?,
                        coalesced: row.try_get("coalesced")?,
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()
        }

        async fn recover_crashed_tasks(&self) -> Result<Vec<ScheduledTask>, StoreError> {
            let running = self
                .list_tasks(None)
                .await?
                .into_iter()
                .filter(|t| t.status == TaskStatus::Running)
                .collect::<Vec<_>>();

            for task in &running {
                let now = Utc::now();
                let mut recovered = task.clone();
                recovered.status = TaskStatus::Idle;
                recovered.last_status = Some(TaskStatus::Failed);
                recovered.last_run_at = Some(now);
                recovered.total_runs += 1;
                recovered.failed_runs += 1;
                recovered.updated_at = now;

                let mut tx = self.pool.begin().await?;
                sqlx::query(
                    "UPDATE scheduled_tasks SET status=$2, last_status=$3, last_run_at=$4, total_runs=$5, failed_runs=$6, updated_at=$7 WHERE id=$1",
                )
                .bind(&recovered.id)
                .bind(recovered.status.as_str())
                .bind(recovered.last_status.map(|s| s.as_str().to_string()))
                .bind(recovered.last_run_at)
                .bind(recovered.total_runs as i64)
                .bind(recovered.failed_runs as i64)
                .bind(recovered.updated_at)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "INSERT INTO task_executions (id, task_id, started_at, finished_at, status, output, error, coalesced)
                     VALUES ($1,$2,$3,$4,$5,NULL,$6,false)",
                )
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(&task.id)
                .bind(task.last_run_at.unwrap_or(now))
                .bind(now)
                .bind(TaskStatus::Failed.as_str())
                .bind("crash-recovered")
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
            }
            Ok(running)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(id: &str) -> ScheduledTask {
        ScheduledTask::new(
            id.to_string(),
            format!("task {id}"),
            "researcher".to_string(),
            "say hi".to_string(),
            Schedule::Interval { seconds: 60 },
            true,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = SqliteTaskStore::open(":memory:").unwrap();
        let task = sample_task("t1");
        store.upsert_task(&task).await.unwrap();
        let fetched = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(fetched.agent_name, "researcher");
        assert_eq!(fetched.schedule, Schedule::Interval { seconds: 60 });
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_conflict() {
        let store = SqliteTaskStore::open(":memory:").unwrap();
        let mut task = sample_task("t1");
        store.upsert_task(&task).await.unwrap();
        task.total_runs = 5;
        store.upsert_task(&task).await.unwrap();
        let fetched = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(fetched.total_runs, 5);
        assert_eq!(store.list_tasks(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_tasks_filters_by_agent_name() {
        let store = SqliteTaskStore::open(":memory:").unwrap();
        store.upsert_task(&sample_task("t1")).await.unwrap();
        let mut other = sample_task("t2");
        other.agent_name = "summarizer".to_string();
        store.upsert_task(&other).await.unwrap();

        let filtered = store
            .list_tasks(Some(TaskFilter { agent_name: Some("summarizer".to_string()), enabled: None }))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "t2");
    }

    #[tokio::test]
    async fn delete_task_removes_task_and_executions() {
        let store = SqliteTaskStore::open(":memory:").unwrap();
        let task = sample_task("t1");
        store.upsert_task(&task).await.unwrap();
        store
            .append_execution(&TaskExecutionRecord {
                id: "e1".to_string(),
                task_id: "t1".to_string(),
                started_at: Utc::now(),
                finished_at: Some(Utc::now()),
                status: TaskStatus::Succeeded,
                output: Some("done".to_string()),
                error: None,
                coalesced: false,
            })
            .await
            .unwrap();

        store.delete_task("t1").await.unwrap();
        assert!(store.get_task("t1").await.unwrap().is_none());
        assert!(store.list_executions("t1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_executions_orders_most_recent_first_and_respects_limit() {
        let store = SqliteTaskStore::open(":memory:").unwrap();
        store.upsert_task(&sample_task("t1")).await.unwrap();
        for i in 0..3 {
            store
                .append_execution(&TaskExecutionRecord {
                    id: format!("e{i}"),
                    task_id: "t1".to_string(),
                    started_at: Utc::now() + chrono::Duration::seconds(i),
                    finished_at: None,
                    status: TaskStatus::Succeeded,
                    output: None,
                    error: None,
                    coalesced: false,
                })
                .await
                .unwrap();
        }
        let records = store.list_executions("t1", Some(2)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "e2");
    }

    #[tokio::test]
    async fn recover_crashed_tasks_fails_running_tasks() {
        let store = SqliteTaskStore::open(":memory:").unwrap();
        let mut task = sample_task("t1");
        task.status = TaskStatus::Running;
        store.upsert_task(&task).await.unwrap();

        let recovered = store.recover_crashed_tasks().await.unwrap();
        assert_eq!(recovered.len(), 1);

        let fetched = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Idle);
        assert_eq!(fetched.last_status, Some(TaskStatus::Failed));

        let executions = store.list_executions("t1", None).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].error.as_deref(), Some("crash-recovered"));
    }
}
