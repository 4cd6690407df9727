//! Scheduler (C12): the second ingress path into the Agent Registry,
//! triggered by time instead of a client request (§4.12).
//!
//! One execution per task is ever in flight; `stop()` waits up to a grace
//! period for in-flight runs before cancelling them through the same
//! `CancelSignal` an HTTP- or WebSocket-triggered run would receive.

pub mod schedule;
pub mod store;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agents::adapters::new_cancel_signal;
use crate::agents::registry::AgentRegistry;
use crate::errors::SchedulerError;

pub use schedule::{Schedule, ScheduleContext};
pub use store::{ScheduledTask, TaskExecutionRecord, TaskFilter, TaskStatus, TaskStore};

const TICK: StdDuration = StdDuration::from_secs(1);

struct TaskRuntime {
    task: ScheduledTask,
    next_fire: Option<chrono::DateTime<Utc>>,
}

/// Owns the authoritative in-memory view of scheduled tasks and drives
/// their triggers; the Task Store is the source of truth across restarts,
/// this struct is the source of truth for "is a trigger due right now."
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    registry: Arc<AgentRegistry>,
    runtime: DashMap<String, TaskRuntime>,
    running: DashMap<String, watch::Sender<bool>>,
    shutdown_grace: StdDuration,
    stopping: Arc<watch::Sender<bool>>,
    tick_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<AgentRegistry>, shutdown_grace: StdDuration) -> Self {
        let (stopping_tx, _rx) = watch::channel(false);
        Self {
            store,
            registry,
            runtime: DashMap::new(),
            running: DashMap::new(),
            shutdown_grace,
            stopping: Arc::new(stopping_tx),
            tick_handle: AsyncMutex::new(None),
        }
    }

    /// Crash-recover, load every task, arm initial triggers, and spawn the
    /// tick loop (§4.12 "On start()").
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        self.store.recover_crashed_tasks().await?;

        for task in self.store.list_tasks(None).await? {
            self.arm(task).await?;
        }

        self.stopping.send_replace(false);
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            loop {
                ticker.tick().await;
                if *this.stopping.borrow() {
                    break;
                }
                this.tick().await;
            }
        });
        *self.tick_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Disarm new triggers, wait up to `shutdown_grace` for in-flight
    /// executions to finish naturally, then cancel whatever remains and
    /// mark it `cancelled` (§4.12 "Shutdown").
    pub async fn stop(&self) {
        self.stopping.send_replace(true);
        if let Some(handle) = self.tick_handle.lock().await.take() {
            handle.abort();
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        while !self.running.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(StdDuration::from_millis(100)).await;
        }

        for entry in self.running.iter() {
            let _ = entry.value().send(true);
        }
    }

    /// Persist and arm a new or updated task.
    pub async fn upsert_task(&self, task: ScheduledTask) -> Result<(), SchedulerError> {
        self.store.upsert_task(&task).await?;
        self.arm(task).await?;
        Ok(())
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), SchedulerError> {
        self.store.delete_task(id).await?;
        self.runtime.remove(id);
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>, SchedulerError> {
        Ok(self.store.get_task(id).await?)
    }

    pub async fn list_tasks(&self, filter: Option<TaskFilter>) -> Result<Vec<ScheduledTask>, SchedulerError> {
        Ok(self.store.list_tasks(filter).await?)
    }

    pub async fn list_executions(&self, task_id: &str, limit: Option<u32>) -> Result<Vec<TaskExecutionRecord>, SchedulerError> {
        Ok(self.store.list_executions(task_id, limit).await?)
    }

    /// Compute and persist this task's next fire instant, then hold it in the
    /// in-memory runtime (§4.12 "arm"). The store write keeps `next_run_at`
    /// visible to `GET /v1/tasks` in sync with the trigger the scheduler is
    /// actually honoring, not just whatever was last known at upsert time.
    async fn arm(&self, mut task: ScheduledTask) -> Result<(), SchedulerError> {
        let next_fire = if task.enabled {
            task.schedule.next_fire(ScheduleContext {
                now: Utc::now(),
                last_run_at: task.last_run_at,
                has_succeeded: task.has_succeeded(),
            })?
        } else {
            None
        };
        task.next_run_at = next_fire;
        let _ = self.store.upsert_task(&task).await;
        self.runtime.insert(task.id.clone(), TaskRuntime { task, next_fire });
        Ok(())
    }

    async fn tick(self: &Arc<Self>) {
        let now = Utc::now();
        let due: Vec<String> = self
            .runtime
            .iter()
            .filter(|e| e.value().task.enabled && e.value().next_fire.map(|t| t <= now).unwrap_or(false))
            .map(|e| e.key().clone())
            .collect();

        for task_id in due {
            if self.running.contains_key(&task_id) {
                self.record_coalesced(&task_id).await;
                continue;
            }
            let (cancel_tx, cancel_rx) = new_cancel_signal();
            self.running.insert(task_id.clone(), cancel_tx);

            let this = self.clone();
            tokio::spawn(async move {
                this.execute(task_id.clone(), cancel_rx).await;
                this.running.remove(&task_id);
            });
        }
    }

    async fn record_coalesced(&self, task_id: &str) {
        tracing::warn!(task_id, "scheduler trigger coalesced: prior execution still running");
        let _ = self
            .store
            .append_execution(&TaskExecutionRecord {
                id: Uuid::new_v4().to_string(),
                task_id: task_id.to_string(),
                started_at: Utc::now(),
                finished_at: Some(Utc::now()),
                status: TaskStatus::Cancelled,
                output: None,
                error: None,
                coalesced: true,
            })
            .await;
        // Push the in-memory trigger forward so the next tick doesn't
        // immediately re-coalesce against the same still-running execution.
        let rearmed = self.runtime.get_mut(task_id).and_then(|mut entry| {
            match entry.task.schedule.next_fire(ScheduleContext {
                now: Utc::now(),
                last_run_at: Some(Utc::now()),
                has_succeeded: entry.task.has_succeeded(),
            }) {
                Ok(Some(next)) => {
                    entry.next_fire = Some(next);
                    entry.task.next_run_at = Some(next);
                    Some(entry.task.clone())
                }
                _ => None,
            }
        });
        if let Some(task) = rearmed {
            let _ = self.store.upsert_task(&task).await;
        }
    }

    #[tracing::instrument(skip(self, cancel), fields(task_id = %task_id))]
    async fn execute(self: &Arc<Self>, task_id: String, cancel: crate::agents::adapters::CancelSignal) {
        let Some(mut task) = self.store.get_task(&task_id).await.ok().flatten() else { return };
        let started_at = Utc::now();
        task.status = TaskStatus::Running;
        task.updated_at = started_at;
        if self.store.upsert_task(&task).await.is_err() {
            return;
        }

        let outcome = match self.registry.get(&task.agent_name) {
            Some(adapter) => adapter.run(&task.prompt, None, cancel).await,
            None => Err(crate::errors::RunError::ModelError {
                message: format!("no registered agent named '{}'", task.agent_name),
            }),
        };

        let finished_at = Utc::now();
        let (status, output, error) = match outcome {
            Ok(response) => (TaskStatus::Succeeded, Some(response.text), None),
            Err(crate::errors::RunError::Cancelled) => (TaskStatus::Cancelled, None, Some("cancelled".to_string())),
            Err(e) => (TaskStatus::Failed, None, Some(e.to_string())),
        };

        task.status = TaskStatus::Idle;
        task.last_run_at = Some(finished_at);
        task.last_status = Some(status);
        task.total_runs += 1;
        match status {
            TaskStatus::Succeeded => task.successful_runs += 1,
            TaskStatus::Failed => task.failed_runs += 1,
            _ => {}
        }
        task.updated_at = finished_at;
        if !task.repeat {
            task.next_run_at = None;
        }
        let _ = self.store.upsert_task(&task).await;

        let _ = self
            .store
            .append_execution(&TaskExecutionRecord {
                id: Uuid::new_v4().to_string(),
                task_id: task_id.clone(),
                started_at,
                finished_at: Some(finished_at),
                status,
                output,
                error,
                coalesced: false,
            })
            .await;

        if task.repeat {
            let _ = self.arm(task).await;
        } else {
            self.runtime.remove(&task_id);
        }
    }
}

/// Build a store from `config::TaskStoreBackendConfig` (§4.11 back-end
/// selection).
pub async fn build_store(backend: &crate::config::TaskStoreBackendConfig) -> Result<Arc<dyn TaskStore>, SchedulerError> {
    match backend {
        crate::config::TaskStoreBackendConfig::Embedded { path } => {
            Ok(Arc::new(store::SqliteTaskStore::open(path).map_err(SchedulerError::Store)?))
        }
        #[cfg(feature = "postgres")]
        crate::config::TaskStoreBackendConfig::ClientServer { database_url } => Ok(Arc::new(
            store::postgres::PostgresTaskStore::connect(database_url)
                .await
                .map_err(SchedulerError::Store)?,
        )),
        #[cfg(not(feature = "postgres"))]
        crate::config::TaskStoreBackendConfig::ClientServer { .. } => {
            Err(SchedulerError::Store(crate::errors::StoreError::OperationError {
                message: "client/server task store requires building with --features postgres".to_string(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::adapters::{AgentAdapter, CancelSignal};
    use crate::agents::reasoning::FinalResponse;
    use crate::config::{ApplicationConfig, Config};
    use crate::errors::RunError;
    use async_trait::async_trait;

    struct EchoAdapter;
    #[async_trait]
    impl AgentAdapter for EchoAdapter {
        async fn run(&self, prompt: &str, _session_id: Option<&str>, _cancel: CancelSignal) -> Result<FinalResponse, RunError> {
            Ok(FinalResponse { text: format!("echo: {prompt}"), finish_reason: crate::agents::reasoning::FinishReason::Stop })
        }
    }

    struct StubFactory;
    impl crate::agents::registry::DriverFactory for StubFactory {
        fn native_driver(&self, _model_id: &str) -> Result<Arc<dyn crate::agents::adapters::native::NativeModelDriver>, crate::errors::ConfigError> {
            unreachable!("test only registers function-call agents")
        }
        fn function_call_model(&self, _model_id: &str) -> Result<Arc<dyn crate::agents::adapters::wrapper::FunctionCallModel>, crate::errors::ConfigError> {
            unreachable!("registry is populated manually in this test")
        }
    }

    fn empty_registry() -> Arc<AgentRegistry> {
        Arc::new(AgentRegistry::build(Config { application: ApplicationConfig::default(), ..Default::default() }, Arc::new(StubFactory)).unwrap())
    }

    #[tokio::test]
    async fn due_task_executes_and_reschedules_when_repeating() {
        let store: Arc<dyn TaskStore> = Arc::new(store::SqliteTaskStore::open(":memory:").unwrap());
        let registry = empty_registry();
        registry
            .get("missing-agent") // sanity: registry starts empty
            .map(|_| unreachable!());

        let scheduler = Arc::new(Scheduler::new(store.clone(), registry.clone(), StdDuration::from_secs(1)));
        assert!(registry.get("ghost-agent").is_none());
        let task = ScheduledTask::new(
            "t1".to_string(),
            "ghost task".to_string(),
            "ghost-agent".to_string(),
            "hi".to_string(),
            Schedule::Interval { seconds: 60 },
            true,
            Utc::now(),
        );
        scheduler.upsert_task(task).await.unwrap();

        scheduler.execute("t1".to_string(), new_cancel_signal().1).await;

        let persisted = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(persisted.last_status, Some(TaskStatus::Failed));
        assert_eq!(persisted.total_runs, 1);
        assert_eq!(persisted.successful_runs, 0);
        assert!(scheduler.runtime.contains_key("t1"));
    }

    #[tokio::test]
    async fn non_repeating_task_is_retired_after_one_run() {
        let store: Arc<dyn TaskStore> = Arc::new(store::SqliteTaskStore::open(":memory:").unwrap());
        let registry = empty_registry();
        let scheduler = Arc::new(Scheduler::new(store.clone(), registry, StdDuration::from_secs(1)));
        let task = ScheduledTask::new(
            "t1".to_string(),
            "ghost task".to_string(),
            "ghost-agent".to_string(),
            "hi".to_string(),
            Schedule::Once(Utc::now()),
            false,
            Utc::now(),
        );
        scheduler.upsert_task(task).await.unwrap();
        scheduler.execute("t1".to_string(), new_cancel_signal().1).await;
        assert!(!scheduler.runtime.contains_key("t1"));
    }
}
