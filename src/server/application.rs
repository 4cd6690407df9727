//! Explicit `Application` value (§9 design note): replaces the "global
//! manager singletons" pattern (config, MCP bridge, agent manager,
//! scheduler as module-level statics) with one value built once at process
//! init and threaded through construction — axum's `State` extractor, the
//! Scheduler's second ingress path, and the Session Hub all share it by
//! cloning the `Arc`s it holds rather than reaching for globals.

use std::sync::Arc;
use std::time::Duration;

use crate::agents::registry::{AgentRegistry, DriverFactory};
use crate::agents::response_cache::ResponseCache;
use crate::config::Config;
use crate::errors::{ConfigError, SchedulerError};
use crate::scheduler::{build_store, Scheduler};
use crate::server::hub::SessionHub;

/// Shared application state. Cheap to clone: every field is an `Arc`.
#[derive(Clone)]
pub struct Application {
    pub registry: Arc<AgentRegistry>,
    pub response_cache: Arc<ResponseCache>,
    pub scheduler: Arc<Scheduler>,
    pub hub: Arc<SessionHub>,
}

impl Application {
    /// Validate `config`, build the Agent Registry (which in turn builds
    /// the MCP Router and every enabled agent's adapter), open the
    /// configured Task Store, and wire the Scheduler and Session Hub on
    /// top. Does not start the scheduler's tick loop — call `start()`.
    pub async fn build(config: Config, driver_factory: Arc<dyn DriverFactory>) -> Result<Self, ConfigError> {
        let response_cache = Arc::new(ResponseCache::new(Duration::from_secs(config.application.response_cache_ttl_secs)));
        let outbound_queue_capacity = config.application.outbound_queue_capacity;
        let shutdown_grace = Duration::from_secs(config.application.scheduler_shutdown_grace_secs);
        let task_store_config = config.application.task_store.clone();

        let registry = Arc::new(AgentRegistry::build(config, driver_factory)?);

        let store = build_store(&task_store_config).await.map_err(|e| ConfigError::Invalid {
            message: format!("failed to open task store: {e}"),
        })?;
        let scheduler = Arc::new(Scheduler::new(store, registry.clone(), shutdown_grace));
        let hub = Arc::new(SessionHub::new(outbound_queue_capacity));

        Ok(Self { registry, response_cache, scheduler, hub })
    }

    /// Load and arm every persisted task, recovering any that crashed
    /// mid-execution (§4.12 "On start()").
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler.start().await
    }

    /// Disarm the scheduler, wait for in-flight executions, then close
    /// every tool session the registry's router owns.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.registry.shutdown().await;
    }
}
