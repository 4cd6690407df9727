//! Agent Registry (C9).
//!
//! Loads declarative configuration, enforces the §3 compatibility
//! invariant (via `Config::validate`), and instantiates exactly one
//! adapter per enabled agent, looked up by name. `rebuild()` replaces the
//! whole set atomically; tool sessions for unchanged Tool Server
//! Definitions are carried forward rather than reconnected
//! (`McpRouter::rebuild`).

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::agents::adapters::native::NativeModelDriver;
use crate::agents::adapters::wrapper::FunctionCallModel;
use crate::agents::adapters::{AgentAdapter, NativeAdapter, WrapperAdapter};
use crate::config::{AgentDefinition, Config, SdkFamily, SdkHint};
use crate::errors::ConfigError;
use crate::mcp::router::McpRouter;

/// Builds the model-facing collaborator for one agent's bound model.
/// Implementations live alongside concrete model SDK integrations
/// (`llms::providers::*`); the registry only needs to know how to obtain
/// one, not how it talks to a given vendor API.
pub trait DriverFactory: Send + Sync {
    fn native_driver(&self, model_id: &str) -> Result<Arc<dyn NativeModelDriver>, ConfigError>;
    fn function_call_model(&self, model_id: &str) -> Result<Arc<dyn FunctionCallModel>, ConfigError>;
}

/// Resolve an agent's effective binding family: an explicit `sdk_hint`
/// wins, otherwise it follows the bound model's own `sdk_family` (§3).
fn effective_sdk_family(agent: &AgentDefinition, model_family: SdkFamily) -> SdkFamily {
    match agent.sdk_hint {
        SdkHint::NativeMcp => SdkFamily::NativeMcp,
        SdkHint::FunctionCall => SdkFamily::FunctionCall,
        SdkHint::Auto => model_family,
    }
}

/// Owns the live `Config`, the `McpRouter` all adapters borrow sessions
/// from, and one constructed adapter per enabled agent (§4.9).
pub struct AgentRegistry {
    config: RwLock<Arc<Config>>,
    router: RwLock<Arc<McpRouter>>,
    driver_factory: Arc<dyn DriverFactory>,
    adapters: DashMap<String, Arc<dyn AgentAdapter>>,
}

impl AgentRegistry {
    /// Validate `config`, connect a fresh `McpRouter`, and eagerly
    /// construct every enabled agent's adapter.
    pub fn build(config: Config, driver_factory: Arc<dyn DriverFactory>) -> Result<Self, ConfigError> {
        config.validate()?;
        let router = Arc::new(McpRouter::new(config.tool_servers.clone()));
        let adapters = build_adapters(&config, &router, &driver_factory)?;

        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            router: RwLock::new(router),
            driver_factory,
            adapters,
        })
    }

    /// Look up the adapter for an enabled agent by name (§4.9, data flow
    /// §1: the Session Hub and Scheduler both call this).
    pub fn get(&self, agent_name: &str) -> Option<Arc<dyn AgentAdapter>> {
        self.adapters.get(agent_name).map(|entry| entry.clone())
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.adapters.iter().map(|e| e.key().clone()).collect()
    }

    /// Atomically replace every agent's adapter from `new_config`. Tool
    /// sessions for unchanged Tool Server Definitions are reused
    /// (`McpRouter::rebuild`); everything else reconnects lazily on next
    /// use (§4.9).
    pub fn rebuild(&self, new_config: Config) -> Result<(), ConfigError> {
        new_config.validate()?;
        let old_router = self.router.read().clone();
        let new_router = Arc::new(McpRouter::rebuild(&old_router, new_config.tool_servers.clone()));
        let new_adapters = build_adapters(&new_config, &new_router, &self.driver_factory)?;

        self.adapters.clear();
        for (name, adapter) in new_adapters {
            self.adapters.insert(name, adapter);
        }
        *self.router.write() = new_router;
        *self.config.write() = Arc::new(new_config);
        Ok(())
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    /// The live `McpRouter` current adapters borrow sessions from; exposed
    /// for ingress paths that need a tool server directly (the raw SSE
    /// tool-call endpoint, §6) rather than through an agent's binding.
    pub fn router(&self) -> Arc<McpRouter> {
        self.router.read().clone()
    }

    /// Tear down every tool session owned by the current router (shutdown
    /// path, §3 ownership rule: only the Router closes transports).
    pub async fn shutdown(&self) {
        let router = self.router.read().clone();
        router.close_all().await;
    }
}

fn build_adapters(
    config: &Config,
    router: &Arc<McpRouter>,
    driver_factory: &Arc<dyn DriverFactory>,
) -> Result<DashMap<String, Arc<dyn AgentAdapter>>, ConfigError> {
    let adapters = DashMap::new();
    for agent in &config.agents {
        if !agent.enabled {
            continue;
        }
        let model = config
            .models
            .iter()
            .find(|m| m.id == agent.model_id)
            .ok_or_else(|| ConfigError::Invalid {
                message: format!("agent '{}' references unknown model '{}'", agent.name, agent.model_id),
            })?
            .clone();

        let adapter: Arc<dyn AgentAdapter> = match effective_sdk_family(agent, model.sdk_family) {
            SdkFamily::NativeMcp => {
                let driver = driver_factory.native_driver(&model.id)?;
                Arc::new(NativeAdapter::new(agent.clone(), model, router.clone(), driver))
            }
            SdkFamily::FunctionCall => {
                let model_driver = driver_factory.function_call_model(&model.id)?;
                Arc::new(WrapperAdapter::new(agent.clone(), model, router.clone(), model_driver))
            }
        };
        adapters.insert(agent.name.clone(), adapter);
    }
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::adapters::native::DriverEvent;
    use crate::agents::adapters::wrapper::ModelTurn;
    use crate::agents::adapters::CancelSignal;
    use crate::agents::reasoning::HistoryTurn;
    use crate::config::{ApplicationConfig, ModelDefinition, ToolServerDefinition, ToolServerTransport};
    use crate::errors::RunError;
    use crate::mcp::client::MCPClient;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::{mpsc, Mutex};

    struct StubDriver;
    #[async_trait]
    impl NativeModelDriver for StubDriver {
        async fn run(
            &self,
            _system_prompt: &str,
            _history: &[HistoryTurn],
            _prompt: &str,
            _sessions: Vec<Arc<Mutex<MCPClient>>>,
            _cancel: CancelSignal,
            events: mpsc::Sender<DriverEvent>,
        ) -> Result<(), RunError> {
            events.send(DriverEvent::End("done".into())).await.ok();
            Ok(())
        }
    }

    struct StubFunctionModel;
    #[async_trait]
    impl FunctionCallModel for StubFunctionModel {
        async fn complete(
            &self,
            _system_prompt: &str,
            _messages: &[HistoryTurn],
            _tools: &[crate::mcp::catalog::FunctionCallSchema],
        ) -> Result<ModelTurn, RunError> {
            Ok(ModelTurn { reasoning: None, tool_calls: vec![], text: Some("ok".into()) })
        }
    }

    struct StubFactory;
    impl DriverFactory for StubFactory {
        fn native_driver(&self, _model_id: &str) -> Result<Arc<dyn NativeModelDriver>, ConfigError> {
            Ok(Arc::new(StubDriver))
        }
        fn function_call_model(&self, _model_id: &str) -> Result<Arc<dyn FunctionCallModel>, ConfigError> {
            Ok(Arc::new(StubFunctionModel))
        }
    }

    fn model(id: &str, family: SdkFamily) -> ModelDefinition {
        ModelDefinition {
            id: id.to_string(),
            provider_id: "test".to_string(),
            base_url: None,
            api_key_ref: None,
            supports_mcp: matches!(family, SdkFamily::NativeMcp),
            sdk_family: family,
            supports_extended_capabilities: HashMap::new(),
        }
    }

    fn agent(name: &str, model_id: &str, enabled: bool) -> AgentDefinition {
        AgentDefinition {
            name: name.to_string(),
            role: "tester".to_string(),
            description: String::new(),
            system_prompt: "be helpful".to_string(),
            model_id: model_id.to_string(),
            tool_servers: vec![],
            enabled,
            sdk_hint: SdkHint::Auto,
        }
    }

    fn base_config() -> Config {
        Config {
            agents: vec![
                agent("researcher", "claude", true),
                agent("summarizer", "deepseek", true),
                agent("disabled-one", "claude", false),
            ],
            models: vec![
                model("claude", SdkFamily::NativeMcp),
                model("deepseek", SdkFamily::FunctionCall),
            ],
            tool_servers: vec![],
            application: ApplicationConfig::default(),
        }
    }

    #[test]
    fn builds_one_adapter_per_enabled_agent() {
        let registry = AgentRegistry::build(base_config(), Arc::new(StubFactory)).unwrap();
        assert!(registry.get("researcher").is_some());
        assert!(registry.get("summarizer").is_some());
        assert!(registry.get("disabled-one").is_none());
        assert_eq!(registry.agent_names().len(), 2);
    }

    #[tokio::test]
    async fn native_agent_adapter_runs() {
        let registry = AgentRegistry::build(base_config(), Arc::new(StubFactory)).unwrap();
        let adapter = registry.get("researcher").unwrap();
        let (_tx, cancel) = crate::agents::adapters::new_cancel_signal();
        let response = adapter.run("hi", None, cancel).await.unwrap();
        assert_eq!(response.text, "done");
    }

    #[test]
    fn rebuild_reuses_unchanged_tool_sessions() {
        let mut config = base_config();
        config.tool_servers.push(ToolServerDefinition {
            name: "fs".to_string(),
            transport: ToolServerTransport::Stdio {
                command: "echo".to_string(),
                args: vec![],
                env: HashMap::new(),
                cwd: None,
            },
            wrap_as_functions: false,
            timeout_ms: 60_000,
            health_check_interval_ms: 30_000,
            allowed_tool_names: vec![],
            blocked_tool_names: vec![],
        });

        let registry = AgentRegistry::build(config.clone(), Arc::new(StubFactory)).unwrap();
        assert!(registry.rebuild(config).is_ok());
        assert_eq!(registry.agent_names().len(), 2);
    }

    #[test]
    fn rejects_config_that_fails_p1_validation() {
        let mut config = base_config();
        config.tool_servers.push(ToolServerDefinition {
            name: "fs".to_string(),
            transport: ToolServerTransport::Stdio {
                command: "echo".to_string(),
                args: vec![],
                env: HashMap::new(),
                cwd: None,
            },
            wrap_as_functions: false,
            timeout_ms: 60_000,
            health_check_interval_ms: 30_000,
            allowed_tool_names: vec![],
            blocked_tool_names: vec![],
        });
        config.agents.push(agent("bad", "deepseek", true));
        config.agents.last_mut().unwrap().tool_servers.push("fs".to_string());

        assert!(AgentRegistry::build(config, Arc::new(StubFactory)).is_err());
    }
}
