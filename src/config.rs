//! Declarative configuration for the agent execution core (§3, §6 A.3).
//!
//! Four YAML documents — agents, models/providers, tool servers, application
//! — are loaded with `serde_yaml` into the data-model structs of spec §3.
//! `${VAR}`/`$VAR` occurrences in the raw source are substituted from the
//! process environment before parsing. Everything here is data: no
//! decorator registration, no global singleton — callers build one `Config`
//! value and thread it through construction (§9).

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Model Definition (§3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SdkFamily {
    NativeMcp,
    FunctionCall,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelDefinition {
    pub id: String,
    pub provider_id: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_ref: Option<String>,
    #[serde(default)]
    pub supports_mcp: bool,
    pub sdk_family: SdkFamily,
    #[serde(default)]
    pub supports_extended_capabilities: HashMap<String, bool>,
}

// ---------------------------------------------------------------------------
// Tool Server Definition (§3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ToolServerTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolServerDefinition {
    pub name: String,
    #[serde(flatten)]
    pub transport: ToolServerTransport,
    /// When true, exposed as a function-call schema even to native-MCP
    /// models. When false, only `supports_mcp` models may bind it.
    #[serde(default)]
    pub wrap_as_functions: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Static allow-list (empty = no restriction), feeds `mcp::filters`.
    #[serde(default)]
    pub allowed_tool_names: Vec<String>,
    /// Static block-list, takes precedence over the allow-list.
    #[serde(default)]
    pub blocked_tool_names: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

// ---------------------------------------------------------------------------
// Agent Definition (§3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SdkHint {
    NativeMcp,
    FunctionCall,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    pub model_id: String,
    #[serde(default)]
    pub tool_servers: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub sdk_hint: SdkHint,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Application config (A.3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub response_cache_ttl_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub scheduler_shutdown_grace_secs: u64,
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default)]
    pub task_store: TaskStoreBackendConfig,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            response_cache_ttl_secs: default_cache_ttl_secs(),
            scheduler_shutdown_grace_secs: default_shutdown_grace_secs(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            task_store: TaskStoreBackendConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_cache_ttl_secs() -> u64 {
    600
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_outbound_queue_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum TaskStoreBackendConfig {
    Embedded { path: String },
    ClientServer { database_url: String },
}

impl Default for TaskStoreBackendConfig {
    fn default() -> Self {
        TaskStoreBackendConfig::Embedded {
            path: "tasks.sqlite".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate config + validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub agents: Vec<AgentDefinition>,
    pub models: Vec<ModelDefinition>,
    pub tool_servers: Vec<ToolServerDefinition>,
    pub application: ApplicationConfig,
}

impl Config {
    /// Load the four configuration documents from disk, substituting
    /// `${VAR}`/`$VAR` from the environment before parsing each one, then
    /// validate the §3 compatibility invariant across the whole set.
    pub fn load(
        agents_path: impl AsRef<Path>,
        models_path: impl AsRef<Path>,
        tool_servers_path: impl AsRef<Path>,
        application_path: impl AsRef<Path>,
    ) -> Result<Config, ConfigError> {
        let agents: Vec<AgentDefinition> = parse_yaml_file(agents_path)?;
        let models: Vec<ModelDefinition> = parse_yaml_file(models_path)?;
        let tool_servers: Vec<ToolServerDefinition> = parse_yaml_file(tool_servers_path)?;
        let application: ApplicationConfig = parse_yaml_file(application_path)?;

        let config = Config {
            agents,
            models,
            tool_servers,
            application,
        };
        config.validate()?;
        Ok(config)
    }

    /// P1 — Compatibility gate: for every agent's (model, tool-server)
    /// pairs, `model.supports_mcp ∨ tool_server.wrap_as_functions` must
    /// hold. The illegal combination aborts startup; the legal-but-suboptimal
    /// combination (`supports_mcp ∧ wrap_as_functions`) only logs a warning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for agent in &self.agents {
            if !agent.enabled {
                continue;
            }
            let model = self.models.iter().find(|m| m.id == agent.model_id).ok_or_else(|| {
                ConfigError::Invalid {
                    message: format!(
                        "agent '{}' references unknown model '{}'",
                        agent.name, agent.model_id
                    ),
                }
            })?;

            for server_name in &agent.tool_servers {
                let server = self
                    .tool_servers
                    .iter()
                    .find(|t| &t.name == server_name)
                    .ok_or_else(|| ConfigError::Invalid {
                        message: format!(
                            "agent '{}' references unknown tool server '{server_name}'",
                            agent.name
                        ),
                    })?;

                match (model.supports_mcp, server.wrap_as_functions) {
                    (false, false) => {
                        return Err(ConfigError::Invalid {
                            message: format!(
                                "agent '{}' binds model '{}' (supports_mcp=false) to tool \
                                 server '{}' (wrap_as_functions=false) — no viable binding",
                                agent.name, model.id, server_name
                            ),
                        });
                    }
                    (true, true) => {
                        log::warn!(
                            "agent '{}': model '{}' supports MCP natively but tool server \
                             '{}' also sets wrap_as_functions=true; native binding would be \
                             more efficient",
                            agent.name,
                            model.id,
                            server_name
                        );
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// `${VAR}` / `$VAR` substitution
// ---------------------------------------------------------------------------

static VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// Substitute `${VAR}` and `$VAR` occurrences from the process environment.
/// Unresolved variables are left as empty strings (a missing one is almost
/// always a startup misconfiguration surfaced downstream as `ConfigError`
/// from schema validation, not a codec panic here).
pub fn substitute_env_vars(source: &str) -> String {
    VAR_PATTERN
        .replace_all(source, |caps: &regex::Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).unwrap().as_str();
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}

fn parse_yaml_file<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path_ref = path.as_ref();
    let raw = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
        path: path_ref.display().to_string(),
        source,
    })?;
    let substituted = substitute_env_vars(&raw);
    serde_yaml::from_str(&substituted).map_err(|source| ConfigError::Parse {
        path: path_ref.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_braced_and_bare_vars() {
        std::env::set_var("CONFIG_TEST_TOKEN", "secret123");
        let out = substitute_env_vars("api_key: ${CONFIG_TEST_TOKEN}\nother: $CONFIG_TEST_TOKEN");
        assert_eq!(out, "api_key: secret123\nother: secret123");
    }

    #[test]
    fn missing_var_becomes_empty() {
        std::env::remove_var("CONFIG_TEST_MISSING_VAR");
        let out = substitute_env_vars("x: ${CONFIG_TEST_MISSING_VAR}");
        assert_eq!(out, "x: ");
    }

    fn model(id: &str, supports_mcp: bool) -> ModelDefinition {
        ModelDefinition {
            id: id.to_string(),
            provider_id: "test".to_string(),
            base_url: None,
            api_key_ref: None,
            supports_mcp,
            sdk_family: if supports_mcp {
                SdkFamily::NativeMcp
            } else {
                SdkFamily::FunctionCall
            },
            supports_extended_capabilities: HashMap::new(),
        }
    }

    fn tool_server(name: &str, wrap_as_functions: bool) -> ToolServerDefinition {
        ToolServerDefinition {
            name: name.to_string(),
            transport: ToolServerTransport::Stdio {
                command: "echo".to_string(),
                args: vec![],
                env: HashMap::new(),
                cwd: None,
            },
            wrap_as_functions,
            timeout_ms: default_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            allowed_tool_names: vec![],
            blocked_tool_names: vec![],
        }
    }

    fn agent(name: &str, model_id: &str, servers: &[&str]) -> AgentDefinition {
        AgentDefinition {
            name: name.to_string(),
            role: "tester".to_string(),
            description: String::new(),
            system_prompt: "be helpful".to_string(),
            model_id: model_id.to_string(),
            tool_servers: servers.iter().map(|s| s.to_string()).collect(),
            enabled: true,
            sdk_hint: SdkHint::Auto,
        }
    }

    #[test]
    fn p1_rejects_unsupported_mcp_without_wrapper() {
        let config = Config {
            agents: vec![agent("researcher", "deepseek", &["filesystem"])],
            models: vec![model("deepseek", false)],
            tool_servers: vec![tool_server("filesystem", false)],
            application: ApplicationConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn p1_accepts_native_mcp_binding() {
        let config = Config {
            agents: vec![agent("researcher", "claude", &["filesystem"])],
            models: vec![model("claude", true)],
            tool_servers: vec![tool_server("filesystem", false)],
            application: ApplicationConfig::default(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn p1_accepts_wrapper_binding_for_non_mcp_model() {
        let config = Config {
            agents: vec![agent("researcher", "deepseek", &["filesystem"])],
            models: vec![model("deepseek", false)],
            tool_servers: vec![tool_server("filesystem", true)],
            application: ApplicationConfig::default(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn p1_accepts_suboptimal_native_model_wrapped_server() {
        let config = Config {
            agents: vec![agent("researcher", "claude", &["filesystem"])],
            models: vec![model("claude", true)],
            tool_servers: vec![tool_server("filesystem", true)],
            application: ApplicationConfig::default(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn disabled_agents_are_not_validated() {
        let mut bad_agent = agent("researcher", "deepseek", &["filesystem"]);
        bad_agent.enabled = false;
        let config = Config {
            agents: vec![bad_agent],
            models: vec![model("deepseek", false)],
            tool_servers: vec![tool_server("filesystem", false)],
            application: ApplicationConfig::default(),
        };
        assert!(config.validate().is_ok());
    }
}
