//! MCP Router (C6).
//!
//! For each (agent, tool-server) pair, decides whether the pairing is
//! `native` (a live MCP session handed to the model) or `wrapper` (tools
//! converted to function-call schemas and dispatched through the Tool
//! Client on the model's behalf) per the table in spec §4.6. Owns both
//! session sub-registries and the reconnect backoff policy; Agent Adapters
//! only ever borrow sessions from here (§3 ownership rule).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::{AgentDefinition, ModelDefinition, ToolServerDefinition, ToolServerTransport};
use crate::errors::{ConfigError, ToolError};
use crate::mcp::catalog::{McpToolDef, ToolCatalog};
use crate::mcp::client::MCPClient;
use crate::mcp::filters::StaticToolFilter;
use crate::mcp::transports::{sse::SSETransport, stdio::StdioTransport, BaseTransport};

/// Which side of the split a given (agent, tool-server) pairing resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Native,
    Wrapper,
}

/// Decide the binding per the §4.6 table. Pure function: the one illegal
/// combination (`!supports_mcp && !wrap_as_functions`) is rejected at
/// config validation time (`config::Config::validate`), so by the time the
/// Router is asked this should always return `Some`.
pub fn decide_binding(model: &ModelDefinition, tool_server: &ToolServerDefinition) -> Option<Binding> {
    match (model.supports_mcp, tool_server.wrap_as_functions) {
        (true, false) => Some(Binding::Native),
        (true, true) => Some(Binding::Wrapper),
        (false, true) => Some(Binding::Wrapper),
        (false, false) => None,
    }
}

/// Exponential backoff series: 1s, 2s, 4s, ... capped at 30s. Shared shape
/// between the Router's reconnect policy and the Tool Client's own
/// `retry_operation` (spec §4.6, §9 "Supplemented Features").
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }

    /// Duration to wait before the next attempt, then advance state.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.base.saturating_mul(1 << self.attempt.min(5));
        self.attempt += 1;
        delay.min(self.cap)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

struct ReconnectState {
    backoff: Backoff,
    next_attempt_at: Instant,
}

impl ReconnectState {
    fn fresh() -> Self {
        Self {
            backoff: Backoff::new(),
            next_attempt_at: Instant::now(),
        }
    }
}

fn build_transport(def: &ToolServerDefinition) -> Box<dyn BaseTransport> {
    match &def.transport {
        ToolServerTransport::Stdio { command, args, env, .. } => Box::new(StdioTransport::new(
            command,
            Some(args.clone()),
            Some(env.clone()),
        )),
        ToolServerTransport::Sse { url, headers } => {
            Box::new(SSETransport::new(url, Some(headers.clone())))
        }
    }
}

type SessionMap = DashMap<String, Arc<Mutex<MCPClient>>>;

/// Owns every Tool Server Session; the sole component that connects,
/// reconnects, and ultimately closes transports (§3 ownership rule).
pub struct McpRouter {
    tool_servers: HashMap<String, ToolServerDefinition>,
    native_sessions: SessionMap,
    wrapper_sessions: SessionMap,
    reconnect_state: DashMap<String, ReconnectState>,
}

impl McpRouter {
    pub fn new(tool_servers: Vec<ToolServerDefinition>) -> Self {
        let tool_servers = tool_servers.into_iter().map(|t| (t.name.clone(), t)).collect();
        Self {
            tool_servers,
            native_sessions: DashMap::new(),
            wrapper_sessions: DashMap::new(),
            reconnect_state: DashMap::new(),
        }
    }

    pub fn tool_server(&self, name: &str) -> Option<&ToolServerDefinition> {
        self.tool_servers.get(name)
    }

    /// Build a router for a new tool-server set, carrying forward live
    /// sessions whose definition is byte-for-byte unchanged (structural
    /// equality, §4.9 rebuild rule); everything else starts fresh and is
    /// lazily reconnected on first use.
    pub fn rebuild(old: &McpRouter, tool_servers: Vec<ToolServerDefinition>) -> McpRouter {
        let next = McpRouter::new(tool_servers);
        for (name, def) in &next.tool_servers {
            let unchanged = old.tool_servers.get(name) == Some(def);
            if !unchanged {
                continue;
            }
            if let Some(session) = old.native_sessions.get(name) {
                next.native_sessions.insert(name.clone(), session.clone());
            }
            if let Some(session) = old.wrapper_sessions.get(name) {
                next.wrapper_sessions.insert(name.clone(), session.clone());
            }
        }
        next
    }

    fn binding_for(&self, model: &ModelDefinition, server_name: &str) -> Result<Binding, ConfigError> {
        let server = self.tool_servers.get(server_name).ok_or_else(|| ConfigError::Invalid {
            message: format!("unknown tool server '{server_name}'"),
        })?;
        decide_binding(model, server).ok_or_else(|| ConfigError::Invalid {
            message: format!(
                "model '{}' does not support MCP and tool server '{server_name}' is not wrapped",
                model.id
            ),
        })
    }

    /// Lazily connect (or reuse) the session for `server_name` in the given
    /// registry, honoring backoff while `Errored`.
    async fn get_or_connect(
        &self,
        server_name: &str,
        registry: &SessionMap,
    ) -> Result<Arc<Mutex<MCPClient>>, ToolError> {
        if let Some(existing) = registry.get(server_name) {
            let client = existing.clone();
            let errored = { client.lock().await.state() == crate::mcp::client::SessionState::Errored };
            if !errored {
                return Ok(client);
            }
            // Errored: consult the backoff window before retrying.
            let ready = self
                .reconnect_state
                .get(server_name)
                .map(|s| Instant::now() >= s.next_attempt_at)
                .unwrap_or(true);
            if !ready {
                return Err(ToolError::ServiceUnavailable);
            }
            {
                let mut guard = client.lock().await;
                let _ = guard.reset();
                if guard.connect().await.is_err() {
                    self.arm_backoff(server_name);
                    return Err(ToolError::ServiceUnavailable);
                }
            }
            self.reconnect_state.remove(server_name);
            return Ok(client);
        }

        let def = self.tool_servers.get(server_name).ok_or(ToolError::NotFound {
            tool_name: server_name.to_string(),
        })?;
        let transport = build_transport(def);
        let mut client = MCPClient::new(transport)
            .with_connect_timeout(def.timeout_ms / 1000)
            .with_execution_timeout(def.timeout_ms / 1000);
        if client.connect().await.is_err() {
            self.arm_backoff(server_name);
            let client = Arc::new(Mutex::new(client));
            registry.insert(server_name.to_string(), client);
            return Err(ToolError::ServiceUnavailable);
        }
        let client = Arc::new(Mutex::new(client));
        registry.insert(server_name.to_string(), client.clone());
        Ok(client)
    }

    fn arm_backoff(&self, server_name: &str) {
        let mut state = self
            .reconnect_state
            .entry(server_name.to_string())
            .or_insert_with(ReconnectState::fresh);
        let delay = state.backoff.next_delay();
        state.next_attempt_at = Instant::now() + delay;
    }

    /// Native side: live sessions for every tool server this agent binds
    /// natively, handed to the native adapter (§4.7). Errored-and-backing-off
    /// servers are silently skipped rather than failing the whole call —
    /// the native driver observes whatever sessions are currently live.
    pub async fn native_sessions_for_agent(
        &self,
        agent: &AgentDefinition,
        model: &ModelDefinition,
    ) -> Vec<Arc<Mutex<MCPClient>>> {
        let mut sessions = Vec::new();
        for server_name in &agent.tool_servers {
            match self.binding_for(model, server_name) {
                Ok(Binding::Native) => {}
                _ => continue,
            }
            if let Ok(session) = self.get_or_connect(server_name, &self.native_sessions).await {
                sessions.push(session);
            }
        }
        sessions
    }

    /// Wrapper side: function-call schemas for every tool server this agent
    /// binds as a wrapper (§4.5, §4.8).
    pub async fn tools_for_agent(
        &self,
        agent: &AgentDefinition,
        model: &ModelDefinition,
    ) -> Result<ToolCatalog, ConfigError> {
        let mut catalog = ToolCatalog::new();
        for server_name in &agent.tool_servers {
            match self.binding_for(model, server_name)? {
                Binding::Wrapper => {}
                Binding::Native => continue,
            }
            let def = self.tool_servers.get(server_name).unwrap();
            let session = match self.get_or_connect(server_name, &self.wrapper_sessions).await {
                Ok(s) => s,
                Err(_) => continue,
            };
            let filter = StaticToolFilter::new(
                (!def.allowed_tool_names.is_empty()).then(|| def.allowed_tool_names.clone()),
                (!def.blocked_tool_names.is_empty()).then(|| def.blocked_tool_names.clone()),
            );
            let mut guard = session.lock().await;
            if let Ok(raw_tools) = guard.list_tools(None).await {
                let tools: Vec<McpToolDef> = raw_tools
                    .into_iter()
                    .filter(|t| {
                        let value = serde_json::to_value(t).unwrap_or_default();
                        filter.filter(&value)
                    })
                    .filter_map(|t| serde_json::from_value(serde_json::to_value(t).ok()?).ok())
                    .collect();
                catalog.add_server_tools(server_name, &tools);
            }
        }
        Ok(catalog)
    }

    /// Execute a wrapped tool call, routed back to the correct session by
    /// `(server, original_tool_name)` (decoded by the caller from the
    /// catalog's `ToolOrigin`).
    pub async fn invoke_wrapped(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: HashMap<String, serde_json::Value>,
    ) -> Result<String, ToolError> {
        let session = self.get_or_connect(server_name, &self.wrapper_sessions).await?;
        let mut guard = session.lock().await;
        guard.call_tool(tool_name, Some(arguments)).await
    }

    /// Direct session access for the raw SSE tool-call endpoint (§6), which
    /// addresses a tool server by name without going through an agent's
    /// binding decision at all. Always resolves on the wrapper side since
    /// that is where a bare `(server_name, tool_name, arguments)` call is
    /// dispatched from.
    pub async fn session_for_tool_call(&self, server_name: &str) -> Result<Arc<Mutex<MCPClient>>, ToolError> {
        self.get_or_connect(server_name, &self.wrapper_sessions).await
    }

    /// Tear down every owned session (shutdown path).
    pub async fn close_all(&self) {
        for entry in self.native_sessions.iter() {
            let _ = entry.value().lock().await.disconnect().await;
        }
        for entry in self.wrapper_sessions.iter() {
            let _ = entry.value().lock().await.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SdkFamily;

    fn model(supports_mcp: bool) -> ModelDefinition {
        ModelDefinition {
            id: "m".to_string(),
            provider_id: "p".to_string(),
            base_url: None,
            api_key_ref: None,
            supports_mcp,
            sdk_family: if supports_mcp { SdkFamily::NativeMcp } else { SdkFamily::FunctionCall },
            supports_extended_capabilities: HashMap::new(),
        }
    }

    fn tool_server(wrap_as_functions: bool) -> ToolServerDefinition {
        ToolServerDefinition {
            name: "fs".to_string(),
            transport: ToolServerTransport::Stdio {
                command: "echo".to_string(),
                args: vec![],
                env: HashMap::new(),
                cwd: None,
            },
            wrap_as_functions,
            timeout_ms: 60_000,
            health_check_interval_ms: 30_000,
            allowed_tool_names: vec![],
            blocked_tool_names: vec![],
        }
    }

    #[test]
    fn native_model_unwrapped_server_is_native() {
        assert_eq!(decide_binding(&model(true), &tool_server(false)), Some(Binding::Native));
    }

    #[test]
    fn native_model_wrapped_server_is_wrapper_suboptimal() {
        assert_eq!(decide_binding(&model(true), &tool_server(true)), Some(Binding::Wrapper));
    }

    #[test]
    fn non_native_model_wrapped_server_is_wrapper() {
        assert_eq!(decide_binding(&model(false), &tool_server(true)), Some(Binding::Wrapper));
    }

    #[test]
    fn non_native_model_unwrapped_server_is_illegal() {
        assert_eq!(decide_binding(&model(false), &tool_server(false)), None);
    }

    #[tokio::test]
    async fn rebuild_drops_sessions_for_changed_definitions() {
        let fs_def = tool_server(false);
        let router = McpRouter::new(vec![fs_def.clone()]);
        router.native_sessions.insert(
            "fs".to_string(),
            Arc::new(Mutex::new(MCPClient::new(build_transport(&fs_def)))),
        );

        let unchanged = McpRouter::rebuild(&router, vec![fs_def.clone()]);
        assert!(unchanged.native_sessions.contains_key("fs"));

        let mut changed_def = fs_def.clone();
        changed_def.timeout_ms += 1;
        let rebuilt = McpRouter::rebuild(&router, vec![changed_def]);
        assert!(!rebuilt.native_sessions.contains_key("fs"));
    }

    #[test]
    fn backoff_doubles_and_caps_at_30s() {
        let mut b = Backoff::new();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
        assert_eq!(b.next_delay(), Duration::from_secs(8));
        assert_eq!(b.next_delay(), Duration::from_secs(16));
        assert_eq!(b.next_delay(), Duration::from_secs(30));
        assert_eq!(b.next_delay(), Duration::from_secs(30));
    }
}
