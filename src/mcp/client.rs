//! Tool Client (C4): per-server MCP session management.
//!
//! Generalized from a scaffold with
//! stubbed session internals into a real JSON-RPC client driving the
//! `initialize` handshake, `tools/list|call`, `resources/list|read`,
//! `prompts/list|get`, and `ping` over a transport (C2/C3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::errors::ToolError;
use crate::mcp::codec::{IdGenerator, JsonRpcNotification, JsonRpcRequest, RequestId};
use crate::mcp::transports::{BaseTransport, TransportType};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// MCP connection timeout in seconds.
pub const MCP_CONNECTION_TIMEOUT: u64 = 30;
/// MCP tool execution timeout in seconds.
pub const MCP_TOOL_EXECUTION_TIMEOUT: u64 = 60;
/// MCP tool discovery timeout in seconds.
pub const MCP_DISCOVERY_TIMEOUT: u64 = 30;
/// Maximum retry attempts.
pub const MCP_MAX_RETRIES: u32 = 3;
/// Consecutive ping failures before the session is marked errored.
pub const MAX_PING_FAILURES: u32 = 3;

/// Simple in-memory cache TTL for MCP tool schemas (5 minutes).
const CACHE_TTL: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Session state machine
// ---------------------------------------------------------------------------

/// Per-server session lifecycle, per the Tool Server Session data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Draining,
    Errored,
}

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

struct CacheEntry {
    data: Vec<HashMap<String, Value>>,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= CACHE_TTL
    }
}

// ---------------------------------------------------------------------------
// ServerInfo (for logging)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ServerInfo {
    server_name: String,
    server_url: Option<String>,
    transport_type: String,
}

// ---------------------------------------------------------------------------
// Streamed tool-call frames
// ---------------------------------------------------------------------------

/// One frame of a `call_tool_stream` sequence: zero or more progress
/// notifications followed by exactly one terminal frame.
#[derive(Debug, Clone)]
pub enum ToolCallFrame {
    Progress(Value),
    Done(Result<String, ToolError>),
}

fn progress_token_matches(note: &JsonRpcNotification, id: &RequestId) -> bool {
    note.method == "notifications/progress"
        && note
            .params
            .as_ref()
            .and_then(|p| p.get("progressToken"))
            .map(|t| t.as_str().map(|s| s == id.to_string()).unwrap_or(false))
            .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// MCPClient
// ---------------------------------------------------------------------------

/// Tool Client: a live, initialized session to one MCP server.
///
/// Now backed by real
/// JSON-RPC request/response dispatch over a transport.
pub struct MCPClient {
    /// The transport layer for communication.
    pub transport: Box<dyn BaseTransport>,
    pub connect_timeout: u64,
    pub execution_timeout: u64,
    pub discovery_timeout: u64,
    pub max_retries: u32,
    pub cache_tools_list: bool,
    state: SyncMutex<SessionState>,
    was_connected: bool,
    server_capabilities: SyncMutex<Option<Value>>,
    id_gen: IdGenerator,
    schema_cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    consecutive_ping_failures: SyncMutex<u32>,
}

impl MCPClient {
    pub fn new(transport: Box<dyn BaseTransport>) -> Self {
        Self {
            transport,
            connect_timeout: MCP_CONNECTION_TIMEOUT,
            execution_timeout: MCP_TOOL_EXECUTION_TIMEOUT,
            discovery_timeout: MCP_DISCOVERY_TIMEOUT,
            max_retries: MCP_MAX_RETRIES,
            cache_tools_list: false,
            state: SyncMutex::new(SessionState::Disconnected),
            was_connected: false,
            server_capabilities: SyncMutex::new(None),
            id_gen: IdGenerator::new(),
            schema_cache: Arc::new(Mutex::new(HashMap::new())),
            consecutive_ping_failures: SyncMutex::new(0),
        }
    }

    // -----------------------------------------------------------------------
    // Builder methods
    // -----------------------------------------------------------------------

    pub fn with_connect_timeout(mut self, timeout: u64) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: u64) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: u64) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_cache_tools_list(mut self, cache: bool) -> Self {
        self.cache_tools_list = cache;
        self
    }

    // -----------------------------------------------------------------------
    // Connection state
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn connected(&self) -> bool {
        matches!(self.state(), SessionState::Ready)
    }

    /// Capabilities returned by the server's `initialize` reply.
    pub fn server_capabilities(&self) -> Option<Value> {
        self.server_capabilities.lock().clone()
    }

    /// `Errored -> Disconnected`. The only transition out of `Errored`.
    pub fn reset(&self) -> Result<(), ToolError> {
        let mut state = self.state.lock();
        if *state != SessionState::Errored {
            return Err(ToolError::ExecutionError {
                message: "reset() is only valid from the Errored state".to_string(),
            });
        }
        *state = SessionState::Disconnected;
        Ok(())
    }

    fn get_server_info(&self) -> ServerInfo {
        let transport_type = self.transport.transport_type();
        let identifier = self.transport.server_identifier();

        match transport_type {
            TransportType::Stdio => ServerInfo {
                server_name: identifier.clone(),
                server_url: None,
                transport_type: transport_type.to_string(),
            },
            TransportType::Sse => {
                let url = identifier.strip_prefix("sse:").unwrap_or(&identifier).to_string();
                ServerInfo {
                    server_name: url.clone(),
                    server_url: Some(url),
                    transport_type: transport_type.to_string(),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connect / Disconnect
    // -----------------------------------------------------------------------

    #[tracing::instrument(skip(self), fields(server = %self.transport.server_identifier()))]
    pub async fn connect(&mut self) -> Result<(), ToolError> {
        if self.connected() {
            return Ok(());
        }

        let is_reconnect = self.was_connected;
        let server_info = self.get_server_info();
        let started_at = Instant::now();
        *self.state.lock() = SessionState::Connecting;

        log::info!(
            "MCP connection started: server='{}', transport='{}', reconnect={}",
            server_info.server_name,
            server_info.transport_type,
            is_reconnect
        );

        let timeout = Duration::from_secs(self.connect_timeout);
        let transport_result = tokio::time::timeout(timeout, self.transport.connect()).await;

        match transport_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.fail(&server_info, &e.to_string(), started_at);
                return Err(ToolError::ExecutionError {
                    message: format!("transport connect failed: {e}"),
                });
            }
            Err(_) => {
                let msg = format!(
                    "MCP connection timed out after {} seconds",
                    self.connect_timeout
                );
                self.fail(&server_info, &msg, started_at);
                return Err(ToolError::Timeout {
                    timeout_ms: self.connect_timeout * 1000,
                });
            }
        }

        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "agent-execution-core", "version": crate::VERSION},
        });
        let req = JsonRpcRequest::new(self.id_gen.next_id(), "initialize", Some(params));

        match self.transport.send_request(req).await {
            Ok(resp) if !resp.is_error() => {
                *self.server_capabilities.lock() = resp.result;
                *self.state.lock() = SessionState::Ready;
                self.was_connected = true;
                let duration_ms = started_at.elapsed().as_millis();
                log::info!(
                    "MCP connection established: server='{}' ({duration_ms}ms)",
                    server_info.server_name
                );
                Ok(())
            }
            Ok(resp) => {
                let msg = resp
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "initialize failed".to_string());
                self.fail(&server_info, &msg, started_at);
                Err(ToolError::ExecutionError { message: msg })
            }
            Err(e) => {
                self.fail(&server_info, &e.to_string(), started_at);
                Err(e.into())
            }
        }
    }

    pub async fn disconnect(&mut self) -> Result<(), ToolError> {
        if self.state() == SessionState::Disconnected {
            return Ok(());
        }
        *self.state.lock() = SessionState::Draining;
        let result = self.transport.disconnect().await;
        *self.state.lock() = SessionState::Disconnected;
        result.map_err(|e| ToolError::ExecutionError {
            message: format!("error during disconnect: {e}"),
        })
    }

    fn fail(&self, server_info: &ServerInfo, error: &str, started_at: Instant) {
        *self.state.lock() = SessionState::Errored;
        let duration_ms = started_at.elapsed().as_millis();
        log::error!(
            "MCP connection failed: server='{}', error='{error}', duration={duration_ms}ms",
            server_info.server_name
        );
    }

    // -----------------------------------------------------------------------
    // Discovery: tools / resources / prompts
    // -----------------------------------------------------------------------

    pub async fn list_tools(
        &mut self,
        use_cache: Option<bool>,
    ) -> Result<Vec<HashMap<String, Value>>, ToolError> {
        self.list_cached("tools", "tools/list", "tools", use_cache).await
    }

    pub async fn list_resources(&mut self) -> Result<Vec<HashMap<String, Value>>, ToolError> {
        self.list_cached("resources", "resources/list", "resources", Some(false))
            .await
    }

    pub async fn list_prompts(&mut self) -> Result<Vec<HashMap<String, Value>>, ToolError> {
        self.list_cached("prompts", "prompts/list", "prompts", Some(false))
            .await
    }

    async fn list_cached(
        &mut self,
        cache_suffix: &str,
        method: &str,
        result_key: &str,
        use_cache: Option<bool>,
    ) -> Result<Vec<HashMap<String, Value>>, ToolError> {
        if !self.connected() {
            self.connect().await?;
        }
        let use_cache = use_cache.unwrap_or(self.cache_tools_list);
        let cache_key = self.get_cache_key(cache_suffix);

        if use_cache {
            let cache = self.schema_cache.lock().await;
            if let Some(entry) = cache.get(&cache_key) {
                if !entry.is_expired() {
                    return Ok(entry.data.clone());
                }
            }
        }

        let result = self.request(method, None).await?;
        let items: Vec<HashMap<String, Value>> = result
            .get(result_key)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_object())
                    .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .collect()
            })
            .unwrap_or_default();

        if use_cache {
            let mut cache = self.schema_cache.lock().await;
            cache.insert(
                cache_key,
                CacheEntry {
                    data: items.clone(),
                    created_at: Instant::now(),
                },
            );
        }

        Ok(items)
    }

    // -----------------------------------------------------------------------
    // Tool calls
    // -----------------------------------------------------------------------

    #[tracing::instrument(skip(self, arguments), fields(tool = %tool_name))]
    pub async fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: Option<HashMap<String, Value>>,
    ) -> Result<String, ToolError> {
        if !self.connected() {
            self.connect().await?;
        }

        let arguments = arguments.unwrap_or_default();
        let cleaned = Self::clean_tool_arguments(&arguments);
        let server_info = self.get_server_info();
        let started_at = Instant::now();

        log::info!(
            "MCP tool execution started: tool='{tool_name}', server='{}'",
            server_info.server_name
        );

        let params = serde_json::json!({"name": tool_name, "arguments": cleaned});
        let result = self.request("tools/call", Some(params)).await;
        let duration_ms = started_at.elapsed().as_millis();

        match result {
            Ok(value) => {
                log::info!("MCP tool execution completed: tool='{tool_name}' ({duration_ms}ms)");
                Ok(Self::extract_text_content(&value))
            }
            Err(e) => {
                log::error!(
                    "MCP tool execution failed: tool='{tool_name}', error='{e}' ({duration_ms}ms)"
                );
                Err(e)
            }
        }
    }

    /// Streamed tool call: progress notifications followed by one terminal
    /// frame. Cancelling (setting `cancel` to `true`) sends
    /// `$/cancelRequest` for the in-flight id.
    pub fn call_tool_stream<'a>(
        &'a self,
        tool_name: String,
        arguments: HashMap<String, Value>,
        mut cancel: watch::Receiver<bool>,
    ) -> impl Stream<Item = ToolCallFrame> + 'a {
        async_stream::stream! {
            let id = self.id_gen.next_id();
            let cleaned = Self::clean_tool_arguments(&arguments);
            let params = serde_json::json!({
                "name": tool_name,
                "arguments": cleaned,
                "_meta": {"progressToken": id.to_string()},
            });
            let req = JsonRpcRequest::new(id.clone(), "tools/call", Some(params));

            let mut notifications = self.transport.subscribe_notifications();
            let send_fut = self.transport.send_request(req);
            tokio::pin!(send_fut);

            loop {
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            let _ = self.transport.send_notification(
                                JsonRpcNotification::cancel_request(&id)
                            ).await;
                            yield ToolCallFrame::Done(Err(ToolError::Cancelled));
                            return;
                        }
                    }
                    note = notifications.recv() => {
                        if let Ok(note) = note {
                            if progress_token_matches(&note, &id) {
                                yield ToolCallFrame::Progress(
                                    note.params.unwrap_or(Value::Null)
                                );
                            }
                        }
                    }
                    result = &mut send_fut => {
                        let mapped = result
                            .map_err(ToolError::from)
                            .and_then(|resp| Self::response_to_result(resp));
                        yield ToolCallFrame::Done(mapped.map(|v| Self::extract_text_content(&v)));
                        return;
                    }
                }
            }
        }
    }

    fn extract_text_content(result: &Value) -> String {
        result
            .get("content")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .and_then(|item| item.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Resources / prompts
    // -----------------------------------------------------------------------

    pub async fn read_resource(&mut self, uri: &str) -> Result<HashMap<String, Value>, ToolError> {
        if !self.connected() {
            self.connect().await?;
        }
        let result = self
            .request("resources/read", Some(serde_json::json!({"uri": uri})))
            .await?;
        Ok(value_to_map(&result))
    }

    pub async fn get_prompt(
        &mut self,
        prompt_name: &str,
        arguments: Option<HashMap<String, Value>>,
    ) -> Result<HashMap<String, Value>, ToolError> {
        if !self.connected() {
            self.connect().await?;
        }
        let arguments = arguments.unwrap_or_default();
        let params = serde_json::json!({"name": prompt_name, "arguments": arguments});
        let result = self.request("prompts/get", Some(params)).await?;
        Ok(value_to_map(&result))
    }

    // -----------------------------------------------------------------------
    // Liveness
    // -----------------------------------------------------------------------

    /// Send a `ping`. Three consecutive failures mark the session `Errored`.
    pub async fn ping(&mut self) -> Result<(), ToolError> {
        let req = JsonRpcRequest::new(self.id_gen.next_id(), "ping", None);
        let timeout = Duration::from_secs(5);
        let result = tokio::time::timeout(timeout, self.transport.send_request(req)).await;

        match result {
            Ok(Ok(resp)) if !resp.is_error() => {
                *self.consecutive_ping_failures.lock() = 0;
                Ok(())
            }
            _ => {
                let mut failures = self.consecutive_ping_failures.lock();
                *failures += 1;
                if *failures >= MAX_PING_FAILURES {
                    *self.state.lock() = SessionState::Errored;
                }
                Err(ToolError::Timeout { timeout_ms: 5000 })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Argument cleaning
    // -----------------------------------------------------------------------

    /// Clean tool arguments by removing null values and fixing formats.
    ///
    /// Corresponds to `MCPClient._clean_tool_arguments()` in Python.
    pub fn clean_tool_arguments(arguments: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut cleaned = HashMap::new();

        for (key, value) in arguments {
            if value.is_null() {
                continue;
            }

            if key == "sources" {
                if let Some(arr) = value.as_array() {
                    let fixed_sources: Vec<Value> = arr
                        .iter()
                        .map(|item| {
                            if let Some(s) = item.as_str() {
                                serde_json::json!({"type": s})
                            } else {
                                item.clone()
                            }
                        })
                        .collect();
                    if !fixed_sources.is_empty() {
                        cleaned.insert(key.clone(), Value::Array(fixed_sources));
                    }
                    continue;
                }
            }

            if let Some(obj) = value.as_object() {
                let nested_map: HashMap<String, Value> =
                    obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let nested_cleaned = Self::clean_tool_arguments(&nested_map);
                if !nested_cleaned.is_empty() {
                    cleaned.insert(
                        key.clone(),
                        serde_json::to_value(nested_cleaned).unwrap_or(Value::Null),
                    );
                }
            } else if let Some(arr) = value.as_array() {
                let cleaned_list: Vec<Value> = arr
                    .iter()
                    .filter_map(|item| {
                        if item.is_null() {
                            return None;
                        }
                        if let Some(obj) = item.as_object() {
                            let nested_map: HashMap<String, Value> =
                                obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                            let cleaned_item = Self::clean_tool_arguments(&nested_map);
                            if !cleaned_item.is_empty() {
                                return Some(serde_json::to_value(cleaned_item).unwrap_or(Value::Null));
                            }
                            None
                        } else {
                            Some(item.clone())
                        }
                    })
                    .collect();
                if !cleaned_list.is_empty() {
                    cleaned.insert(key.clone(), Value::Array(cleaned_list));
                }
            } else {
                cleaned.insert(key.clone(), value.clone());
            }
        }

        cleaned
    }

    // -----------------------------------------------------------------------
    // Request dispatch + retry
    // -----------------------------------------------------------------------

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ToolError> {
        self.retry_operation(|| {
            let req = JsonRpcRequest::new(self.id_gen.next_id(), method, params.clone());
            async move {
                let resp = self.transport.send_request(req).await?;
                Self::response_to_result(resp)
            }
        })
        .await
    }

    fn response_to_result(resp: crate::mcp::codec::JsonRpcResponse) -> Result<Value, ToolError> {
        if let Some(err) = resp.error {
            if err.message.to_lowercase().contains("not found") {
                return Err(ToolError::NotFound {
                    tool_name: err.message,
                });
            }
            return Err(ToolError::ExecutionError {
                message: err.message,
            });
        }
        Ok(resp.result.unwrap_or(Value::Null))
    }

    /// Retry an operation with exponential backoff. Non-retryable errors
    /// (`NotFound`, auth failures surfaced as `ExecutionError`) return
    /// immediately.
    async fn retry_operation<F, Fut>(&self, operation: F) -> Result<Value, ToolError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Value, ToolError>>,
    {
        let mut last_error = None;
        let timeout = Duration::from_secs(self.execution_timeout);

        for attempt in 0..self.max_retries {
            match tokio::time::timeout(timeout, operation()).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e @ ToolError::NotFound { .. })) => return Err(e),
                Ok(Err(ToolError::ExecutionError { message }))
                    if message.to_lowercase().contains("authentication")
                        || message.to_lowercase().contains("unauthorized") =>
                {
                    return Err(ToolError::ExecutionError { message });
                }
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => {
                    last_error = Some(ToolError::Timeout {
                        timeout_ms: self.execution_timeout * 1000,
                    })
                }
            }

            if attempt < self.max_retries - 1 {
                let wait_time = Duration::from_secs(2u64.pow(attempt));
                tokio::time::sleep(wait_time).await;
            }
        }

        Err(last_error.unwrap_or(ToolError::ExecutionError {
            message: format!("operation failed after {} attempts", self.max_retries),
        }))
    }

    // -----------------------------------------------------------------------
    // Cache key generation
    // -----------------------------------------------------------------------

    fn get_cache_key(&self, resource_type: &str) -> String {
        let transport_info = self.transport.server_identifier();
        format!("mcp:{transport_info}:{resource_type}")
    }
}

fn value_to_map(value: &Value) -> HashMap<String, Value> {
    value
        .as_object()
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_tool_arguments_removes_nulls() {
        let mut args = HashMap::new();
        args.insert("key1".to_string(), Value::String("value".to_string()));
        args.insert("key2".to_string(), Value::Null);
        args.insert("key3".to_string(), serde_json::json!(42));

        let cleaned = MCPClient::clean_tool_arguments(&args);
        assert_eq!(cleaned.len(), 2);
        assert!(cleaned.contains_key("key1"));
        assert!(cleaned.contains_key("key3"));
        assert!(!cleaned.contains_key("key2"));
    }

    #[test]
    fn test_clean_tool_arguments_fixes_sources() {
        let mut args = HashMap::new();
        args.insert("sources".to_string(), serde_json::json!(["web", "file"]));

        let cleaned = MCPClient::clean_tool_arguments(&args);
        let sources = cleaned.get("sources").unwrap().as_array().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0], serde_json::json!({"type": "web"}));
        assert_eq!(sources[1], serde_json::json!({"type": "file"}));
    }

    #[test]
    fn test_clean_tool_arguments_keeps_sources_objects() {
        let mut args = HashMap::new();
        args.insert(
            "sources".to_string(),
            serde_json::json!([{"type": "web"}, {"type": "file"}]),
        );

        let cleaned = MCPClient::clean_tool_arguments(&args);
        let sources = cleaned.get("sources").unwrap().as_array().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0], serde_json::json!({"type": "web"}));
    }

    #[test]
    fn test_clean_tool_arguments_nested_objects() {
        let mut args = HashMap::new();
        args.insert(
            "config".to_string(),
            serde_json::json!({
                "name": "test",
                "value": null,
                "nested": {"a": 1, "b": null}
            }),
        );

        let cleaned = MCPClient::clean_tool_arguments(&args);
        let config = cleaned.get("config").unwrap();
        assert!(config.get("name").is_some());
        assert!(config.get("value").is_none());
    }

    #[test]
    fn test_clean_tool_arguments_empty() {
        let args = HashMap::new();
        let cleaned = MCPClient::clean_tool_arguments(&args);
        assert!(cleaned.is_empty());
    }

    #[test]
    fn test_extract_text_content_from_zero_byte_result_is_empty_not_error() {
        let result = serde_json::json!({"content": [{"type": "text", "text": ""}]});
        assert_eq!(MCPClient::extract_text_content(&result), "");
    }

    #[test]
    fn test_extract_text_content_missing_content_is_empty() {
        let result = serde_json::json!({});
        assert_eq!(MCPClient::extract_text_content(&result), "");
    }

    #[test]
    fn test_client_new_defaults() {
        use crate::mcp::transports::stdio::StdioTransport;
        let transport = StdioTransport::new("echo", None, None);
        let client = MCPClient::new(Box::new(transport));

        assert_eq!(client.connect_timeout, MCP_CONNECTION_TIMEOUT);
        assert_eq!(client.execution_timeout, MCP_TOOL_EXECUTION_TIMEOUT);
        assert_eq!(client.discovery_timeout, MCP_DISCOVERY_TIMEOUT);
        assert_eq!(client.max_retries, MCP_MAX_RETRIES);
        assert!(!client.cache_tools_list);
        assert!(!client.connected());
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_client_builder() {
        use crate::mcp::transports::stdio::StdioTransport;
        let transport = StdioTransport::new("echo", None, None);
        let client = MCPClient::new(Box::new(transport))
            .with_connect_timeout(60)
            .with_execution_timeout(120)
            .with_discovery_timeout(45)
            .with_max_retries(5)
            .with_cache_tools_list(true);

        assert_eq!(client.connect_timeout, 60);
        assert_eq!(client.execution_timeout, 120);
        assert_eq!(client.discovery_timeout, 45);
        assert_eq!(client.max_retries, 5);
        assert!(client.cache_tools_list);
    }

    #[test]
    fn test_reset_only_valid_from_errored() {
        use crate::mcp::transports::stdio::StdioTransport;
        let transport = StdioTransport::new("echo", None, None);
        let client = MCPClient::new(Box::new(transport));
        assert!(client.reset().is_err());
    }

    #[test]
    fn test_get_cache_key() {
        use crate::mcp::transports::sse::SSETransport;
        let transport = SSETransport::new("https://example.com/mcp", None);
        let client = MCPClient::new(Box::new(transport));

        let key = client.get_cache_key("tools");
        assert!(key.starts_with("mcp:"));
        assert!(key.contains("sse:"));
        assert!(key.ends_with(":tools"));
    }

    #[test]
    fn test_get_server_info_stdio() {
        use crate::mcp::transports::stdio::StdioTransport;
        let transport = StdioTransport::new("python", Some(vec!["server.py".into()]), None);
        let client = MCPClient::new(Box::new(transport));
        let info = client.get_server_info();

        assert!(info.server_name.contains("python"));
        assert!(info.server_url.is_none());
        assert_eq!(info.transport_type, "stdio");
    }

    #[test]
    fn test_get_server_info_sse() {
        use crate::mcp::transports::sse::SSETransport;
        let transport = SSETransport::new("https://api.example.com/sse", None);
        let client = MCPClient::new(Box::new(transport));
        let info = client.get_server_info();

        assert!(info.server_url.is_some());
        assert_eq!(info.transport_type, "sse");
    }
}
