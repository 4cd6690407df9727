//! Concrete `DriverFactory` (C9 collaborator): wires agent adapters to real
//! model SDK integrations (`llms::providers::*`) by `provider_id`, resolving
//! each model's API key from the env var named in `api_key_ref` (falling
//! back to the provider's own default env var when unset, per
//! `llms::providers::*::new`'s existing convention).

use std::collections::HashMap as StdHashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::adapters::native::{DriverEvent, NativeModelDriver};
use crate::agents::adapters::wrapper::{FunctionCallModel, ModelToolCall, ModelTurn};
use crate::agents::adapters::CancelSignal;
use crate::agents::registry::DriverFactory;
use crate::agents::reasoning::HistoryTurn;
use crate::config::ModelDefinition;
use crate::errors::{ConfigError, RunError};
use crate::llms::base_llm::{BaseLLM, LLMMessage};
use crate::llms::providers::anthropic::AnthropicCompletion;
use crate::llms::providers::openai::OpenAICompletion;
use crate::llms::providers::xai::XAICompletion;
use crate::mcp::catalog::FunctionCallSchema;
use crate::mcp::client::MCPClient;

/// Bound on one native-driver run's own tool-use loop (mirrors the Wrapper
/// Adapter's `DEFAULT_MAX_ITERATIONS`, §4.7/§4.8 share the same shape).
const NATIVE_MAX_ITERATIONS: u32 = 20;

fn resolve_api_key(model: &ModelDefinition) -> Option<String> {
    model.api_key_ref.as_deref().and_then(|name| std::env::var(name).ok())
}

/// Builds a `BaseLLM` for the given model by dispatching on `provider_id`.
fn build_llm(model: &ModelDefinition) -> Result<Arc<dyn BaseLLM>, ConfigError> {
    let api_key = resolve_api_key(model);
    match model.provider_id.as_str() {
        "openai" => Ok(Arc::new(OpenAICompletion::new(model.id.clone(), api_key, model.base_url.clone()))),
        "anthropic" => Ok(Arc::new(AnthropicCompletion::new(model.id.clone(), api_key, model.base_url.clone()))),
        "xai" => Ok(Arc::new(XAICompletion::new(model.id.clone(), api_key, model.base_url.clone()))),
        // deepseek and other OpenAI-compatible endpoints reuse the Chat
        // Completions client with their own base URL.
        "deepseek" => {
            let base_url = model.base_url.clone().or_else(|| Some("https://api.deepseek.com".to_string()));
            Ok(Arc::new(OpenAICompletion::new(model.id.clone(), api_key, base_url)))
        }
        other => Err(ConfigError::Invalid { message: format!("unknown provider_id '{other}' for model '{}'", model.id) }),
    }
}

fn build_anthropic(model: &ModelDefinition) -> Result<AnthropicCompletion, ConfigError> {
    if model.provider_id != "anthropic" {
        return Err(ConfigError::Invalid {
            message: format!(
                "model '{}' (provider_id='{}') has no native-MCP driver implementation — only 'anthropic' models can bind natively in this build",
                model.id, model.provider_id
            ),
        });
    }
    let api_key = resolve_api_key(model);
    Ok(AnthropicCompletion::new(model.id.clone(), api_key, model.base_url.clone()))
}

/// Resolves `model_id` against a loaded `Config`'s model list, then
/// constructs the matching provider collaborator on demand. No caching: a
/// fresh provider handle is built per adapter, matching `AgentRegistry`'s
/// build-once-per-(re)build lifecycle.
pub struct LlmDriverFactory {
    models: StdHashMap<String, ModelDefinition>,
}

impl LlmDriverFactory {
    pub fn new(models: Vec<ModelDefinition>) -> Self {
        Self { models: models.into_iter().map(|m| (m.id.clone(), m)).collect() }
    }

    fn model(&self, model_id: &str) -> Result<&ModelDefinition, ConfigError> {
        self.models
            .get(model_id)
            .ok_or_else(|| ConfigError::Invalid { message: format!("unknown model '{model_id}'") })
    }
}

impl DriverFactory for LlmDriverFactory {
    fn native_driver(&self, model_id: &str) -> Result<Arc<dyn NativeModelDriver>, ConfigError> {
        let model = self.model(model_id)?;
        let llm = build_anthropic(model)?;
        Ok(Arc::new(AnthropicNativeDriver { llm }))
    }

    fn function_call_model(&self, model_id: &str) -> Result<Arc<dyn FunctionCallModel>, ConfigError> {
        let model = self.model(model_id)?;
        let llm = build_llm(model)?;
        Ok(Arc::new(LlmFunctionCallModel { llm }))
    }
}

// ---------------------------------------------------------------------------
// FunctionCallModel over any BaseLLM
// ---------------------------------------------------------------------------

/// Drives any `BaseLLM::acall` as the Wrapper Adapter's single-turn model
/// collaborator (§4.8): one completion in, one `ModelTurn` out. Provider
/// responses already collapse to either plain text or an OpenAI-shaped
/// `tool_calls` message (every provider's `acall` returns that shape, per
/// its own `parse_response`), so this is one parser for all of them.
pub struct LlmFunctionCallModel {
    llm: Arc<dyn BaseLLM>,
}

#[async_trait]
impl FunctionCallModel for LlmFunctionCallModel {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[HistoryTurn],
        tools: &[FunctionCallSchema],
    ) -> Result<ModelTurn, RunError> {
        let mut llm_messages: Vec<LLMMessage> = Vec::with_capacity(messages.len() + 1);
        let mut system_turn: LLMMessage = LLMMessage::new();
        system_turn.insert("role".to_string(), Value::String("system".to_string()));
        system_turn.insert("content".to_string(), Value::String(system_prompt.to_string()));
        llm_messages.push(system_turn);
        llm_messages.extend(messages.iter().cloned());

        let tool_values: Vec<Value> = tools.iter().map(|t| serde_json::to_value(t).unwrap_or(Value::Null)).collect();
        let tools_opt = if tool_values.is_empty() { None } else { Some(tool_values) };

        let result = self
            .llm
            .acall(llm_messages, tools_opt, None)
            .await
            .map_err(|e| RunError::ModelError { message: e.to_string() })?;

        Ok(parse_model_turn(result))
    }
}

fn parse_model_turn(value: Value) -> ModelTurn {
    match value {
        Value::String(text) => ModelTurn { reasoning: None, tool_calls: vec![], text: Some(text) },
        Value::Object(obj) => {
            let tool_calls_value = obj.get("tool_calls").and_then(|v| v.as_array());
            match tool_calls_value {
                Some(raw_calls) if !raw_calls.is_empty() => {
                    let tool_calls = raw_calls.iter().filter_map(parse_tool_call).collect();
                    ModelTurn { reasoning: None, tool_calls, text: None }
                }
                _ => {
                    let text = obj.get("content").and_then(|c| c.as_str()).map(|s| s.to_string());
                    ModelTurn { reasoning: None, tool_calls: vec![], text }
                }
            }
        }
        _ => ModelTurn::default(),
    }
}

fn parse_tool_call(raw: &Value) -> Option<ModelToolCall> {
    let id = raw.get("id")?.as_str()?.to_string();
    let function = raw.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments_str = function.get("arguments").and_then(|a| a.as_str()).unwrap_or("{}");
    let arguments: Value = serde_json::from_str(arguments_str).unwrap_or_else(|_| serde_json::json!({}));
    Some(ModelToolCall { id, name, arguments })
}

// ---------------------------------------------------------------------------
// NativeModelDriver over Anthropic's Messages API
// ---------------------------------------------------------------------------

/// Drives Anthropic's own native tool-use loop against the live Tool Server
/// Sessions the adapter hands it (§4.7): lists each session's tools up
/// front, converts them to Anthropic tool defs, then alternates
/// model-turn/tool-execution until a turn produces no `tool_use` blocks or
/// `NATIVE_MAX_ITERATIONS` is exceeded.
pub struct AnthropicNativeDriver {
    llm: AnthropicCompletion,
}

struct IndexedTool {
    session_index: usize,
    original_name: String,
}

#[async_trait]
impl NativeModelDriver for AnthropicNativeDriver {
    async fn run(
        &self,
        system_prompt: &str,
        history: &[HistoryTurn],
        prompt: &str,
        sessions: Vec<Arc<tokio::sync::Mutex<MCPClient>>>,
        mut cancel: CancelSignal,
        events: tokio::sync::mpsc::Sender<DriverEvent>,
    ) -> Result<(), RunError> {
        let mut tool_defs = Vec::new();
        let mut tool_index: StdHashMap<String, IndexedTool> = StdHashMap::new();
        for (session_index, session) in sessions.iter().enumerate() {
            let mut guard = session.lock().await;
            let Ok(tools) = guard.list_tools(None).await else { continue };
            for tool in tools {
                let Some(name) = tool.get("name").and_then(|v| v.as_str()) else { continue };
                let prefixed = if tool_index.contains_key(name) { format!("server{session_index}__{name}") } else { name.to_string() };
                let description = tool.get("description").and_then(|v| v.as_str()).unwrap_or_default();
                let schema = tool
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));
                tool_defs.push(serde_json::json!({
                    "name": prefixed,
                    "description": description,
                    "input_schema": schema,
                }));
                tool_index.insert(prefixed, IndexedTool { session_index, original_name: name.to_string() });
            }
        }

        let mut messages: Vec<LLMMessage> = history.to_vec();
        let mut user_turn: LLMMessage = LLMMessage::new();
        user_turn.insert("role".to_string(), Value::String("user".to_string()));
        user_turn.insert("content".to_string(), Value::String(prompt.to_string()));
        messages.push(user_turn);

        let mut system_turn: LLMMessage = LLMMessage::new();
        system_turn.insert("role".to_string(), Value::String("system".to_string()));
        system_turn.insert("content".to_string(), Value::String(system_prompt.to_string()));
        let mut full_messages = vec![system_turn];
        full_messages.extend(messages.clone());

        let mut last_text = String::new();

        for _ in 0..NATIVE_MAX_ITERATIONS {
            if *cancel.borrow() {
                return Err(RunError::Cancelled);
            }

            let (system, rest) = self.llm.split_system_prompt(&full_messages);
            let mut body = self.llm.build_request_body(&rest, if tool_defs.is_empty() { None } else { Some(&tool_defs) });
            if let Some(system) = system {
                body["system"] = serde_json::json!(system);
            }

            let response = self
                .llm
                .send_messages_request(body)
                .await
                .map_err(|e| RunError::ModelError { message: e.to_string() })?;

            let content_blocks = response.get("content").and_then(|c| c.as_array()).cloned().unwrap_or_default();
            let mut tool_uses = Vec::new();
            let mut text_parts = Vec::new();

            for block in &content_blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            text_parts.push(text.to_string());
                            events.send(DriverEvent::Thinking(text.to_string())).await.ok();
                        }
                    }
                    Some("tool_use") => tool_uses.push(block.clone()),
                    _ => {}
                }
            }

            if tool_uses.is_empty() {
                last_text = text_parts.join("");
                break;
            }

            let mut assistant_content = content_blocks.clone();
            let mut tool_results_content = Vec::new();

            for tool_use in &tool_uses {
                if *cancel.borrow() {
                    return Err(RunError::Cancelled);
                }
                let tool_use_id = tool_use.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let name = tool_use.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let input = tool_use.get("input").cloned().unwrap_or_else(|| serde_json::json!({}));

                events.send(DriverEvent::ToolUse { tool_name: name.clone(), args: input.clone() }).await.ok();

                let (result, error) = match tool_index.get(&name) {
                    None => (None, Some(format!("tool not found: {name}"))),
                    Some(indexed) => {
                        let session = &sessions[indexed.session_index];
                        let arguments: StdHashMap<String, Value> =
                            input.as_object().map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).unwrap_or_default();
                        let mut guard = session.lock().await;
                        match guard.call_tool(&indexed.original_name, Some(arguments)).await {
                            Ok(text) => (Some(text), None),
                            Err(e) => (None, Some(e.to_string())),
                        }
                    }
                };

                events
                    .send(DriverEvent::ToolResult { tool_name: name.clone(), result: result.clone(), error: error.clone() })
                    .await
                    .ok();

                tool_results_content.push(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": result.or(error).unwrap_or_default(),
                }));
            }

            let mut assistant_turn: LLMMessage = LLMMessage::new();
            assistant_turn.insert("role".to_string(), Value::String("assistant".to_string()));
            assistant_turn.insert("content".to_string(), Value::Array(std::mem::take(&mut assistant_content)));
            full_messages.push(assistant_turn);

            let mut tool_result_turn: LLMMessage = LLMMessage::new();
            tool_result_turn.insert("role".to_string(), Value::String("user".to_string()));
            tool_result_turn.insert("content".to_string(), Value::Array(tool_results_content));
            full_messages.push(tool_result_turn);
        }

        events.send(DriverEvent::End(last_text)).await.ok();
        Ok(())
    }
}
