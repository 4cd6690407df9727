//! Agent Adapter – Wrapper (C8).
//!
//! Used when `model.sdk_family == FunctionCall`. Unlike the native adapter,
//! this one owns the inner tool-use loop explicitly (§4.8): compose input,
//! call the model, execute any `tool_call`s through the Router, feed
//! results back, repeat up to `max_iterations`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::Stream;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::agents::adapters::{channel, collect_final_response, AgentAdapter, CancelSignal};
use crate::agents::cache::cache_handler::CacheHandler;
use crate::agents::reasoning::{FinalResponse, FinishReason, HistoryTurn, ReasoningStep, SessionHistory, StepContent};
use crate::config::{AgentDefinition, ModelDefinition};
use crate::errors::RunError;
use crate::mcp::router::McpRouter;

/// Default bound on the tool-call loop (§4.8).
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// One tool call the model asked for.
#[derive(Debug, Clone)]
pub struct ModelToolCall {
    pub id: String,
    /// The (possibly `<server>__<tool>`-prefixed) function name from the
    /// catalog handed to the model.
    pub name: String,
    pub arguments: Value,
}

/// One model turn: optional free-text reasoning alongside the tool calls
/// (if any) or the final text (if none).
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ModelToolCall>,
    pub text: Option<String>,
}

/// Collaborator the wrapper adapter drives: a function-calling model SDK.
#[async_trait]
pub trait FunctionCallModel: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[HistoryTurn],
        tools: &[crate::mcp::catalog::FunctionCallSchema],
    ) -> Result<ModelTurn, RunError>;
}

pub struct WrapperAdapter {
    agent_def: AgentDefinition,
    model_def: ModelDefinition,
    router: Arc<McpRouter>,
    model: Arc<dyn FunctionCallModel>,
    max_iterations: u32,
    histories: DashMap<String, Arc<Mutex<SessionHistory>>>,
    tool_cache: Arc<CacheHandler>,
}

impl WrapperAdapter {
    pub fn new(
        agent_def: AgentDefinition,
        model_def: ModelDefinition,
        router: Arc<McpRouter>,
        model: Arc<dyn FunctionCallModel>,
    ) -> Self {
        Self {
            agent_def,
            model_def,
            router,
            model,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            histories: DashMap::new(),
            tool_cache: Arc::new(CacheHandler::new()),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    fn history_for(&self, session_id: &str) -> Arc<Mutex<SessionHistory>> {
        self.histories
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionHistory::new())))
            .clone()
    }

    #[tracing::instrument(skip(self, prompt, cancel), fields(agent_name = %self.agent_def.name, session_id = ?session_id))]
    fn spawn_run(
        &self,
        prompt: String,
        session_id: Option<String>,
        cancel: CancelSignal,
    ) -> tokio_stream::wrappers::ReceiverStream<ReasoningStep> {
        let (tx, rx) = channel(64);
        let router = self.router.clone();
        let model = self.model.clone();
        let agent_def = self.agent_def.clone();
        let model_def = self.model_def.clone();
        let max_iterations = self.max_iterations;
        let tool_cache = self.tool_cache.clone();
        let history_lock = session_id.as_deref().map(|sid| self.history_for(sid));

        tokio::spawn(async move {
            run_loop(
                router,
                model,
                agent_def,
                model_def,
                max_iterations,
                tool_cache,
                history_lock,
                prompt,
                cancel,
                tx,
            )
            .await;
        });

        rx
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    router: Arc<McpRouter>,
    model: Arc<dyn FunctionCallModel>,
    agent_def: AgentDefinition,
    model_def: ModelDefinition,
    max_iterations: u32,
    tool_cache: Arc<CacheHandler>,
    history_lock: Option<Arc<Mutex<SessionHistory>>>,
    prompt: String,
    mut cancel: CancelSignal,
    tx: tokio::sync::mpsc::Sender<ReasoningStep>,
) {
    let catalog = match router.tools_for_agent(&agent_def, &model_def).await {
        Ok(c) => c,
        Err(e) => {
            let _ = tx
                .send(ReasoningStep::new(
                    StepContent::Error { kind: "ConfigInvalid".to_string(), message: e.to_string() },
                    1,
                ))
                .await;
            return;
        }
    };

    let mut messages: Vec<HistoryTurn> = if let Some(lock) = &history_lock {
        lock.lock().await.turns()
    } else {
        Vec::new()
    };
    let mut user_turn = HistoryTurn::new();
    user_turn.insert("role".to_string(), Value::String("user".to_string()));
    user_turn.insert("content".to_string(), Value::String(prompt.clone()));
    messages.push(user_turn);

    let mut iteration = 1u32;

    for _ in 0..max_iterations {
        if is_cancelled(&mut cancel) {
            emit_cancelled(&tx, iteration).await;
            return;
        }

        let turn = match model.complete(&agent_def.system_prompt, &messages, catalog.schemas()).await {
            Ok(t) => t,
            Err(e) => {
                let _ = tx
                    .send(ReasoningStep::new(
                        StepContent::Error { kind: "ToolExecutionError".to_string(), message: e.to_string() },
                        iteration,
                    ))
                    .await;
                return;
            }
        };

        if let Some(reasoning) = &turn.reasoning {
            let _ = tx
                .send(ReasoningStep::new(StepContent::Thought { text: reasoning.clone() }, iteration))
                .await;
            iteration += 1;
        }

        if turn.tool_calls.is_empty() {
            let text = turn.text.unwrap_or_default();
            let _ = tx
                .send(ReasoningStep::new(StepContent::FinalAnswer { text: text.clone() }, iteration))
                .await;

            let mut assistant_turn = HistoryTurn::new();
            assistant_turn.insert("role".to_string(), Value::String("assistant".to_string()));
            assistant_turn.insert("content".to_string(), Value::String(text));
            if let Some(lock) = &history_lock {
                let mut history = lock.lock().await;
                history.push(user_turn_snapshot(&prompt));
                history.push(assistant_turn);
            }
            return;
        }

        let mut assistant_turn = HistoryTurn::new();
        assistant_turn.insert("role".to_string(), Value::String("assistant".to_string()));
        assistant_turn.insert(
            "tool_calls".to_string(),
            serde_json::to_value(
                turn.tool_calls
                    .iter()
                    .map(|c| serde_json::json!({"id": c.id, "name": c.name, "arguments": c.arguments}))
                    .collect::<Vec<_>>(),
            )
            .unwrap_or(Value::Null),
        );
        messages.push(assistant_turn);

        for call in &turn.tool_calls {
            if is_cancelled(&mut cancel) {
                emit_cancelled(&tx, iteration).await;
                return;
            }

            let _ = tx
                .send(ReasoningStep::new(
                    StepContent::ToolCall { tool_name: call.name.clone(), args: call.arguments.clone() },
                    iteration,
                ))
                .await;
            iteration += 1;

            let origin = catalog.origin_of(&call.name).cloned();
            let (result_text, error_text) = match origin {
                None => (None, Some(format!("tool not found: {}", call.name))),
                Some(origin) => {
                    let args_key = call.arguments.to_string();
                    if let Some(cached) = tool_cache.read(&call.name, &args_key) {
                        (Some(cached.as_str().unwrap_or_default().to_string()), None)
                    } else {
                        let arguments: HashMap<String, Value> = call
                            .arguments
                            .as_object()
                            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                            .unwrap_or_default();

                        let invoke_fut = router.invoke_wrapped(&origin.server_name, &origin.original_tool_name, arguments);
                        tokio::pin!(invoke_fut);

                        tokio::select! {
                            changed = cancel.changed() => {
                                if changed.is_err() || *cancel.borrow() {
                                    emit_cancelled(&tx, iteration).await;
                                    return;
                                }
                                (None, Some("cancelled".to_string()))
                            }
                            result = &mut invoke_fut => {
                                match result {
                                    Ok(text) => {
                                        tool_cache.add(&call.name, &args_key, Value::String(text.clone()));
                                        (Some(text), None)
                                    }
                                    Err(e) => (None, Some(e.to_string())),
                                }
                            }
                        }
                    }
                }
            };

            let _ = tx
                .send(ReasoningStep::new(
                    StepContent::ToolResult {
                        tool_name: call.name.clone(),
                        result: result_text.clone(),
                        error: error_text.clone(),
                    },
                    iteration,
                ))
                .await;
            iteration += 1;

            let mut tool_message = HistoryTurn::new();
            tool_message.insert("role".to_string(), Value::String("tool".to_string()));
            tool_message.insert("tool_call_id".to_string(), Value::String(call.id.clone()));
            tool_message.insert(
                "content".to_string(),
                Value::String(result_text.or(error_text).unwrap_or_default()),
            );
            messages.push(tool_message);
        }
    }

    let _ = tx
        .send(ReasoningStep::new(
            StepContent::Error {
                kind: "IterationLimit".to_string(),
                message: format!("exceeded max_iterations ({max_iterations})"),
            },
            iteration,
        ))
        .await;
}

fn is_cancelled(cancel: &mut CancelSignal) -> bool {
    *cancel.borrow()
}

async fn emit_cancelled(tx: &tokio::sync::mpsc::Sender<ReasoningStep>, iteration: u32) {
    let _ = tx
        .send(ReasoningStep::new(
            StepContent::Error { kind: "Cancelled".to_string(), message: "run cancelled".to_string() },
            iteration,
        ))
        .await;
}

fn user_turn_snapshot(prompt: &str) -> HistoryTurn {
    let mut turn = HistoryTurn::new();
    turn.insert("role".to_string(), Value::String("user".to_string()));
    turn.insert("content".to_string(), Value::String(prompt.to_string()));
    turn
}

#[async_trait]
impl AgentAdapter for WrapperAdapter {
    async fn run(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        cancel: CancelSignal,
    ) -> Result<FinalResponse, RunError> {
        let rx = self.spawn_run(prompt.to_string(), session_id.map(str::to_string), cancel);
        collect_final_response(rx).await
    }

    fn run_stream<'a>(
        &'a self,
        prompt: &'a str,
        session_id: Option<&'a str>,
        cancel: CancelSignal,
    ) -> Pin<Box<dyn Stream<Item = ReasoningStep> + Send + 'a>> {
        let rx = self.spawn_run(prompt.to_string(), session_id.map(str::to_string), cancel);
        Box::pin(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SdkFamily;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_stream::StreamExt;

    struct ScriptedModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FunctionCallModel for ScriptedModel {
        async fn complete(
            &self,
            _system_prompt: &str,
            _messages: &[HistoryTurn],
            _tools: &[crate::mcp::catalog::FunctionCallSchema],
        ) -> Result<ModelTurn, RunError> {
            let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
            if call_index == 0 {
                Ok(ModelTurn {
                    reasoning: Some("I should check the file".to_string()),
                    tool_calls: vec![],
                    text: None,
                })
            } else {
                Ok(ModelTurn {
                    reasoning: None,
                    tool_calls: vec![],
                    text: Some("the file says hello".to_string()),
                })
            }
        }
    }

    fn agent_def() -> AgentDefinition {
        AgentDefinition {
            name: "researcher".into(),
            role: "researcher".into(),
            description: String::new(),
            system_prompt: "be helpful".into(),
            model_id: "deepseek-chat".into(),
            tool_servers: vec![],
            enabled: true,
            sdk_hint: Default::default(),
        }
    }

    fn model_def() -> ModelDefinition {
        ModelDefinition {
            id: "deepseek-chat".into(),
            provider_id: "deepseek".into(),
            base_url: None,
            api_key_ref: None,
            supports_mcp: false,
            sdk_family: SdkFamily::FunctionCall,
            supports_extended_capabilities: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn reaches_final_answer_without_tools_bound() {
        let router = Arc::new(McpRouter::new(vec![]));
        let model = Arc::new(ScriptedModel { calls: AtomicUsize::new(0) });
        let adapter = WrapperAdapter::new(agent_def(), model_def(), router, model);
        let (_tx, cancel) = crate::agents::adapters::new_cancel_signal();

        let steps: Vec<_> = adapter.run_stream("summarize", None, cancel).collect().await;
        assert!(matches!(steps[0].content, StepContent::Thought { .. }));
        assert!(matches!(steps.last().unwrap().content, StepContent::FinalAnswer { .. }));
    }

    #[tokio::test]
    async fn iteration_limit_terminates_run() {
        struct InfiniteToolCaller;
        #[async_trait]
        impl FunctionCallModel for InfiniteToolCaller {
            async fn complete(
                &self,
                _s: &str,
                _m: &[HistoryTurn],
                _t: &[crate::mcp::catalog::FunctionCallSchema],
            ) -> Result<ModelTurn, RunError> {
                Ok(ModelTurn {
                    reasoning: None,
                    tool_calls: vec![ModelToolCall {
                        id: "1".into(),
                        name: "nonexistent__tool".into(),
                        arguments: serde_json::json!({}),
                    }],
                    text: None,
                })
            }
        }

        let router = Arc::new(McpRouter::new(vec![]));
        let model = Arc::new(InfiniteToolCaller);
        let adapter = WrapperAdapter::new(agent_def(), model_def(), router, model).with_max_iterations(3);
        let (_tx, cancel) = crate::agents::adapters::new_cancel_signal();

        let steps: Vec<_> = adapter.run_stream("loop", None, cancel).collect().await;
        let last = steps.last().unwrap();
        assert!(matches!(
            &last.content,
            StepContent::Error { kind, .. } if kind == "IterationLimit"
        ));
    }
}
