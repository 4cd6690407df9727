//! Agent Adapter – Native (C7).
//!
//! Used when `model.sdk_family == NativeMcp`. The adapter hands the model
//! driver live Tool Server Sessions (borrowed from the Router, never
//! owned — §3) and *observes* the driver's own event stream, translating
//! it into `ReasoningStep`s. The driver owns the inner tool-use loop; this
//! adapter does not re-implement it (that is the Wrapper Adapter's job).

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::agents::adapters::{channel, collect_final_response, AgentAdapter, CancelSignal};
use crate::agents::reasoning::{FinalResponse, HistoryTurn, SessionHistory, StepContent};
use crate::config::{AgentDefinition, ModelDefinition};
use crate::errors::RunError;
use crate::mcp::client::MCPClient;
use crate::mcp::router::McpRouter;

/// One event emitted by a native-MCP model driver's own tool-use loop.
/// Mapping to `ReasoningStep` kinds per §4.7:
/// "thinking"→thought, "tool_use"→tool_call, "tool_result"→tool_result,
/// "end"→final_answer.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    Thinking(String),
    ToolUse { tool_name: String, args: Value },
    ToolResult { tool_name: String, result: Option<String>, error: Option<String> },
    End(String),
}

/// Collaborator the native adapter drives — not inherited from (§9: no
/// `Assistant` base-class inheritance; the adapter holds a reference and
/// translates events).
#[async_trait]
pub trait NativeModelDriver: Send + Sync {
    async fn run(
        &self,
        system_prompt: &str,
        history: &[HistoryTurn],
        prompt: &str,
        sessions: Vec<Arc<Mutex<MCPClient>>>,
        cancel: CancelSignal,
        events: mpsc::Sender<DriverEvent>,
    ) -> Result<(), RunError>;
}

pub struct NativeAdapter {
    agent_def: AgentDefinition,
    model_def: ModelDefinition,
    router: Arc<McpRouter>,
    driver: Arc<dyn NativeModelDriver>,
    histories: DashMap<String, Arc<Mutex<SessionHistory>>>,
}

impl NativeAdapter {
    pub fn new(
        agent_def: AgentDefinition,
        model_def: ModelDefinition,
        router: Arc<McpRouter>,
        driver: Arc<dyn NativeModelDriver>,
    ) -> Self {
        Self {
            agent_def,
            model_def,
            router,
            driver,
            histories: DashMap::new(),
        }
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
    ) -> tokio_stream::wrappers::ReceiverStream<crate::agents::reasoning::ReasoningStep> {
        let (tx, rx) = channel(64);
        let router = self.router.clone();
        let driver = self.driver.clone();
        let agent_def = self.agent_def.clone();
        let model_def = self.model_def.clone();
        let history_lock = session_id.as_deref().map(|sid| self.history_for(sid));

        tokio::spawn(async move {
            let sessions = router.native_sessions_for_agent(&agent_def, &model_def).await;

            let history_turns = if let Some(lock) = &history_lock {
                lock.lock().await.turns()
            } else {
                Vec::new()
            };

            let (driver_tx, mut driver_rx) = mpsc::channel::<DriverEvent>(64);
            let driver_cancel = cancel.clone();
            let system_prompt = agent_def.system_prompt.clone();
            let driver_for_task = driver.clone();
            let prompt_for_task = prompt.clone();
            // Drive the model on its own task: the recv loop below is the
            // only consumer of `driver_tx`, so the driver must run
            // concurrently with it rather than after it, or `driver_rx.recv()`
            // would pend forever waiting for events nothing ever sends.
            let run_handle = tokio::spawn(async move {
                driver_for_task
                    .run(&system_prompt, &history_turns, &prompt_for_task, sessions, driver_cancel, driver_tx)
                    .await
            });

            let mut iteration = 1u32;
            let mut saw_incremental_event = false;
            let mut cancel_watch = cancel.clone();
            let mut final_text = String::new();

            loop {
                tokio::select! {
                    changed = cancel_watch.changed() => {
                        if changed.is_err() || *cancel_watch.borrow() {
                            let _ = tx.send(crate::agents::reasoning::ReasoningStep::new(
                                StepContent::Error { kind: "Cancelled".to_string(), message: "run cancelled".to_string() },
                                iteration,
                            )).await;
                            return;
                        }
                    }
                    event = driver_rx.recv() => {
                        match event {
                            Some(DriverEvent::Thinking(text)) => {
                                saw_incremental_event = true;
                                let _ = tx.send(crate::agents::reasoning::ReasoningStep::new(
                                    StepContent::Thought { text }, iteration,
                                )).await;
                                iteration += 1;
                            }
                            Some(DriverEvent::ToolUse { tool_name, args }) => {
                                saw_incremental_event = true;
                                let _ = tx.send(crate::agents::reasoning::ReasoningStep::new(
                                    StepContent::ToolCall { tool_name, args }, iteration,
                                )).await;
                                iteration += 1;
                            }
                            Some(DriverEvent::ToolResult { tool_name, result, error }) => {
                                saw_incremental_event = true;
                                let _ = tx.send(crate::agents::reasoning::ReasoningStep::new(
                                    StepContent::ToolResult { tool_name, result, error }, iteration,
                                )).await;
                                iteration += 1;
                            }
                            Some(DriverEvent::End(text)) => {
                                final_text = text;
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            let run_result = match run_handle.await {
                Ok(result) => result,
                Err(join_err) => Err(RunError::ModelError { message: join_err.to_string() }),
            };

            match run_result {
                Ok(()) => {
                    if saw_incremental_event {
                        let _ = tx.send(crate::agents::reasoning::ReasoningStep::new(
                            StepContent::FinalAnswer { text: final_text.clone() },
                            iteration,
                        )).await;
                    } else {
                        // No incremental events were ever observed: fall back
                        // to the sentence-splitting policy (§4.7 fallback).
                        let sentences = crate::agents::reasoning::split_into_sentences(&final_text);
                        let last = sentences.len().saturating_sub(1);
                        if sentences.is_empty() {
                            let _ = tx.send(crate::agents::reasoning::ReasoningStep::new(
                                StepContent::FinalAnswer { text: final_text.clone() },
                                iteration,
                            )).await;
                        }
                        for (i, sentence) in sentences.into_iter().enumerate() {
                            let content = if i == last {
                                StepContent::FinalAnswer { text: sentence }
                            } else {
                                StepContent::Thought { text: sentence }
                            };
                            let _ = tx.send(crate::agents::reasoning::ReasoningStep::new(content, iteration)).await;
                            iteration += 1;
                        }
                    }
                    if let Some(lock) = &history_lock {
                        let mut turn = HistoryTurn::new();
                        turn.insert("role".to_string(), Value::String("user".to_string()));
                        turn.insert("content".to_string(), Value::String(prompt.clone()));
                        lock.lock().await.push(turn);
                        let mut assistant_turn = HistoryTurn::new();
                        assistant_turn.insert("role".to_string(), Value::String("assistant".to_string()));
                        assistant_turn.insert("content".to_string(), Value::String(final_text));
                        lock.lock().await.push(assistant_turn);
                    }
                }
                Err(e) => {
                    let _ = tx.send(crate::agents::reasoning::ReasoningStep::new(
                        StepContent::Error { kind: "ModelError".to_string(), message: e.to_string() },
                        iteration,
                    )).await;
                }
            }
        });

        rx
    }
}

#[async_trait]
impl AgentAdapter for NativeAdapter {
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
    ) -> Pin<Box<dyn Stream<Item = crate::agents::reasoning::ReasoningStep> + Send + 'a>> {
        let rx = self.spawn_run(prompt.to_string(), session_id.map(str::to_string), cancel);
        Box::pin(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SdkFamily;
    use std::collections::HashMap;
    use tokio_stream::StreamExt;

    struct StubDriver {
        emit_incremental: bool,
    }

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
            if self.emit_incremental {
                events.send(DriverEvent::Thinking("let me check".into())).await.ok();
                events
                    .send(DriverEvent::ToolUse {
                        tool_name: "filesystem__read_file".into(),
                        args: serde_json::json!({"path": "/tmp/a.txt"}),
                    })
                    .await
                    .ok();
                events
                    .send(DriverEvent::ToolResult {
                        tool_name: "filesystem__read_file".into(),
                        result: Some("hello".into()),
                        error: None,
                    })
                    .await
                    .ok();
            }
            events.send(DriverEvent::End("final text".into())).await.ok();
            Ok(())
        }
    }

    fn agent_def() -> AgentDefinition {
        AgentDefinition {
            name: "researcher".into(),
            role: "researcher".into(),
            description: String::new(),
            system_prompt: "be helpful".into(),
            model_id: "claude".into(),
            tool_servers: vec![],
            enabled: true,
            sdk_hint: Default::default(),
        }
    }

    fn model_def() -> ModelDefinition {
        ModelDefinition {
            id: "claude".into(),
            provider_id: "anthropic".into(),
            base_url: None,
            api_key_ref: None,
            supports_mcp: true,
            sdk_family: SdkFamily::NativeMcp,
            supports_extended_capabilities: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn emits_full_step_sequence_for_incremental_driver() {
        let router = Arc::new(McpRouter::new(vec![]));
        let driver = Arc::new(StubDriver { emit_incremental: true });
        let adapter = NativeAdapter::new(agent_def(), model_def(), router, driver);
        let (_tx, cancel) = crate::agents::adapters::new_cancel_signal();

        let steps: Vec<_> = adapter.run_stream("read /tmp/a.txt", None, cancel).collect().await;
        assert!(matches!(steps[0].content, StepContent::Thought { .. }));
        assert!(matches!(steps[1].content, StepContent::ToolCall { .. }));
        assert!(matches!(steps[2].content, StepContent::ToolResult { .. }));
        assert!(matches!(steps[3].content, StepContent::FinalAnswer { .. }));
    }

    #[tokio::test]
    async fn falls_back_to_sentence_split_without_incremental_events() {
        let router = Arc::new(McpRouter::new(vec![]));
        let driver = Arc::new(StubDriver { emit_incremental: false });
        let adapter = NativeAdapter::new(agent_def(), model_def(), router, driver);
        let (_tx, cancel) = crate::agents::adapters::new_cancel_signal();

        let steps: Vec<_> = adapter.run_stream("hello", None, cancel).collect().await;
        assert!(steps.iter().any(|s| matches!(s.content, StepContent::FinalAnswer { .. })));
    }
}
