//! Agent Adapters (C7/C8): the polymorphic agent-runtime interface.
//!
//! Two back-ends share one contract (`run`/`run_stream`) — duck-typed
//! `hasattr(agent, 'run_with_reasoning_stream')` dispatch in the source
//! becomes two explicit trait methods with a default `run_stream` that
//! wraps `run` via the sentence-splitter (§9 design note).

pub mod native;
pub mod wrapper;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::agents::reasoning::{split_into_sentences, FinalResponse, FinishReason, ReasoningStep, StepContent};
use crate::errors::RunError;

pub use native::NativeAdapter;
pub use wrapper::WrapperAdapter;

/// A cancellation signal shared between the Session Hub / Scheduler and a
/// running adapter. `true` means "stop at the next suspension point."
pub type CancelSignal = watch::Receiver<bool>;

pub fn new_cancel_signal() -> (watch::Sender<bool>, CancelSignal) {
    watch::channel(false)
}

/// Contract common to both back-ends (§4.7, §4.8).
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Run to completion, returning only the final response (non-streaming
    /// HTTP path, scheduled task invocations).
    async fn run(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        cancel: CancelSignal,
    ) -> Result<FinalResponse, RunError>;

    /// Run, yielding `ReasoningStep`s as they are produced. Default
    /// implementation: call `run()` then synthesize steps from the final
    /// text via the sentence-splitter, since no incremental driver is
    /// available (§4.8 streaming variant fallback).
    fn run_stream<'a>(
        &'a self,
        prompt: &'a str,
        session_id: Option<&'a str>,
        cancel: CancelSignal,
    ) -> Pin<Box<dyn Stream<Item = ReasoningStep> + Send + 'a>> {
        Box::pin(async_stream::stream! {
            match self.run(prompt, session_id, cancel).await {
                Ok(response) => {
                    let mut iteration = 1u32;
                    let sentences = split_into_sentences(&response.text);
                    let last_index = sentences.len().saturating_sub(1);
                    if sentences.is_empty() {
                        yield ReasoningStep::new(
                            StepContent::FinalAnswer { text: response.text.clone() },
                            iteration,
                        );
                    }
                    for (i, sentence) in sentences.into_iter().enumerate() {
                        let content = if i == last_index && response.finish_reason == FinishReason::Stop {
                            StepContent::FinalAnswer { text: sentence }
                        } else {
                            StepContent::Thought { text: sentence }
                        };
                        yield ReasoningStep::new(content, iteration);
                        iteration += 1;
                    }
                    if response.finish_reason != FinishReason::Stop {
                        let kind = match response.finish_reason {
                            FinishReason::Error => "ToolExecutionError",
                            FinishReason::Cancelled => "Cancelled",
                            FinishReason::IterationLimit => "IterationLimit",
                            FinishReason::Stop => unreachable!(),
                        };
                        yield ReasoningStep::new(
                            StepContent::Error { kind: kind.to_string(), message: response.text },
                            iteration,
                        );
                    }
                }
                Err(e) => {
                    yield ReasoningStep::new(
                        StepContent::Error { kind: "RunError".to_string(), message: e.to_string() },
                        1,
                    );
                }
            }
        })
    }
}

/// Helper for adapters whose "real" implementation is `run_stream`: drain a
/// step stream into a `FinalResponse` for the buffered `run()` path,
/// matching §9's note that the stream is the primitive and `run` is
/// derived from it rather than the other way around for these back-ends.
pub async fn collect_final_response(
    mut receiver: ReceiverStream<ReasoningStep>,
) -> Result<FinalResponse, RunError> {
    let mut last_text = String::new();
    let mut finish_reason = FinishReason::Stop;
    while let Some(step) = receiver.next().await {
        match step.content {
            StepContent::FinalAnswer { text } => {
                last_text = text;
                finish_reason = FinishReason::Stop;
            }
            StepContent::Error { kind, message } => {
                last_text = message;
                finish_reason = match kind.as_str() {
                    "Cancelled" => FinishReason::Cancelled,
                    "IterationLimit" => FinishReason::IterationLimit,
                    _ => FinishReason::Error,
                };
            }
            _ => {}
        }
    }
    Ok(FinalResponse { text: last_text, finish_reason })
}

pub(crate) fn channel(capacity: usize) -> (mpsc::Sender<ReasoningStep>, ReceiverStream<ReasoningStep>) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter {
        response: FinalResponse,
    }

    #[async_trait]
    impl AgentAdapter for StubAdapter {
        async fn run(
            &self,
            _prompt: &str,
            _session_id: Option<&str>,
            _cancel: CancelSignal,
        ) -> Result<FinalResponse, RunError> {
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn default_run_stream_splits_sentences_and_promotes_last() {
        let adapter = StubAdapter {
            response: FinalResponse {
                text: "First part. Second part.".to_string(),
                finish_reason: FinishReason::Stop,
            },
        };
        let (_tx, cancel) = new_cancel_signal();
        let steps: Vec<_> = adapter
            .run_stream("prompt", None, cancel)
            .collect()
            .await;
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0].content, StepContent::Thought { .. }));
        assert!(matches!(steps[1].content, StepContent::FinalAnswer { .. }));
        assert!(steps[0].iteration < steps[1].iteration);
    }

    #[tokio::test]
    async fn default_run_stream_emits_error_step_on_failure() {
        let adapter = StubAdapter {
            response: FinalResponse {
                text: "".to_string(),
                finish_reason: FinishReason::Stop,
            },
        };
        let (_tx, cancel) = new_cancel_signal();
        let steps: Vec<_> = adapter.run_stream("p", None, cancel).collect().await;
        assert_eq!(steps.len(), 1);
        assert!(matches!(steps[0].content, StepContent::FinalAnswer { .. }));
    }
}
