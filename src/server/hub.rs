//! Session Hub & Streaming Fan-out (C13).
//!
//! One `SessionHub` owns every live `ClientSession`. Each bidirectional
//! connection gets its own outbound queue (single-writer: the reasoning-step
//! drain task; single-reader: the network sender) and its own heartbeat
//! loop, grounded on `ConaryLabs-Mira`'s `WebSocketConnection`
//! (`backend/src/api/ws/chat/connection.rs`) and `HeartbeatManager`
//! (`.../heartbeat.rs`) — a `watch`-channel stop signal plus
//! `tokio::time::interval` with `MissedTickBehavior::Delay`. The teacher
//! repo carries no WebSocket code of its own (its `axum` dependency lacked
//! the `ws` feature before this transformation).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use crate::agents::adapters::{new_cancel_signal, AgentAdapter};
use crate::agents::reasoning::{FinishReason, ReasoningStep, StepContent};
use crate::agents::registry::AgentRegistry;

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);
const MAX_MISSED_PONGS: u32 = 3;
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Inbound message envelope (§4.13: `{type, payload|data}`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Chat {
        prompt: String,
        agent_name: String,
        #[serde(default)]
        stream_reasoning: bool,
    },
    Ping {
        ts: i64,
    },
    Cancel {},
}

/// Outbound message envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Connected {
        session_id: String,
    },
    ReasoningStart,
    ReasoningStep {
        kind: &'static str,
        content: StepContent,
        iteration: u32,
        ts: DateTime<Utc>,
    },
    ReasoningComplete,
    Error {
        message: String,
    },
    Pong {
        ts: i64,
    },
}

impl OutboundMessage {
    fn from_step(step: &ReasoningStep) -> Self {
        let kind = match step.content {
            StepContent::Thought { .. } => "thought",
            StepContent::ToolCall { .. } => "tool_call",
            StepContent::ToolResult { .. } => "tool_result",
            StepContent::FinalAnswer { .. } => "final_answer",
            StepContent::Error { .. } => "error",
        };
        OutboundMessage::ReasoningStep {
            kind,
            content: step.content.clone(),
            iteration: step.iteration,
            ts: step.emitted_at,
        }
    }

    /// Drop-priority class used by the backpressure policy (§4.13): thought
    /// steps are dropped first, then tool_result; tool_call and
    /// final_answer are preserved as long as possible.
    fn drop_priority(&self) -> u8 {
        match self {
            OutboundMessage::ReasoningStep { kind: "thought", .. } => 0,
            OutboundMessage::ReasoningStep { kind: "tool_result", .. } => 1,
            OutboundMessage::ReasoningStep { kind: "tool_call", .. } => 2,
            OutboundMessage::ReasoningStep { kind: "final_answer", .. } => 3,
            _ => 2,
        }
    }
}

/// Bounded, single-writer FIFO queue with the §4.13 drop policy: when full,
/// drop the oldest lowest-priority (`thought`, then `tool_result`) entry
/// before accepting a new one. If the only thing left to drop would be the
/// `final_answer` itself, the caller is told to close the session instead.
struct OutboundQueue {
    items: SyncMutex<VecDeque<OutboundMessage>>,
    capacity: usize,
    notify: Notify,
}

enum PushOutcome {
    Accepted,
    MustCloseWithBackpressure,
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: SyncMutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    fn push(&self, msg: OutboundMessage) -> PushOutcome {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            let incoming_is_final_answer =
                matches!(&msg, OutboundMessage::ReasoningStep { kind: "final_answer", .. });
            let droppable = items
                .iter()
                .enumerate()
                .filter(|(_, m)| m.drop_priority() < 3)
                .min_by_key(|(_, m)| m.drop_priority())
                .map(|(i, _)| i);
            match droppable {
                Some(idx) => {
                    items.remove(idx);
                }
                None if incoming_is_final_answer => {
                    // Queue is saturated with tool_calls/final_answers; the
                    // new final_answer cannot be delivered.
                    return PushOutcome::MustCloseWithBackpressure;
                }
                None => {
                    // Nothing safe to drop and the new message is not itself
                    // a final_answer: drop the new message silently rather
                    // than evict a preserved tool_call/final_answer.
                    return PushOutcome::Accepted;
                }
            }
        }
        items.push_back(msg);
        drop(items);
        self.notify.notify_one();
        PushOutcome::Accepted
    }

    async fn pop(&self) -> OutboundMessage {
        loop {
            if let Some(msg) = self.items.lock().pop_front() {
                return msg;
            }
            self.notify.notified().await;
        }
    }
}

/// One live bidirectional client session (§3 data model).
pub struct ClientSession {
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    last_activity_at: SyncMutex<DateTime<Utc>>,
    missed_pongs: AtomicU32,
    queue: OutboundQueue,
    current_run_cancel: AsyncMutex<Option<watch::Sender<bool>>>,
    closed: watch::Sender<bool>,
}

impl ClientSession {
    fn new(session_id: String, capacity: usize) -> Self {
        let (closed_tx, _rx) = watch::channel(false);
        Self {
            session_id,
            connected_at: Utc::now(),
            last_activity_at: SyncMutex::new(Utc::now()),
            missed_pongs: AtomicU32::new(0),
            queue: OutboundQueue::new(capacity),
            current_run_cancel: AsyncMutex::new(None),
            closed: closed_tx,
        }
    }

    fn touch(&self) {
        *self.last_activity_at.lock() = Utc::now();
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn mark_closed(&self) {
        self.closed.send_replace(true);
    }

    /// Send a message, applying the bounded-queue drop policy. Returns
    /// `false` if the session must close (final_answer could not be
    /// delivered even after dropping lower-priority entries).
    fn send(&self, msg: OutboundMessage) -> bool {
        if self.is_closed() {
            return true;
        }
        matches!(self.queue.push(msg), PushOutcome::Accepted)
    }

    async fn cancel_in_flight_run(&self) {
        if let Some(tx) = self.current_run_cancel.lock().await.take() {
            let _ = tx.send(true);
        }
    }
}

/// Owns every live `ClientSession` and is the sole writer to their outbound
/// queues (§3 ownership rule).
pub struct SessionHub {
    sessions: DashMap<String, Arc<ClientSession>>,
    outbound_queue_capacity: usize,
}

impl SessionHub {
    pub fn new(outbound_queue_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            outbound_queue_capacity,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drive one accepted WebSocket connection end to end: send `connected`,
    /// start the heartbeat, then loop reading inbound frames and draining
    /// the outbound queue until the socket closes.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, registry: Arc<AgentRegistry>, session_id: Option<String>) {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Arc::new(ClientSession::new(session_id.clone(), self.outbound_queue_capacity));
        self.sessions.insert(session_id.clone(), session.clone());

        session.send(OutboundMessage::Connected { session_id: session_id.clone() });

        let (mut sink, mut stream) = socket.split();

        let heartbeat_session = session.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if heartbeat_session.is_closed() {
                    break;
                }
                let missed = heartbeat_session.missed_pongs.fetch_add(1, Ordering::SeqCst) + 1;
                if missed > MAX_MISSED_PONGS {
                    tracing::info!(session_id = %heartbeat_session.session_id, "client stale after three missed pings, closing");
                    heartbeat_session.mark_closed();
                    heartbeat_session.cancel_in_flight_run().await;
                    break;
                }
                heartbeat_session.send(OutboundMessage::Pong { ts: Utc::now().timestamp() });
            }
        });

        let writer_session = session.clone();
        let writer_handle = tokio::spawn(async move {
            loop {
                if writer_session.is_closed() {
                    break;
                }
                let msg = writer_session.queue.pop().await;
                let text = serde_json::to_string(&msg).unwrap_or_default();
                if sink.send(Message::Text(text.into())).await.is_err() {
                    writer_session.mark_closed();
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(Ok(frame)) = stream.next().await {
            if session.is_closed() {
                break;
            }
            let text = match frame {
                Message::Text(t) => t.to_string(),
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
            };
            session.touch();
            match serde_json::from_str::<InboundMessage>(&text) {
                Ok(InboundMessage::Ping { ts }) => {
                    session.missed_pongs.store(0, Ordering::SeqCst);
                    session.send(OutboundMessage::Pong { ts });
                }
                Ok(InboundMessage::Cancel {}) => {
                    session.cancel_in_flight_run().await;
                }
                Ok(InboundMessage::Chat { prompt, agent_name, stream_reasoning }) => {
                    self.clone()
                        .spawn_run(session.clone(), registry.clone(), agent_name, prompt, stream_reasoning);
                }
                Err(e) => {
                    session.send(OutboundMessage::Error { message: format!("malformed message: {e}") });
                }
            }
        }

        // Disconnect (client closed or loop broke): cancel any in-flight
        // run so it does not become orphan work (§5, P6, Scenario 5).
        session.mark_closed();
        session.cancel_in_flight_run().await;
        heartbeat_handle.abort();
        writer_handle.abort();
        self.sessions.remove(&session_id);
    }

    fn spawn_run(
        self: Arc<Self>,
        session: Arc<ClientSession>,
        registry: Arc<AgentRegistry>,
        agent_name: String,
        prompt: String,
        stream_reasoning: bool,
    ) {
        tokio::spawn(async move {
            let Some(adapter) = registry.get(&agent_name) else {
                session.send(OutboundMessage::Error { message: format!("unknown agent '{agent_name}'") });
                return;
            };

            let (cancel_tx, cancel_rx) = new_cancel_signal();
            *session.current_run_cancel.lock().await = Some(cancel_tx);

            session.send(OutboundMessage::ReasoningStart);

            if stream_reasoning {
                drain_stream(&session, adapter.as_ref(), &prompt, cancel_rx).await;
            } else {
                run_buffered(&session, adapter.as_ref(), &prompt, cancel_rx).await;
            }

            session.send(OutboundMessage::ReasoningComplete);
            *session.current_run_cancel.lock().await = None;
        });
    }
}

async fn drain_stream(
    session: &ClientSession,
    adapter: &dyn AgentAdapter,
    prompt: &str,
    cancel: crate::agents::adapters::CancelSignal,
) {
    use tokio_stream::StreamExt as _;
    let mut steps = adapter.run_stream(prompt, None, cancel);
    while let Some(step) = steps.next().await {
        let must_close = !session.send(OutboundMessage::from_step(&step));
        if must_close {
            session.send(OutboundMessage::Error { message: "backpressure: outbound queue overflowed".to_string() });
            session.mark_closed();
            return;
        }
        if step.is_final() {
            break;
        }
    }
}

async fn run_buffered(
    session: &ClientSession,
    adapter: &dyn AgentAdapter,
    prompt: &str,
    cancel: crate::agents::adapters::CancelSignal,
) {
    let step = match adapter.run(prompt, None, cancel).await {
        Ok(response) => {
            let content = match response.finish_reason {
                FinishReason::Stop => StepContent::FinalAnswer { text: response.text },
                FinishReason::Cancelled => StepContent::Error { kind: "Cancelled".to_string(), message: response.text },
                FinishReason::IterationLimit => StepContent::Error { kind: "IterationLimit".to_string(), message: response.text },
                FinishReason::Error => StepContent::Error { kind: "ToolExecutionError".to_string(), message: response.text },
            };
            ReasoningStep::new(content, 1)
        }
        Err(e) => ReasoningStep::new(StepContent::Error { kind: "RunError".to_string(), message: e.to_string() }, 1),
    };
    session.send(OutboundMessage::from_step(&step));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_priority_orders_thought_before_tool_result_before_preserved_kinds() {
        let thought = OutboundMessage::ReasoningStep {
            kind: "thought",
            content: StepContent::Thought { text: "x".into() },
            iteration: 1,
            ts: Utc::now(),
        };
        let tool_result = OutboundMessage::ReasoningStep {
            kind: "tool_result",
            content: StepContent::ToolResult { tool_name: "t".into(), result: None, error: None },
            iteration: 1,
            ts: Utc::now(),
        };
        let final_answer = OutboundMessage::ReasoningStep {
            kind: "final_answer",
            content: StepContent::FinalAnswer { text: "done".into() },
            iteration: 1,
            ts: Utc::now(),
        };
        assert!(thought.drop_priority() < tool_result.drop_priority());
        assert!(tool_result.drop_priority() < final_answer.drop_priority());
    }

    #[test]
    fn queue_drops_oldest_thought_when_full_rather_than_evicting_final_answer() {
        let queue = OutboundQueue::new(2);
        queue.push(OutboundMessage::ReasoningStep {
            kind: "thought",
            content: StepContent::Thought { text: "a".into() },
            iteration: 1,
            ts: Utc::now(),
        });
        queue.push(OutboundMessage::ReasoningStep {
            kind: "final_answer",
            content: StepContent::FinalAnswer { text: "done".into() },
            iteration: 2,
            ts: Utc::now(),
        });
        let outcome = queue.push(OutboundMessage::ReasoningStep {
            kind: "thought",
            content: StepContent::Thought { text: "b".into() },
            iteration: 3,
            ts: Utc::now(),
        });
        assert!(matches!(outcome, PushOutcome::Accepted));
        let items = queue.items.lock();
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|m| matches!(m, OutboundMessage::ReasoningStep { kind: "final_answer", .. })));
    }

    #[test]
    fn queue_signals_close_when_final_answer_cannot_be_delivered() {
        let queue = OutboundQueue::new(1);
        queue.push(OutboundMessage::ReasoningStep {
            kind: "final_answer",
            content: StepContent::FinalAnswer { text: "first".into() },
            iteration: 1,
            ts: Utc::now(),
        });
        let outcome = queue.push(OutboundMessage::ReasoningStep {
            kind: "final_answer",
            content: StepContent::FinalAnswer { text: "second".into() },
            iteration: 2,
            ts: Utc::now(),
        });
        assert!(matches!(outcome, PushOutcome::MustCloseWithBackpressure));
    }
}
