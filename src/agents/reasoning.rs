//! Reasoning Step (§3) — the transient event emitted over an agent run's
//! stream, and the shared session-history type both adapters maintain.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of turns kept per session (§4.7, §9 Open Question 4 —
/// a conservative default since the source does not specify a hard limit).
pub const MAX_SESSION_HISTORY_TURNS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepContent {
    Thought { text: String },
    ToolCall { tool_name: String, args: Value },
    ToolResult { tool_name: String, result: Option<String>, error: Option<String> },
    FinalAnswer { text: String },
    Error { kind: String, message: String },
}

/// One observable event inside an agent run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningStep {
    pub content: StepContent,
    /// Monotonic, ≥1 per request (P3 — strictly increasing within one
    /// `run_stream` consumer).
    pub iteration: u32,
    pub emitted_at: chrono::DateTime<chrono::Utc>,
}

impl ReasoningStep {
    pub fn new(content: StepContent, iteration: u32) -> Self {
        Self {
            content,
            iteration,
            emitted_at: chrono::Utc::now(),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self.content, StepContent::FinalAnswer { .. } | StepContent::Error { .. })
    }
}

/// One turn in a session's message history. Mirrors the shape the Wrapper
/// Adapter feeds back into the model SDK (`role`, `content`, optional
/// `tool_calls`/`tool_call_id`), the same `LLMMessage` shape `base_llm`
/// already uses elsewhere in this codebase.
pub type HistoryTurn = HashMap<String, Value>;

/// Per-session message history, trimmed to `MAX_SESSION_HISTORY_TURNS`
/// most-recent turns (§4.7). Guarded by a per-session lock (§5); never
/// shared across agents.
#[derive(Debug, Default)]
pub struct SessionHistory {
    turns: VecDeque<HistoryTurn>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self { turns: VecDeque::new() }
    }

    pub fn push(&mut self, turn: HistoryTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > MAX_SESSION_HISTORY_TURNS {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> Vec<HistoryTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// The final, non-streaming response of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResponse {
    pub text: String,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Error,
    Cancelled,
    IterationLimit,
}

/// Sentence-ending punctuation the default `run_stream` splits assistant
/// text on, per §4.8: `. ! ? 。 ！ ？` followed by whitespace or end of
/// input.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    let enders = ['.', '!', '?', '。', '!', '?'];
    let mut sentences = Vec::new();
    let mut current = String::new();

    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        if enders.contains(&c) {
            let next_is_boundary = chars.get(i + 1).map(|n| n.is_whitespace()).unwrap_or(true);
            if next_is_boundary {
                let trimmed = current.trim().to_string();
                if !trimmed.is_empty() {
                    sentences.push(trimmed);
                }
                current.clear();
            }
        }
        i += 1;
    }
    let trimmed = current.trim().to_string();
    if !trimmed.is_empty() {
        sentences.push(trimmed);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_trims_to_fifty_turns() {
        let mut history = SessionHistory::new();
        for i in 0..60 {
            let mut turn = HashMap::new();
            turn.insert("role".to_string(), Value::String("user".to_string()));
            turn.insert("seq".to_string(), Value::from(i));
            history.push(turn);
        }
        assert_eq!(history.len(), MAX_SESSION_HISTORY_TURNS);
        assert_eq!(history.turns()[0]["seq"], Value::from(10));
    }

    #[test]
    fn splits_on_sentence_punctuation() {
        let sentences = split_into_sentences("Hello there. How are you? I am fine!");
        assert_eq!(sentences, vec!["Hello there.", "How are you?", "I am fine!"]);
    }

    #[test]
    fn split_handles_trailing_fragment_without_punctuation() {
        let sentences = split_into_sentences("First sentence. trailing fragment");
        assert_eq!(sentences, vec!["First sentence.", "trailing fragment"]);
    }

    #[test]
    fn split_handles_cjk_punctuation() {
        let sentences = split_into_sentences("你好。今天天气怎么样?");
        assert_eq!(sentences.len(), 2);
    }

    #[test]
    fn reasoning_step_is_final_for_terminal_kinds() {
        let final_answer = ReasoningStep::new(StepContent::FinalAnswer { text: "done".into() }, 3);
        assert!(final_answer.is_final());
        let thought = ReasoningStep::new(StepContent::Thought { text: "...".into() }, 1);
        assert!(!thought.is_final());
    }
}
