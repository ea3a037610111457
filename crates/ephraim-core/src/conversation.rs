//! Conversation memory: a bounded rolling window of turns.
//!
//! Each turn preserves the model's reasoning and the tool outcome, not
//! just the action, so later prompts can build on earlier reasoning and
//! learn from failures. The memory lives only in process.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::model::ChatMessage;
use crate::state::{Phase, RiskLevel};

/// Default window size.
pub const DEFAULT_MAX_TURNS: usize = 20;

/// One (user, model, tool-outcome) triple.
#[derive(Debug, Clone)]
pub struct Turn {
    pub user_message: String,
    pub reasoning: String,
    pub action: String,
    pub params: Map<String, Value>,
    pub confidence: i64,
    pub risk: RiskLevel,
    pub tool_success: bool,
    pub tool_summary: String,
    pub tool_error: Option<String>,
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Render this turn as chat messages: the user's request, the
    /// assistant's JSON, and the tool outcome as a system note.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::user(self.user_message.clone())];

        let assistant = json!({
            "reasoning": self.reasoning,
            "action": self.action,
            "params": self.params,
            "confidence": self.confidence,
            "risk": self.risk.as_str(),
        });
        messages.push(ChatMessage::assistant(assistant.to_string()));

        if !self.tool_summary.is_empty() || self.tool_error.is_some() {
            let outcome = if self.tool_success {
                format!("Tool '{}' succeeded: {}", self.action, self.tool_summary)
            } else {
                format!(
                    "Tool '{}' failed: {}",
                    self.action,
                    self.tool_error.as_deref().unwrap_or("Unknown error")
                )
            };
            messages.push(ChatMessage::system(outcome));
        }

        messages
    }
}

/// Bounded FIFO of turns. Appends drop the oldest turn on overflow.
#[derive(Debug)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Up to the last `count` turns rendered as chat messages, oldest
    /// first, for inclusion in a follow-up prompt.
    pub fn recent_messages(&self, count: usize) -> Vec<ChatMessage> {
        let start = self.turns.len().saturating_sub(count);
        self.turns
            .iter()
            .skip(start)
            .flat_map(Turn::to_messages)
            .collect()
    }

    /// The most recent failed turn, if any.
    pub fn last_failure(&self) -> Option<&Turn> {
        self.turns
            .iter()
            .rev()
            .find(|t| !t.tool_success && t.tool_error.is_some())
    }

    /// Patterns from successful actions, for heuristic reuse.
    pub fn successful_patterns(&self) -> Vec<Value> {
        self.turns
            .iter()
            .filter(|t| t.tool_success)
            .map(|t| {
                json!({
                    "action": t.action,
                    "params_keys": t.params.keys().collect::<Vec<_>>(),
                    "phase": t.phase.as_str(),
                    "reasoning_snippet": t.reasoning.chars().take(100).collect::<String>(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn turn(action: &str, success: bool) -> Turn {
        Turn {
            user_message: "do it".to_string(),
            reasoning: "because".to_string(),
            action: action.to_string(),
            params: Map::new(),
            confidence: 80,
            risk: RiskLevel::Low,
            tool_success: success,
            tool_summary: if success { "done".to_string() } else { String::new() },
            tool_error: (!success).then(|| "boom".to_string()),
            phase: Phase::Executing,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn window_never_exceeds_maximum() {
        let mut memory = ConversationMemory::new(3);
        for i in 0..10 {
            memory.push(turn(&format!("tool_{i}"), true));
        }
        assert_eq!(memory.len(), 3);

        // Oldest dropped, most recent kept in order.
        let messages = memory.recent_messages(3);
        assert!(messages
            .iter()
            .any(|m| m.role == Role::Assistant && m.content.contains("tool_9")));
        assert!(!messages.iter().any(|m| m.content.contains("tool_6")));
    }

    #[test]
    fn turn_renders_three_messages() {
        let messages = turn("read_file", true).to_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].role, Role::System);
        assert!(messages[2].content.contains("succeeded"));

        let parsed: Value = serde_json::from_str(&messages[1].content).expect("assistant JSON");
        assert_eq!(parsed["action"], "read_file");
        assert_eq!(parsed["risk"], "LOW");
    }

    #[test]
    fn failed_turn_reports_error_in_outcome() {
        let messages = turn("apply_patch", false).to_messages();
        assert!(messages[2].content.contains("failed: boom"));
    }

    #[test]
    fn last_failure_finds_most_recent() {
        let mut memory = ConversationMemory::default();
        memory.push(turn("a", false));
        memory.push(turn("b", true));
        memory.push(turn("c", false));
        memory.push(turn("d", true));

        assert_eq!(memory.last_failure().map(|t| t.action.as_str()), Some("c"));
    }

    #[test]
    fn recent_messages_limits_turn_count() {
        let mut memory = ConversationMemory::default();
        for _ in 0..5 {
            memory.push(turn("x", true));
        }
        // Each turn renders three messages.
        assert_eq!(memory.recent_messages(2).len(), 6);
    }

    #[test]
    fn successful_patterns_skip_failures() {
        let mut memory = ConversationMemory::default();
        memory.push(turn("good", true));
        memory.push(turn("bad", false));

        let patterns = memory.successful_patterns();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0]["action"], "good");
    }
}
