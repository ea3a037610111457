//! Model interface.
//!
//! Formats prompts, invokes the chat backend, and parses strict-JSON
//! replies into a typed action sum. The model only ever proposes; the
//! state manager keeps veto power over everything parsed here.

pub mod backend;
pub mod parse;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::state::RiskLevel;
pub use backend::{ChatBackend, OllamaBackend};

/// Bounded retries for invalid model output.
const MAX_PARSE_ATTEMPTS: u32 = 3;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message sent to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: None,
        }
    }
}

/// Which prompt template (and model) to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Planning,
    Execution,
}

/// Plan fields proposed by the planning model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanProposal {
    pub goal_understanding: String,
    pub reasoning: String,
    pub execution_steps: Vec<String>,
    pub risk_assessment: String,
    pub validation_plan: String,
    pub commit_strategy: String,
}

/// The allowed actions, one variant per `action` value.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelAction {
    ProposePlan(PlanProposal),
    AskUser { question: String },
    ToolCall {
        name: String,
        params: Map<String, Value>,
    },
}

/// A validated model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub reasoning: String,
    pub confidence: i64,
    pub risk: RiskLevel,
    pub question: Option<String>,
    pub action: ModelAction,
    pub raw: String,
}

const PLANNING_PROMPT: &str = r#"You are Ephraim, a senior software engineer assistant operating in a terminal environment.

## Your Role
You behave like a careful, experienced senior engineer:
- Explain your reasoning clearly
- Prefer minimal, targeted changes over large refactors
- Never guess about architecture - ask when uncertain
- Assess risk and confidence before acting

## Response Format
You are PLANNING. Respond with valid JSON only, no markdown and no text outside the JSON object. Your action MUST be "propose_plan" and you MUST include a full plan object:
{
  "reasoning": "Why this plan addresses the goal",
  "confidence": <integer 0-100>,
  "risk": "LOW" | "MEDIUM" | "HIGH",
  "action": "propose_plan",
  "plan": {
    "goal_understanding": "What you understand the goal to be",
    "reasoning": "Why this approach",
    "execution_steps": ["Step 1", "Step 2"],
    "risk_assessment": "Analysis of risks",
    "validation_plan": "How to verify the changes work",
    "commit_strategy": "How to commit the changes"
  }
}

If you must clarify something first, you may instead use "action": "ask_user" with a "params" object containing a "question" string.

## Confidence Scoring
- 80-100: clear requirements, understood codebase, localized change
- 55-79: some uncertainty, may need clarification
- 30-54: significant uncertainty, should ask questions
- <30: must ask clarification before proceeding
If confidence < 80 or risk is HIGH, include a "question" field.

## Available Tools
{available_tools}

## Current Context
{context}
"#;

const EXECUTION_PROMPT: &str = r#"You are Ephraim, a senior software engineer assistant executing an approved plan in a terminal environment.

## Response Format
You are EXECUTING. Respond with valid JSON only, no markdown and no text outside the JSON object:
{
  "reasoning": "Why you are taking this action",
  "confidence": <integer 0-100>,
  "risk": "LOW" | "MEDIUM" | "HIGH",
  "action": "<tool_name>",
  "params": { <tool parameters> }
}

CRITICAL rules:
1. Your action MUST be one tool call from the available tools - NEVER "propose_plan". A plan is already approved.
2. Look at "approved_plan.steps" and "approved_plan.current_step" in the context and execute the current step.
3. Prefer reading files before modifying them; use apply_patch for code changes rather than rewriting whole files.
4. When every step is done, call the "final_answer" tool with a "message" summarizing the work.
5. Only ask questions (action "ask_user") if blocked on the current step.

## Available Tools
{available_tools}

## Current Context
{context}
"#;

/// Render the tool list for prompt injection.
fn render_tools(brief: &Value) -> String {
    let Some(tools) = brief.get("available_tools").and_then(Value::as_array) else {
        return "No tools available".to_string();
    };
    if tools.is_empty() {
        return "No tools available".to_string();
    }

    let mut text = String::new();
    for tool in tools {
        let name = tool.get("name").and_then(Value::as_str).unwrap_or("?");
        let description = tool.get("description").and_then(Value::as_str).unwrap_or("");
        text.push_str(&format!("- {name}: {description}\n"));

        if let Some(params) = tool.get("parameters").and_then(Value::as_array) {
            let rendered: Vec<String> = params
                .iter()
                .map(|p| {
                    let pname = p.get("name").and_then(Value::as_str).unwrap_or("?");
                    let ptype = p.get("type").and_then(Value::as_str).unwrap_or("?");
                    let required = p.get("required").and_then(Value::as_bool).unwrap_or(false);
                    if required {
                        format!("{pname}: {ptype}")
                    } else {
                        format!("[{pname}: {ptype}]")
                    }
                })
                .collect();
            if !rendered.is_empty() {
                text.push_str(&format!("  Parameters: {}\n", rendered.join(", ")));
            }
        }
    }
    text
}

/// Inputs assembled by the loop for one invocation.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    /// Recent conversation turns rendered as messages (up to 10 turns).
    pub history: Vec<ChatMessage>,
    /// "Previous action failed" note, injected as a system message.
    pub failure_note: Option<String>,
    /// "Your previous reasoning was ..." note.
    pub previous_reasoning: Option<String>,
}

/// The model interface: template selection, invocation, parsing, retry.
pub struct ModelInterface {
    backend: Arc<dyn ChatBackend>,
    planning_model: String,
    execution_model: String,
}

impl ModelInterface {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        planning_model: impl Into<String>,
        execution_model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            planning_model: planning_model.into(),
            execution_model: execution_model.into(),
        }
    }

    pub fn model_for(&self, kind: PromptKind) -> &str {
        match kind {
            PromptKind::Planning => &self.planning_model,
            PromptKind::Execution => &self.execution_model,
        }
    }

    /// Build the full message sequence for one invocation.
    pub fn build_messages(
        &self,
        kind: PromptKind,
        brief: &Value,
        invocation: &InvocationContext,
        user_task: &str,
    ) -> Vec<ChatMessage> {
        let template = match kind {
            PromptKind::Planning => PLANNING_PROMPT,
            PromptKind::Execution => EXECUTION_PROMPT,
        };
        let system = template
            .replace("{available_tools}", &render_tools(brief))
            .replace(
                "{context}",
                &serde_json::to_string_pretty(brief).unwrap_or_else(|_| brief.to_string()),
            );

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(invocation.history.iter().cloned());
        if let Some(note) = &invocation.failure_note {
            messages.push(ChatMessage::system(format!(
                "Previous action failed: {note}"
            )));
        }
        if let Some(reasoning) = &invocation.previous_reasoning {
            messages.push(ChatMessage::system(format!(
                "Your previous reasoning was: {reasoning}"
            )));
        }
        messages.push(ChatMessage::user(user_task));
        messages
    }

    /// Invoke the backend and parse a validated reply, re-prompting with a
    /// targeted correction on invalid output. Bounded to three attempts.
    pub async fn invoke(
        &self,
        kind: PromptKind,
        brief: &Value,
        invocation: &InvocationContext,
        user_task: &str,
    ) -> Result<ModelReply> {
        let mut messages = self.build_messages(kind, brief, invocation, user_task);
        let model = self.model_for(kind).to_string();

        let mut last_issue = String::new();
        for attempt in 1..=MAX_PARSE_ATTEMPTS {
            let raw = self.backend.chat(&model, &messages).await?;

            match parse::parse_reply(&raw) {
                Ok(reply) => return Ok(reply),
                Err(issue) => {
                    tracing::warn!(attempt, issue = %issue.message, "invalid model output");
                    last_issue = issue.message.clone();
                    messages.push(ChatMessage::assistant(raw));
                    messages.push(ChatMessage::user(issue.correction()));
                }
            }
        }

        Err(anyhow!(
            "model returned invalid JSON after {MAX_PARSE_ATTEMPTS} attempts: {last_issue}"
        ))
    }

    /// Streaming variant: fragments are handed to `on_fragment` for
    /// display, then the collected text is parsed with the same
    /// validation. Invalid output falls back to the non-streaming
    /// correction loop.
    pub async fn invoke_streaming(
        &self,
        kind: PromptKind,
        brief: &Value,
        invocation: &InvocationContext,
        user_task: &str,
        mut on_fragment: impl FnMut(&str),
    ) -> Result<ModelReply> {
        let messages = self.build_messages(kind, brief, invocation, user_task);
        let model = self.model_for(kind).to_string();

        let mut rx = self.backend.chat_stream(&model, &messages).await?;
        let mut collected = String::new();
        while let Some(fragment) = rx.recv().await {
            let fragment = fragment?;
            on_fragment(&fragment);
            collected.push_str(&fragment);
        }

        match parse::parse_reply(&collected) {
            Ok(reply) => Ok(reply),
            Err(issue) => {
                tracing::warn!(issue = %issue.message, "invalid streamed output, re-prompting");
                let mut retry = invocation.clone();
                retry.failure_note = Some(issue.correction());
                self.invoke(kind, brief, &retry, user_task).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct ScriptedBackend {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat(&self, _model: &str, _messages: &[ChatMessage]) -> Result<String> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow!("script exhausted"))
        }

        async fn chat_stream(
            &self,
            model: &str,
            messages: &[ChatMessage],
        ) -> Result<mpsc::UnboundedReceiver<Result<String>>> {
            let full = self.chat(model, messages).await?;
            let (tx, rx) = mpsc::unbounded_channel();
            for chunk in full.as_bytes().chunks(7) {
                let _ = tx.send(Ok(String::from_utf8_lossy(chunk).to_string()));
            }
            Ok(rx)
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn valid_tool_call() -> String {
        json!({
            "reasoning": "read it first",
            "confidence": 90,
            "risk": "LOW",
            "action": "read_file",
            "params": {"path": "main.py"}
        })
        .to_string()
    }

    fn interface(backend: ScriptedBackend) -> ModelInterface {
        ModelInterface::new(Arc::new(backend), "planner", "executor")
    }

    #[tokio::test]
    async fn invoke_parses_valid_reply_first_try() {
        let iface = interface(ScriptedBackend::new(vec![&valid_tool_call()]));
        let reply = iface
            .invoke(
                PromptKind::Execution,
                &json!({"available_tools": []}),
                &InvocationContext::default(),
                "do the thing",
            )
            .await
            .expect("reply");

        assert_eq!(reply.confidence, 90);
        assert!(matches!(reply.action, ModelAction::ToolCall { ref name, .. } if name == "read_file"));
    }

    #[tokio::test]
    async fn invoke_retries_on_invalid_then_succeeds() {
        let iface = interface(ScriptedBackend::new(vec![
            "total nonsense",
            &valid_tool_call(),
        ]));
        let reply = iface
            .invoke(
                PromptKind::Execution,
                &json!({"available_tools": []}),
                &InvocationContext::default(),
                "go",
            )
            .await
            .expect("reply after retry");
        assert_eq!(reply.reasoning, "read it first");
    }

    #[tokio::test]
    async fn invoke_gives_up_after_three_attempts() {
        let iface = interface(ScriptedBackend::new(vec!["bad", "worse", "worst"]));
        let err = iface
            .invoke(
                PromptKind::Execution,
                &json!({"available_tools": []}),
                &InvocationContext::default(),
                "go",
            )
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn streaming_collects_fragments_then_parses() {
        let iface = interface(ScriptedBackend::new(vec![&valid_tool_call()]));
        let mut seen = String::new();
        let reply = iface
            .invoke_streaming(
                PromptKind::Execution,
                &json!({"available_tools": []}),
                &InvocationContext::default(),
                "go",
                |fragment| seen.push_str(fragment),
            )
            .await
            .expect("reply");
        assert_eq!(seen, valid_tool_call());
        assert_eq!(reply.confidence, 90);
    }

    #[test]
    fn planning_and_execution_select_their_models() {
        let iface = interface(ScriptedBackend::new(vec![]));
        assert_eq!(iface.model_for(PromptKind::Planning), "planner");
        assert_eq!(iface.model_for(PromptKind::Execution), "executor");
    }

    #[test]
    fn message_sequence_orders_notes_before_user() {
        let iface = interface(ScriptedBackend::new(vec![]));
        let invocation = InvocationContext {
            history: vec![ChatMessage::user("earlier"), ChatMessage::assistant("{}")],
            failure_note: Some("tool exploded".to_string()),
            previous_reasoning: Some("I was reading".to_string()),
        };
        let messages = iface.build_messages(
            PromptKind::Planning,
            &json!({"available_tools": [{"name": "read_file", "description": "Read", "parameters": []}]}),
            &invocation,
            "the task",
        );

        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("read_file"));
        assert_eq!(messages[1].content, "earlier");
        assert!(messages[3].content.contains("Previous action failed"));
        assert!(messages[4].content.contains("previous reasoning"));
        assert_eq!(messages.last().unwrap().content, "the task");
    }
}
