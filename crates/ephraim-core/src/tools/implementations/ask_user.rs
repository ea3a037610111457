//! ask_user - collect a clarification answer from the human.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{ParamKind, Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user a clarification question and wait for the answer"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::UserInput
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam::required(
            "question",
            ParamKind::String,
            "The question to ask",
        )]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let question = params
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let Some(prompter) = &ctx.prompter else {
            return ToolResult::fail("No interactive terminal available for ask_user");
        };

        prompter.warn(&format!("Question: {question}"));
        let answer = match prompter.read_line("Your answer: ").await {
            Ok(Some(answer)) => answer,
            Ok(None) => return ToolResult::fail("No answer provided (input closed)"),
            Err(e) => return ToolResult::fail(format!("Failed to read answer: {e}")),
        };

        let mut data = Map::new();
        data.insert("question".to_string(), json!(question));
        data.insert("answer".to_string(), json!(answer));

        ToolResult::ok(data, format!("User answered: {answer}"))
            .with_context("user_clarification", json!(answer))
    }
}
