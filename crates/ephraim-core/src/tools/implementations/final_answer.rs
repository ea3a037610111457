//! final_answer - present the completion summary.
//!
//! The loop treats a successful final_answer as the signal to transition
//! to COMPLETED.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{ParamKind, Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

pub struct FinalAnswerTool;

#[async_trait]
impl Tool for FinalAnswerTool {
    fn name(&self) -> &str {
        "final_answer"
    }

    fn description(&self) -> &str {
        "Finish the task and present a summary of what was done"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam::required(
            "message",
            ParamKind::String,
            "Summary of the completed work",
        )]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Task completed");

        if let Some(prompter) = &ctx.prompter {
            prompter.success(message);
        }

        let mut data = Map::new();
        data.insert("message".to_string(), json!(message));
        ToolResult::ok(data, message.chars().take(200).collect::<String>())
    }
}
