//! spawn_subagents - fan out parallel single-shot reasoners.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::agent::subagent::AgentKind;
use crate::tools::{ParamKind, Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

const DEFAULT_WAIT_SECS: u64 = 60;

pub struct SpawnSubAgentsTool;

#[async_trait]
impl Tool for SpawnSubAgentsTool {
    fn name(&self) -> &str {
        "spawn_subagents"
    }

    fn description(&self) -> &str {
        "Run several focused sub-agents in parallel and collect their findings"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::required("tasks", ParamKind::List, "One task description per sub-agent"),
            ToolParam::optional(
                "kind",
                ParamKind::String,
                "Agent kind: explore, plan, execute or research",
            )
            .with_default(json!("explore")),
            ToolParam::optional("timeout", ParamKind::Integer, "Total wait budget in seconds")
                .with_default(json!(DEFAULT_WAIT_SECS)),
        ]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let Some(supervisor) = &ctx.subagents else {
            return ToolResult::fail("Sub-agent supervisor is not available");
        };

        let tasks: Vec<String> = params
            .get("tasks")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if tasks.is_empty() {
            return ToolResult::fail_with(
                crate::recovery::ErrorKind::Validation,
                "Invalid tasks: provide at least one task string",
            );
        }

        let kind = AgentKind::parse(
            params
                .get("kind")
                .and_then(Value::as_str)
                .unwrap_or("explore"),
        );
        let timeout = Duration::from_secs(
            params
                .get("timeout")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_WAIT_SECS),
        );

        let mut ids = Vec::new();
        for task in &tasks {
            ids.push(supervisor.spawn(task.clone(), kind, None).await);
        }

        let results = supervisor.wait_all(&ids, timeout).await;

        let mut findings = Map::new();
        let mut completed = 0usize;
        for id in &ids {
            let entry = match results.get(id).and_then(Option::as_ref) {
                Some(result) => {
                    if result.success {
                        completed += 1;
                    }
                    json!({
                        "success": result.success,
                        "output": result.output,
                        "error": result.error,
                    })
                }
                None => json!({ "success": false, "error": "timed out waiting" }),
            };
            findings.insert(id.clone(), entry);
        }

        let mut data = Map::new();
        data.insert("results".to_string(), Value::Object(findings));
        data.insert("kind".to_string(), json!(kind.as_str()));

        ToolResult::ok(
            data,
            format!("{completed}/{} sub-agents completed", ids.len()),
        )
    }
}
