//! ci_status - latest workflow run via the GitHub CLI.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;

use crate::tools::{Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

pub struct CiStatusTool;

#[async_trait]
impl Tool for CiStatusTool {
    fn name(&self) -> &str {
        "ci_status"
    }

    fn description(&self) -> &str {
        "Check the latest CI workflow run on the current branch"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Ci
    }

    fn parameters(&self) -> Vec<ToolParam> {
        Vec::new()
    }

    async fn run(&self, _params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let output = Command::new("gh")
            .args([
                "run",
                "list",
                "--limit",
                "1",
                "--json",
                "databaseId,workflowName,status,conclusion,url,createdAt,updatedAt",
            ])
            .current_dir(&ctx.repo_root)
            .stdin(Stdio::null())
            .output()
            .await;

        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                return ToolResult::fail(format!("gh run list failed: {stderr}"));
            }
            Err(e) => {
                return ToolResult::fail(format!("GitHub CLI not found: {e}"))
                    .with_suggestion("Install and authenticate the gh CLI to enable CI checks")
            }
        };

        let runs: Vec<Value> =
            match serde_json::from_slice(&output.stdout) {
                Ok(runs) => runs,
                Err(e) => return ToolResult::fail(format!("Invalid gh output: {e}")),
            };

        let Some(run) = runs.first() else {
            let mut data = Map::new();
            data.insert("status".to_string(), json!("unknown"));
            return ToolResult::ok(data, "No workflow runs found");
        };

        let status = run.get("status").and_then(Value::as_str).unwrap_or("");
        let conclusion = run.get("conclusion").and_then(Value::as_str).unwrap_or("");
        let effective = match (status, conclusion) {
            ("completed", "success") => "passed",
            ("completed", _) => "failed",
            _ => "pending",
        };

        let mut data = Map::new();
        data.insert("status".to_string(), json!(effective));
        data.insert(
            "workflow".to_string(),
            run.get("workflowName").cloned().unwrap_or(Value::Null),
        );
        data.insert(
            "run_id".to_string(),
            run.get("databaseId").cloned().unwrap_or(Value::Null),
        );
        data.insert(
            "conclusion".to_string(),
            run.get("conclusion").cloned().unwrap_or(Value::Null),
        );
        data.insert("url".to_string(), run.get("url").cloned().unwrap_or(Value::Null));

        ToolResult::ok(data, format!("CI status: {effective}"))
            .with_context("ci_status", json!(effective))
    }
}
