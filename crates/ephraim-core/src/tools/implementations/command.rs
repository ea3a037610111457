//! run_command - foreground shell execution with a timeout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;

use crate::recovery::ErrorKind;
use crate::tools::{ParamKind, Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

/// Default timeout for shell commands, in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_OUTPUT_CHARS: usize = 20_000;

pub struct RunCommandTool;

fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let start = text.len() - max;
    // Avoid splitting a UTF-8 character.
    let boundary = (start..text.len())
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(start);
    format!("...{}", &text[boundary..])
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the repository and capture its output"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execution
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::required("command", ParamKind::String, "Shell command to run"),
            ToolParam::optional("timeout", ParamKind::Integer, "Timeout in seconds")
                .with_default(json!(DEFAULT_TIMEOUT_SECS)),
        ]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let command = params
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let timeout_secs = params
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => return ToolResult::fail(format!("Failed to start command: {e}")),
        };

        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::fail(format!("Command failed to run: {e}")),
            Err(_) => {
                return ToolResult::fail_with(
                    ErrorKind::Timeout,
                    format!("Command hit its {timeout_secs}s timeout: {command}"),
                )
            }
        };

        let stdout = tail(&String::from_utf8_lossy(&output.stdout), MAX_OUTPUT_CHARS);
        let stderr = tail(&String::from_utf8_lossy(&output.stderr), MAX_OUTPUT_CHARS);
        let exit_code = output.status.code().unwrap_or(-1);

        let mut data = Map::new();
        data.insert("command".to_string(), json!(command));
        data.insert("exit_code".to_string(), json!(exit_code));
        data.insert("stdout".to_string(), json!(stdout));
        data.insert("stderr".to_string(), json!(stderr));

        if output.status.success() {
            ToolResult::ok(data, format!("Command succeeded: {command}"))
        } else {
            let mut result =
                ToolResult::fail(format!("Command exited with code {exit_code}: {command}"));
            result.data = data;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let result = RunCommandTool
            .run(params(json!({"command": "echo hello", "timeout": 10})), &ctx)
            .await;

        assert!(result.success);
        assert_eq!(result.data["exit_code"], 0);
        assert_eq!(result.data["stdout"], "hello\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure_with_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let result = RunCommandTool
            .run(
                params(json!({"command": "echo oops >&2; exit 2", "timeout": 10})),
                &ctx,
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.data["exit_code"], 2);
        assert_eq!(result.data["stderr"], "oops\n");
        assert!(result.error.unwrap().contains("exited with code 2"));
    }

    #[tokio::test]
    async fn timeout_classifies_as_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let result = RunCommandTool
            .run(params(json!({"command": "sleep 5", "timeout": 1})), &ctx)
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    }
}
