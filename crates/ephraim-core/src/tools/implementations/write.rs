//! write_file - create or overwrite a file.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::fs;

use crate::tools::{ParamKind, Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file, creating parent directories as needed"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execution
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::required("path", ParamKind::String, "File path to write"),
            ToolParam::required("content", ParamKind::String, "Full file content"),
        ]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let path = params.get("path").and_then(Value::as_str).unwrap_or_default();
        let content = params
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let resolved = ctx.resolve_path(path);
        if let Some(parent) = resolved.parent().filter(|p| !p.exists()) {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolResult::fail(format!("Failed to create directory: {e}"));
            }
        }

        let existed = resolved.exists();
        if let Err(e) = fs::write(&resolved, content).await {
            return ToolResult::fail(format!("Failed to write {path}: {e}"));
        }

        let lines = content.lines().count();
        let mut data = Map::new();
        data.insert("path".to_string(), json!(path));
        data.insert("bytes_written".to_string(), json!(content.len()));
        data.insert("lines".to_string(), json!(lines));
        data.insert("overwrote".to_string(), json!(existed));

        tracing::info!(path, bytes = content.len(), "file written");
        ToolResult::ok(data, format!("Wrote {lines} lines to {path}"))
    }
}
