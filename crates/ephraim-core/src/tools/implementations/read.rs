//! read_file - read a file's contents.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::fs;

use crate::tools::{ParamKind, Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

/// Keep tool output bounded; huge files are truncated with a notice.
const MAX_CONTENT_CHARS: usize = 50_000;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file's contents, optionally limited to the first N lines"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::required("path", ParamKind::String, "File path to read"),
            ToolParam::optional("max_lines", ParamKind::Integer, "Limit to the first N lines")
                .with_default(json!(0)),
        ]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let path = params.get("path").and_then(Value::as_str).unwrap_or_default();
        let max_lines = params
            .get("max_lines")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        let resolved = ctx.resolve_path(path);
        let content = match fs::read_to_string(&resolved).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolResult::fail(format!("File not found: {path}"))
            }
            Err(e) => return ToolResult::fail(format!("Failed to read {path}: {e}")),
        };

        let total_lines = content.lines().count();
        let mut shown: String = if max_lines > 0 {
            content
                .lines()
                .take(max_lines)
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            content
        };

        let mut truncated = false;
        if shown.len() > MAX_CONTENT_CHARS {
            let mut cut = MAX_CONTENT_CHARS;
            while !shown.is_char_boundary(cut) {
                cut -= 1;
            }
            shown.truncate(cut);
            truncated = true;
        }

        let mut data = Map::new();
        data.insert("path".to_string(), json!(path));
        data.insert("content".to_string(), json!(shown));
        data.insert("total_lines".to_string(), json!(total_lines));
        if truncated {
            data.insert("truncated".to_string(), json!(true));
        }

        ToolResult::ok(data, format!("Read {total_lines} lines from {path}"))
    }
}
