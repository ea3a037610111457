//! list_directory - directory listing, optionally recursive.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use walkdir::WalkDir;

use crate::tools::{ParamKind, Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

const MAX_ENTRIES: usize = 200;

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List directory entries, optionally recursively"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::optional("path", ParamKind::String, "Directory to list")
                .with_default(json!(".")),
            ToolParam::optional("recursive", ParamKind::Boolean, "Descend into subdirectories")
                .with_default(json!(false)),
        ]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let path = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let recursive = params
            .get("recursive")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let resolved = ctx.resolve_path(path);
        if !resolved.is_dir() {
            return ToolResult::fail(format!("Directory not found: {path}"));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut entries = Vec::new();
        let mut truncated = false;

        for entry in WalkDir::new(&resolved)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
        {
            let Ok(entry) = entry else { continue };
            // Keep VCS internals out of listings.
            if entry.path().components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            if entries.len() >= MAX_ENTRIES {
                truncated = true;
                break;
            }

            let relative = entry
                .path()
                .strip_prefix(&resolved)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            if entry.file_type().is_dir() {
                entries.push(format!("{relative}/"));
            } else {
                entries.push(relative);
            }
        }

        let count = entries.len();
        let mut data = Map::new();
        data.insert("path".to_string(), json!(path));
        data.insert("entries".to_string(), json!(entries));
        if truncated {
            data.insert("truncated".to_string(), json!(true));
        }

        ToolResult::ok(data, format!("Listed {count} entries in {path}"))
    }
}
