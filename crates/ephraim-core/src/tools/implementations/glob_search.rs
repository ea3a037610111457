//! glob_search - find files by glob pattern.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{ParamKind, Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

const MAX_MATCHES: usize = 100;

pub struct GlobSearchTool;

#[async_trait]
impl Tool for GlobSearchTool {
    fn name(&self) -> &str {
        "glob_search"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern like **/*.rs"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam::required(
            "pattern",
            ParamKind::String,
            "Glob pattern, relative to the working directory",
        )]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let pattern = params
            .get("pattern")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let full_pattern = ctx.working_dir.join(pattern).display().to_string();
        let paths = match glob::glob(&full_pattern) {
            Ok(paths) => paths,
            Err(e) => return ToolResult::fail(format!("Invalid glob pattern '{pattern}': {e}")),
        };

        let mut matches = Vec::new();
        let mut truncated = false;
        for path in paths.flatten() {
            if path.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            if matches.len() >= MAX_MATCHES {
                truncated = true;
                break;
            }
            let relative = path
                .strip_prefix(&ctx.working_dir)
                .unwrap_or(&path)
                .display()
                .to_string();
            matches.push(relative);
        }
        matches.sort();

        let count = matches.len();
        let mut data = Map::new();
        data.insert("pattern".to_string(), json!(pattern));
        data.insert("matches".to_string(), json!(matches));
        if truncated {
            data.insert("truncated".to_string(), json!(true));
        }

        let mut result = ToolResult::ok(data, format!("Found {count} matches for {pattern}"));
        if count == 0 {
            result = result.with_suggestion("Try a broader pattern or list_directory to orient");
        }
        result
    }
}
