//! apply_patch - targeted find/replace edit with a diff summary.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use similar::TextDiff;
use tokio::fs;

use crate::recovery::ErrorKind;
use crate::tools::{ParamKind, Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

pub struct ApplyPatchTool;

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of a text pattern in a file"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execution
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::required("path", ParamKind::String, "File to patch"),
            ToolParam::required("find", ParamKind::String, "Exact text to find"),
            ToolParam::required("replace", ParamKind::String, "Replacement text"),
        ]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let path = params.get("path").and_then(Value::as_str).unwrap_or_default();
        let find = params.get("find").and_then(Value::as_str).unwrap_or_default();
        let replace = params
            .get("replace")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if find.is_empty() {
            return ToolResult::fail_with(ErrorKind::Validation, "Invalid patch: empty find text");
        }

        let resolved = ctx.resolve_path(path);
        let original = match fs::read_to_string(&resolved).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolResult::fail(format!("File not found: {path}"))
            }
            Err(e) => return ToolResult::fail(format!("Failed to read {path}: {e}")),
        };

        let occurrences = original.matches(find).count();
        if occurrences == 0 {
            return ToolResult::fail_with(
                ErrorKind::Validation,
                format!("Pattern not found in {path}"),
            )
            .with_suggestion("Read the file to see its current content, then retry with an exact pattern");
        }

        let patched = original.replacen(find, replace, 1);
        if let Err(e) = fs::write(&resolved, &patched).await {
            return ToolResult::fail(format!("Failed to write {path}: {e}"));
        }

        let diff = TextDiff::from_lines(&original, &patched);
        let mut added = 0usize;
        let mut removed = 0usize;
        for change in diff.iter_all_changes() {
            match change.tag() {
                similar::ChangeTag::Insert => added += 1,
                similar::ChangeTag::Delete => removed += 1,
                similar::ChangeTag::Equal => {}
            }
        }

        let mut data = Map::new();
        data.insert("path".to_string(), json!(path));
        data.insert("occurrences".to_string(), json!(occurrences));
        data.insert("lines_added".to_string(), json!(added));
        data.insert("lines_removed".to_string(), json!(removed));

        let mut result = ToolResult::ok(data, format!("Patched {path} (+{added} -{removed} lines)"));
        if occurrences > 1 {
            result = result.with_suggestion(format!(
                "Pattern occurred {occurrences} times; only the first was replaced"
            ));
        }
        result
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
    async fn patches_first_occurrence_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("f.py"), "x = 1\nx = 1\n").expect("seed");
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let result = ApplyPatchTool
            .run(
                params(json!({"path": "f.py", "find": "x = 1", "replace": "x = 2"})),
                &ctx,
            )
            .await;

        assert!(result.success);
        assert_eq!(result.data["occurrences"], 2);
        assert!(!result.suggestions.is_empty());
        let patched = std::fs::read_to_string(dir.path().join("f.py")).expect("read");
        assert_eq!(patched, "x = 2\nx = 1\n");
    }

    #[tokio::test]
    async fn unmatched_pattern_is_a_validation_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("f.py"), "y = 1\n").expect("seed");
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let result = ApplyPatchTool
            .run(
                params(json!({"path": "f.py", "find": "nope", "replace": "never"})),
                &ctx,
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert!(result.error.unwrap().contains("Pattern not found"));
        // File untouched.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.py")).expect("read"),
            "y = 1\n"
        );
    }

    #[tokio::test]
    async fn reports_line_delta() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("f.txt"), "a\nb\nc\n").expect("seed");
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let result = ApplyPatchTool
            .run(
                params(json!({"path": "f.txt", "find": "b\n", "replace": "b1\nb2\n"})),
                &ctx,
            )
            .await;
        assert!(result.success);
        assert_eq!(result.data["lines_added"], 2);
        assert_eq!(result.data["lines_removed"], 1);
    }
}
