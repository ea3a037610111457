//! Git tools: status snapshot, staging, commit.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;

use crate::tools::{ParamKind, Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

async fn run_git(repo: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| format!("git failed to start: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

/// git_status - read-only repository snapshot.
pub struct GitStatusTool;

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git_status"
    }

    fn description(&self) -> &str {
        "Show the current branch and working tree changes"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    fn parameters(&self) -> Vec<ToolParam> {
        Vec::new()
    }

    async fn run(&self, _params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let status = crate::git::load_git_status(&ctx.repo_root);

        let mut data = Map::new();
        data.insert("branch".to_string(), json!(status.branch));
        data.insert("is_clean".to_string(), json!(status.is_clean));
        data.insert("modified".to_string(), json!(status.modified_files));
        data.insert("untracked".to_string(), json!(status.untracked_files));
        data.insert("staged".to_string(), json!(status.staged_files));
        data.insert("deleted".to_string(), json!(status.deleted_files));

        let summary = if status.is_clean {
            format!("On {}: working tree clean", status.branch)
        } else {
            format!(
                "On {}: {} modified, {} untracked, {} staged",
                status.branch,
                status.modified_files.len(),
                status.untracked_files.len(),
                status.staged_files.len()
            )
        };
        ToolResult::ok(data, summary)
    }
}

/// git_add - stage files.
pub struct GitAddTool;

#[async_trait]
impl Tool for GitAddTool {
    fn name(&self) -> &str {
        "git_add"
    }

    fn description(&self) -> &str {
        "Stage files for commit (defaults to everything)"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam::optional("paths", ParamKind::List, "Paths to stage")
            .with_default(json!(["."]))]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let paths: Vec<String> = params
            .get("paths")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|| vec![".".to_string()]);

        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));

        match run_git(&ctx.repo_root, &args).await {
            Ok(_) => {
                let mut data = Map::new();
                data.insert("staged".to_string(), json!(paths));
                ToolResult::ok(data, format!("Staged {} path(s)", paths.len()))
            }
            Err(e) => ToolResult::fail(format!("git add failed: {e}")),
        }
    }
}

/// git_commit - commit staged changes.
pub struct GitCommitTool;

#[async_trait]
impl Tool for GitCommitTool {
    fn name(&self) -> &str {
        "git_commit"
    }

    fn description(&self) -> &str {
        "Commit staged changes with a message"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam::required(
            "message",
            ParamKind::String,
            "Commit message",
        )]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if message.trim().is_empty() {
            return ToolResult::fail_with(
                crate::recovery::ErrorKind::Validation,
                "Invalid commit: empty message",
            );
        }

        if let Err(e) = run_git(&ctx.repo_root, &["commit", "-m", message]).await {
            return ToolResult::fail(format!("git commit failed: {e}"));
        }

        let hash = run_git(&ctx.repo_root, &["rev-parse", "--short", "HEAD"])
            .await
            .map(|h| h.trim().to_string())
            .unwrap_or_default();

        let mut data = Map::new();
        data.insert("message".to_string(), json!(message));
        data.insert("commit".to_string(), json!(hash));
        ToolResult::ok(data, format!("Committed {hash}: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_repo() -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().expect("tempdir");
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "t@example.com"],
            vec!["config", "user.name", "T"],
        ] {
            run_git(dir.path(), &args).await.expect("git setup");
        }
        std::fs::write(dir.path().join("a.txt"), "hello").expect("seed");
        let ctx = ToolContext::new(dir.path().to_path_buf());
        (dir, ctx)
    }

    #[tokio::test]
    async fn status_add_commit_flow() {
        let (_dir, ctx) = seeded_repo().await;

        let status = GitStatusTool.run(Map::new(), &ctx).await;
        assert!(status.success);
        assert_eq!(status.data["is_clean"], false);

        let add = GitAddTool
            .run(
                match json!({"paths": ["a.txt"]}) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                },
                &ctx,
            )
            .await;
        assert!(add.success);

        let commit = GitCommitTool
            .run(
                match json!({"message": "add a.txt"}) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                },
                &ctx,
            )
            .await;
        assert!(commit.success, "{:?}", commit.error);
        assert!(!commit.data["commit"].as_str().unwrap_or("").is_empty());

        let status = GitStatusTool.run(Map::new(), &ctx).await;
        assert_eq!(status.data["is_clean"], true);
    }

    #[tokio::test]
    async fn commit_with_nothing_staged_fails() {
        let (_dir, ctx) = seeded_repo().await;
        let commit = GitCommitTool
            .run(
                match json!({"message": "empty"}) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                },
                &ctx,
            )
            .await;
        assert!(!commit.success);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (_dir, ctx) = seeded_repo().await;
        let commit = GitCommitTool
            .run(
                match json!({"message": "  "}) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                },
                &ctx,
            )
            .await;
        assert!(!commit.success);
        assert_eq!(
            commit.error_kind,
            Some(crate::recovery::ErrorKind::Validation)
        );
    }
}
