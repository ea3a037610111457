//! Built-in tool implementations.

pub mod apply_patch;
pub mod ask_user;
pub mod ci;
pub mod command;
pub mod final_answer;
pub mod git;
pub mod glob_search;
pub mod list;
pub mod mcp_call;
pub mod read;
pub mod subagents;
pub mod write;

use std::sync::Arc;

use crate::tools::ToolRegistry;

/// Register every built-in tool.
pub async fn register_all_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(read::ReadFileTool)).await;
    registry.register(Arc::new(write::WriteFileTool)).await;
    registry.register(Arc::new(apply_patch::ApplyPatchTool)).await;
    registry.register(Arc::new(list::ListDirectoryTool)).await;
    registry.register(Arc::new(glob_search::GlobSearchTool)).await;
    registry.register(Arc::new(command::RunCommandTool)).await;
    registry.register(Arc::new(git::GitStatusTool)).await;
    registry.register(Arc::new(git::GitAddTool)).await;
    registry.register(Arc::new(git::GitCommitTool)).await;
    registry.register(Arc::new(ci::CiStatusTool)).await;
    registry.register(Arc::new(mcp_call::McpCallTool)).await;
    registry.register(Arc::new(ask_user::AskUserTool)).await;
    registry.register(Arc::new(final_answer::FinalAnswerTool)).await;
    registry.register(Arc::new(subagents::SpawnSubAgentsTool)).await;
}
