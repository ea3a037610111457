//! Well-known filesystem locations for Ephraim state.

use std::path::{Path, PathBuf};

/// Name of the configuration document at the repository root.
pub const CONFIG_DOC: &str = "Ephraim.md";

/// Name of the human-readable session summary at the repository root.
pub const CONTEXT_DOC: &str = "Context.md";

/// Per-user Ephraim directory (`~/.ephraim`), falling back to the
/// current directory when no home directory can be resolved.
pub fn user_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ephraim")
}

/// Command history file (`~/.ephraim/history`).
pub fn history_file() -> PathBuf {
    user_dir().join("history")
}

/// Session log directory inside a repository (`<repo>/.ephraim/logs`).
pub fn logs_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".ephraim").join("logs")
}

/// Log file path for a session started now.
pub fn session_log_file(repo_root: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    logs_dir(repo_root).join(format!("ephraim_{stamp}.log"))
}

pub fn config_doc_path(repo_root: &Path) -> PathBuf {
    repo_root.join(CONFIG_DOC)
}

pub fn context_doc_path(repo_root: &Path) -> PathBuf {
    repo_root.join(CONTEXT_DOC)
}
