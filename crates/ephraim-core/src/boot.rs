//! Boot sequence: verify the environment before any model reasoning.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{default_config_doc, default_context_doc, EphraimConfig};
use crate::git;
use crate::paths;
use crate::state::{Phase, SessionState};

/// Critical boot failures abort the process with exit code 1.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("cannot create {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn ensure_doc(path: &Path, default_content: &str) -> Result<(), BootError> {
    if path.exists() {
        return Ok(());
    }
    fs::write(path, default_content).map_err(|source| BootError::CreateFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Ensure the repository's `.ephraim/logs` directory exists.
pub fn ensure_log_dir(repo_root: &Path) -> Result<PathBuf, BootError> {
    let dir = paths::logs_dir(repo_root);
    fs::create_dir_all(&dir).map_err(|source| BootError::CreateFailed {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

/// Run the boot sequence for a repository root.
///
/// Creates the configuration and context documents when missing, loads
/// configuration, snapshots git state, disables CI when the GitHub CLI
/// is unavailable, and leaves the state in PLANNING.
pub fn boot(repo_root: PathBuf) -> Result<(SessionState, EphraimConfig), BootError> {
    tracing::info!(root = %repo_root.display(), "boot sequence started");

    let config_doc = paths::config_doc_path(&repo_root);
    let context_doc = paths::context_doc_path(&repo_root);
    ensure_doc(&config_doc, default_config_doc())?;
    ensure_doc(&context_doc, default_context_doc())?;

    let mut config = EphraimConfig::load(&config_doc);

    let mut state = SessionState {
        repo_root: repo_root.clone(),
        config_doc_path: config_doc,
        context_doc_path: context_doc,
        ..Default::default()
    };

    if git::git_available() {
        state.git = git::load_git_status(&repo_root);
        if !state.git.branch.is_empty() {
            tracing::info!(branch = %state.git.branch, clean = state.git.is_clean, "git status loaded");
        }
    } else {
        tracing::warn!("git is not available; repository features limited");
    }

    if config.ci.enabled && !git::gh_available() {
        tracing::warn!("GitHub CLI unavailable; disabling CI checks");
        config.ci.enabled = false;
    }

    state.execution.max_iterations = config.safety.max_iterations;
    state.phase = Phase::Planning;

    tracing::info!("boot sequence complete");
    Ok((state, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_creates_default_documents_and_plans() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, config) = boot(dir.path().to_path_buf()).expect("boot");

        assert_eq!(state.phase, Phase::Planning);
        assert_eq!(
            state.execution.max_iterations,
            config.safety.max_iterations
        );
        assert!(dir.path().join("Ephraim.md").exists());
        assert!(dir.path().join("Context.md").exists());
    }

    #[test]
    fn boot_preserves_existing_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("Ephraim.md");
        std::fs::write(&config_path, "# Protected Areas\n- secrets/\n").expect("seed");

        let (_, config) = boot(dir.path().to_path_buf()).expect("boot");
        assert_eq!(config.protected_areas, vec!["secrets/".to_string()]);
        // Not overwritten with defaults.
        let content = std::fs::read_to_string(&config_path).expect("read");
        assert!(!content.contains("Architecture Constraints"));
    }

    #[test]
    fn ensure_log_dir_creates_nested_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logs = ensure_log_dir(dir.path()).expect("log dir");
        assert!(logs.ends_with(".ephraim/logs"));
        assert!(logs.is_dir());
    }
}
