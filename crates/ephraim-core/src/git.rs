//! Git helpers: repository detection and porcelain status snapshots.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::state::GitStatus;

fn run_git(repo_root: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).to_string())
}

/// Walk up from `start` looking for a `.git` directory. Falls back to
/// `start` itself when not inside a repository.
pub fn detect_repo_root(start: &Path) -> PathBuf {
    let mut current = start.to_path_buf();
    loop {
        if current.join(".git").exists() {
            return current;
        }
        if !current.pop() {
            return start.to_path_buf();
        }
    }
}

/// Whether the `git` binary is on PATH.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Whether the GitHub CLI is installed and authenticated.
pub fn gh_available() -> bool {
    Command::new("gh")
        .args(["auth", "status"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Snapshot repository state via `git status --porcelain`.
pub fn load_git_status(repo_root: &Path) -> GitStatus {
    let mut status = GitStatus::default();

    if let Some(branch) = run_git(repo_root, &["branch", "--show-current"]) {
        status.branch = branch.trim().to_string();
    }

    if let Some(porcelain) = run_git(repo_root, &["status", "--porcelain"]) {
        // Porcelain format: XY<space>filename, where X is the index status
        // and Y the work tree status. Leading spaces are significant.
        for line in porcelain.split('\n') {
            if line.len() < 4 {
                continue;
            }
            let x = line.as_bytes()[0] as char;
            let y = line.as_bytes()[1] as char;
            let filename = line[3..].to_string();

            if x == '?' && y == '?' {
                status.untracked_files.push(filename);
            } else if x == 'M' || y == 'M' {
                if x == 'M' {
                    status.staged_files.push(filename.clone());
                }
                if y == 'M' {
                    status.modified_files.push(filename);
                }
            } else if x == 'A' {
                status.staged_files.push(filename);
            } else if x == 'D' || y == 'D' {
                status.deleted_files.push(filename);
            }
        }

        status.is_clean = status.modified_files.is_empty()
            && status.untracked_files.is_empty()
            && status.staged_files.is_empty()
            && status.deleted_files.is_empty();
    }

    if let Some(remotes) = run_git(repo_root, &["remote"]) {
        status.has_remote = !remotes.trim().is_empty();
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test"],
        ] {
            let ok = Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false);
            assert!(ok, "git {args:?} failed");
        }
    }

    #[test]
    fn detect_repo_root_walks_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_repo(dir.path());
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let root = detect_repo_root(&nested);
        assert_eq!(
            root.canonicalize().expect("canon"),
            dir.path().canonicalize().expect("canon")
        );
    }

    #[test]
    fn detect_repo_root_falls_back_to_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = detect_repo_root(dir.path());
        assert_eq!(root, dir.path());
    }

    #[test]
    fn status_reports_untracked_and_clean_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_repo(dir.path());

        let status = load_git_status(dir.path());
        assert!(status.is_clean);

        std::fs::write(dir.path().join("new.txt"), "hello").expect("write");
        let status = load_git_status(dir.path());
        assert!(!status.is_clean);
        assert_eq!(status.untracked_files, vec!["new.txt".to_string()]);
        assert!(!status.has_remote);
    }

    #[test]
    fn status_outside_repo_is_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let status = load_git_status(dir.path());
        assert!(status.branch.is_empty());
        assert!(status.modified_files.is_empty());
    }
}
