//! Background task manager.
//!
//! Owns long-running shell subprocesses keyed by short id. Each task has
//! two reader tasks appending stdout and stderr line buffers; lines are
//! recorded in arrival order per stream, with no ordering guarantee
//! between the two streams.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};

use anyhow::{Context, Result};

/// Grace period between terminate and forced kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Background task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped
        )
    }
}

/// Point-in-time view of a task (no output lines).
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: String,
    pub command: String,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub stdout_lines: usize,
    pub stderr_lines: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Tail of a task's captured output.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub id: String,
    pub status: TaskStatus,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: Option<i32>,
}

struct TaskEntry {
    id: String,
    command: String,
    status: TaskStatus,
    pid: Option<u32>,
    exited: bool,
    exit_code: Option<i32>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    stdout: Arc<Mutex<Vec<String>>>,
    stderr: Arc<Mutex<Vec<String>>>,
}

/// Registry of background tasks. The map is mutated only under its lock;
/// no lock is held while a subprocess spawns or is awaited.
#[derive(Clone)]
pub struct TaskManager {
    tasks: Arc<RwLock<HashMap<String, TaskEntry>>>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a shell command in the background. Returns the task id.
    /// When `timeout` is set, a task still running past it is stopped.
    pub async fn start(
        &self,
        command: &str,
        cwd: Option<PathBuf>,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let cwd = match cwd {
            Some(dir) => dir,
            None => std::env::current_dir().context("resolving working directory")?,
        };

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            // New process group so stop() can reach all children.
            #[cfg(unix)]
            {
                c.process_group(0);
            }
            c
        };

        cmd.current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning background task: {command}"))?;
        let pid = child.id();

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));

        if let Some(stdout) = child.stdout.take() {
            let buf = Arc::clone(&stdout_buf);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    buf.lock().await.push(line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    buf.lock().await.push(line);
                }
            });
        }

        let entry = TaskEntry {
            id: id.clone(),
            command: command.to_string(),
            status: TaskStatus::Running,
            pid,
            exited: false,
            exit_code: None,
            started_at: Utc::now(),
            completed_at: None,
            stdout: stdout_buf,
            stderr: stderr_buf,
        };
        self.tasks.write().await.insert(id.clone(), entry);

        tracing::info!(id = %id, pid = ?pid, command = %command, "background task started");

        // Monitor: record the exit, but never overwrite a Stopped status.
        let tasks = Arc::clone(&self.tasks);
        let task_id = id.clone();
        tokio::spawn(async move {
            let status = child.wait().await;

            let mut map = tasks.write().await;
            let Some(entry) = map.get_mut(&task_id) else {
                return;
            };
            entry.exited = true;
            entry.exit_code = status.as_ref().ok().and_then(|s| s.code());
            if entry.completed_at.is_none() {
                entry.completed_at = Some(Utc::now());
            }
            if entry.status == TaskStatus::Running {
                entry.status = match status {
                    Ok(s) if s.success() => TaskStatus::Completed,
                    _ => TaskStatus::Failed,
                };
            }
            tracing::info!(id = %task_id, status = entry.status.as_str(), "background task finished");
        });

        if let Some(timeout) = timeout {
            let manager = self.clone();
            let task_id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if manager.stop(&task_id).await {
                    tracing::warn!(id = %task_id, "background task hit its timeout");
                }
            });
        }

        Ok(id)
    }

    pub async fn check(&self, id: &str) -> Option<TaskSnapshot> {
        let map = self.tasks.read().await;
        let entry = map.get(id)?;
        let snapshot = TaskSnapshot {
            id: entry.id.clone(),
            command: entry.command.clone(),
            status: entry.status,
            exit_code: entry.exit_code,
            stdout_lines: entry.stdout.lock().await.len(),
            stderr_lines: entry.stderr.lock().await.len(),
            started_at: entry.started_at,
            completed_at: entry.completed_at,
        };
        Some(snapshot)
    }

    /// Last `tail` lines of each stream (all lines when `tail` is 0).
    pub async fn get_output(&self, id: &str, tail: usize) -> Option<TaskOutput> {
        let map = self.tasks.read().await;
        let entry = map.get(id)?;

        let take_tail = |lines: &[String]| -> Vec<String> {
            if tail == 0 {
                lines.to_vec()
            } else {
                lines[lines.len().saturating_sub(tail)..].to_vec()
            }
        };

        let stdout = take_tail(&entry.stdout.lock().await);
        let stderr = take_tail(&entry.stderr.lock().await);
        Some(TaskOutput {
            id: entry.id.clone(),
            status: entry.status,
            stdout,
            stderr,
            exit_code: entry.exit_code,
        })
    }

    /// Stop a running task: terminate, then force-kill after the grace
    /// period if it has not exited.
    pub async fn stop(&self, id: &str) -> bool {
        let pid = {
            let mut map = self.tasks.write().await;
            let Some(entry) = map.get_mut(id) else {
                return false;
            };
            if entry.status != TaskStatus::Running {
                return false;
            }
            entry.status = TaskStatus::Stopped;
            entry.completed_at = Some(Utc::now());
            entry.pid
        };

        if let Some(pid) = pid {
            signal_process(pid, false);

            let tasks = Arc::clone(&self.tasks);
            let task_id = id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(STOP_GRACE).await;
                let map = tasks.read().await;
                if let Some(entry) = map.get(&task_id) {
                    if !entry.exited {
                        signal_process(pid, true);
                    }
                }
            });
        }

        tracing::info!(id = %id, "background task stopped");
        true
    }

    /// All tasks, newest first.
    pub async fn list_tasks(&self, include_completed: bool) -> Vec<TaskSnapshot> {
        let ids: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        let mut snapshots = Vec::new();
        for id in ids {
            if let Some(snapshot) = self.check(&id).await {
                if include_completed || !snapshot.status.is_terminal() {
                    snapshots.push(snapshot);
                }
            }
        }
        snapshots.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        snapshots
    }

    /// Remove terminal tasks older than `max_age_hours`. Returns count.
    pub async fn cleanup(&self, max_age_hours: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);
        let mut map = self.tasks.write().await;
        let before = map.len();
        map.retain(|_, entry| {
            !(entry.status.is_terminal()
                && entry.completed_at.map(|t| t < cutoff).unwrap_or(false))
        });
        before - map.len()
    }
}

/// Terminate (or kill) a process group, falling back to the single
/// process when the group signal fails.
fn signal_process(pid: u32, force: bool) {
    #[cfg(unix)]
    {
        let signal = if force { "-KILL" } else { "-TERM" };
        let group = format!("-{pid}");
        let result = std::process::Command::new("kill")
            .arg(signal)
            .arg(&group)
            .output();
        if result.is_err() {
            let _ = std::process::Command::new("kill")
                .arg(signal)
                .arg(pid.to_string())
                .output();
        }
    }
    #[cfg(windows)]
    {
        let _ = force;
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output();
    }
}
