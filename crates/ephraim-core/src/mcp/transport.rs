//! Stdio transport for MCP tool servers.
//!
//! Frames are newline-delimited JSON: one object per line. Non-JSON
//! lines from the server (debug chatter) are skipped.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use anyhow::{anyhow, Result};

/// Grace period between terminate and force-kill on disconnect.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
}

impl StdioTransport {
    /// Spawn a tool-server subprocess with piped stdio.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<Self> {
        tracing::info!(command, ?args, "spawning MCP server");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .current_dir(working_dir)
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow!("Command not found: {command}. Is it installed and in PATH?")
            } else {
                anyhow!("Failed to spawn {command}: {e}")
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin pipe"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("no stdout pipe"))?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
        })
    }

    /// Write one frame (message + newline).
    pub async fn send(&self, message: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        tracing::trace!(frame = message, "mcp sent");
        Ok(())
    }

    /// Read the next JSON frame, skipping non-JSON lines.
    pub async fn receive(&self) -> Result<String> {
        let mut stdout = self.stdout.lock().await;

        loop {
            let mut line = String::new();
            let bytes = stdout.read_line(&mut line).await?;

            if bytes == 0 {
                let mut child = self.child.lock().await;
                return match child.try_wait() {
                    Ok(Some(status)) => Err(anyhow!("MCP server exited with {status}")),
                    Ok(None) => Err(anyhow!("MCP server closed stdout unexpectedly")),
                    Err(e) => Err(anyhow!("error checking MCP server status: {e}")),
                };
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('{') {
                tracing::trace!(frame = line, "mcp received");
                return Ok(line.to_string());
            }
            tracing::debug!(line, "skipping non-JSON line from MCP server");
        }
    }

    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    /// Terminate the subprocess, escalating to a forced kill after the
    /// grace period.
    pub async fn shutdown(&self) {
        let mut child = self.child.lock().await;
        let Some(pid) = child.id() else {
            return;
        };

        #[cfg(unix)]
        {
            let _ = std::process::Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .output();
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while tokio::time::Instant::now() < deadline {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let _ = child.kill().await;
    }
}
