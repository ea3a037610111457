//! Event hooks configured in `Ephraim.md`.
//!
//! Hook items have the form `event: command` or
//! `event: command (for tool_a, tool_b)`. Commands run through `sh -c`.
//! A `pre_tool` hook exiting non-zero blocks the tool invocation.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

/// Events that can trigger hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    PreTool,
    PostTool,
    PreCommit,
    PostCommit,
    OnError,
    OnComplete,
    OnPlanApproved,
    OnStart,
}

impl HookEvent {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pre_tool" => Some(HookEvent::PreTool),
            "post_tool" => Some(HookEvent::PostTool),
            "pre_commit" => Some(HookEvent::PreCommit),
            "post_commit" => Some(HookEvent::PostCommit),
            "on_error" => Some(HookEvent::OnError),
            "on_complete" => Some(HookEvent::OnComplete),
            "on_plan_approved" => Some(HookEvent::OnPlanApproved),
            "on_start" => Some(HookEvent::OnStart),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreTool => "pre_tool",
            HookEvent::PostTool => "post_tool",
            HookEvent::PreCommit => "pre_commit",
            HookEvent::PostCommit => "post_commit",
            HookEvent::OnError => "on_error",
            HookEvent::OnComplete => "on_complete",
            HookEvent::OnPlanApproved => "on_plan_approved",
            HookEvent::OnStart => "on_start",
        }
    }
}

/// One configured hook.
#[derive(Debug, Clone)]
pub struct Hook {
    pub event: HookEvent,
    pub command: String,
    /// Restrict tool hooks to these tool names; `None` matches all.
    pub tools: Option<Vec<String>>,
}

impl Hook {
    /// Parse `event: command [(for tool, …)]`.
    pub fn parse(item: &str) -> Option<Self> {
        let (event, rest) = item.split_once(':')?;
        let event = HookEvent::parse(event)?;
        let mut command = rest.trim().to_string();
        let mut tools = None;

        if let Some(open) = command.rfind("(for ") {
            if command.ends_with(')') {
                let list = command[open + 5..command.len() - 1].to_string();
                command.truncate(open);
                command = command.trim_end().to_string();
                tools = Some(
                    list.split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect(),
                );
            }
        }

        if command.is_empty() {
            return None;
        }
        Some(Self {
            event,
            command,
            tools,
        })
    }

    pub fn matches_tool(&self, tool: &str) -> bool {
        match &self.tools {
            None => true,
            Some(tools) => tools.iter().any(|t| t == tool),
        }
    }
}

/// Outcome of firing the hooks for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    /// A `pre_tool` hook failed; the tool must not run.
    Block { reason: String },
}

/// Runs configured hooks. Hook commands execute sequentially with a
/// short timeout each; failures of non-blocking events are only logged.
pub struct HookRunner {
    hooks: Vec<Hook>,
    timeout: Duration,
}

impl HookRunner {
    pub fn from_config_lines(lines: &[String]) -> Self {
        let hooks = lines.iter().filter_map(|l| Hook::parse(l)).collect();
        Self {
            hooks,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Fire all hooks registered for `event`. `tool` filters tool hooks.
    pub async fn fire(&self, event: HookEvent, tool: Option<&str>, working_dir: &Path) -> HookOutcome {
        for hook in self.hooks.iter().filter(|h| h.event == event) {
            if let Some(tool) = tool {
                if !hook.matches_tool(tool) {
                    continue;
                }
            }

            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&hook.command).current_dir(working_dir);
            if let Some(tool) = tool {
                cmd.env("EPHRAIM_TOOL", tool);
            }
            cmd.env("EPHRAIM_EVENT", event.as_str());

            let result = tokio::time::timeout(self.timeout, async { cmd.output().await }).await;
            let failed = match &result {
                Ok(Ok(output)) => !output.status.success(),
                _ => true,
            };

            if failed {
                let reason = match result {
                    Ok(Ok(output)) => {
                        String::from_utf8_lossy(&output.stderr).trim().to_string()
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "hook timed out".to_string(),
                };
                tracing::warn!(
                    event = event.as_str(),
                    command = %hook.command,
                    %reason,
                    "hook failed"
                );
                if event == HookEvent::PreTool {
                    return HookOutcome::Block {
                        reason: if reason.is_empty() {
                            format!("pre_tool hook failed: {}", hook.command)
                        } else {
                            reason
                        },
                    };
                }
            }
        }

        HookOutcome::Continue
    }
}
