//! Sub-agent supervisor.
//!
//! Spawns parallel single-shot reasoners, each owning its own model
//! invocation. Sub-agents never call tools; they return text that the
//! parent consumes as context. The supervisor's map is the only shared
//! state and is mutated only under its lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::model::{ChatBackend, ChatMessage};

/// Poll interval for `wait`.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Kinds of sub-agents, each with a fixed brief template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Explore,
    Plan,
    Execute,
    Research,
}

impl AgentKind {
    /// Parse a kind name; unrecognized kinds fall back to Explore.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "plan" => AgentKind::Plan,
            "execute" => AgentKind::Execute,
            "research" => AgentKind::Research,
            _ => AgentKind::Explore,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Explore => "explore",
            AgentKind::Plan => "plan",
            AgentKind::Execute => "execute",
            AgentKind::Research => "research",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            AgentKind::Explore => {
                "You are an exploration agent. Your job is to search and understand codebases.\n\
                 Given a task, identify what files and code are relevant, understand the\n\
                 structure and patterns, and report your findings clearly and concisely.\n\
                 Respond with a summary of what you found."
            }
            AgentKind::Plan => {
                "You are a planning agent. Your job is to design implementation approaches.\n\
                 Given a task, break it into steps, identify potential challenges, and\n\
                 propose a clear implementation plan. Respond with a structured plan."
            }
            AgentKind::Execute => {
                "You are an execution agent. Your job is to work out concrete actions.\n\
                 Given a task, determine what actions are needed, order them, and report\n\
                 the expected results. Respond with what should be done and the outcome."
            }
            AgentKind::Research => {
                "You are a research agent. Your job is to analyze and research.\n\
                 Given a task, gather relevant information, analyze and synthesize\n\
                 findings, and provide a clear summary. Respond with your findings."
            }
        }
    }
}

/// Sub-agent lifecycle. Transitions are monotonic:
/// PENDING -> RUNNING -> (COMPLETED | FAILED | CANCELLED).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Cancelled
        )
    }
}

/// Result text from a finished sub-agent.
#[derive(Debug, Clone)]
pub struct SubAgentResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

/// Point-in-time view of one sub-agent.
#[derive(Debug, Clone)]
pub struct SubAgentSnapshot {
    pub id: String,
    pub task: String,
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<SubAgentResult>,
}

struct SubAgentEntry {
    snapshot: SubAgentSnapshot,
}

/// Supervisor owning the sub-agent map. Parents hold ids only.
pub struct SubAgentSupervisor {
    agents: Arc<RwLock<HashMap<String, SubAgentEntry>>>,
    backend: Arc<dyn ChatBackend>,
    model: String,
}

impl SubAgentSupervisor {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            backend,
            model: model.into(),
        }
    }

    /// Spawn a worker for `task`. Returns immediately with the new id.
    pub async fn spawn(
        &self,
        task: impl Into<String>,
        kind: AgentKind,
        context: Option<Map<String, Value>>,
    ) -> String {
        let task = task.into();
        let id = uuid::Uuid::new_v4().to_string()[..8].to_string();

        let entry = SubAgentEntry {
            snapshot: SubAgentSnapshot {
                id: id.clone(),
                task: task.clone(),
                kind,
                status: AgentStatus::Pending,
                created_at: Utc::now(),
                completed_at: None,
                result: None,
            },
        };
        self.agents.write().await.insert(id.clone(), entry);

        let agents = Arc::clone(&self.agents);
        let backend = Arc::clone(&self.backend);
        let model = self.model.clone();
        let agent_id = id.clone();

        tokio::spawn(async move {
            // Cancelled before starting: leave the status alone.
            {
                let mut map = agents.write().await;
                match map.get_mut(&agent_id) {
                    Some(entry) if entry.snapshot.status == AgentStatus::Pending => {
                        entry.snapshot.status = AgentStatus::Running;
                    }
                    _ => return,
                }
            }

            let mut system = kind.system_prompt().to_string();
            if let Some(context) = context {
                let lines: Vec<String> = context
                    .iter()
                    .filter_map(|(k, v)| match v {
                        Value::String(s) => Some(format!("{k}: {s}")),
                        Value::Number(n) => Some(format!("{k}: {n}")),
                        Value::Bool(b) => Some(format!("{k}: {b}")),
                        _ => None,
                    })
                    .collect();
                if !lines.is_empty() {
                    system.push_str("\n\nContext:\n");
                    system.push_str(&lines.join("\n"));
                }
            }

            let messages = vec![ChatMessage::system(system), ChatMessage::user(task)];
            let outcome = backend.chat(&model, &messages).await;

            let mut map = agents.write().await;
            let Some(entry) = map.get_mut(&agent_id) else {
                return;
            };
            // A cancellation that raced the model call wins; the result is
            // simply discarded.
            if entry.snapshot.status == AgentStatus::Cancelled {
                return;
            }

            match outcome {
                Ok(text) => {
                    entry.snapshot.result = Some(SubAgentResult {
                        success: true,
                        output: text,
                        error: None,
                    });
                    entry.snapshot.status = AgentStatus::Completed;
                }
                Err(e) => {
                    entry.snapshot.result = Some(SubAgentResult {
                        success: false,
                        output: String::new(),
                        error: Some(e.to_string()),
                    });
                    entry.snapshot.status = AgentStatus::Failed;
                }
            }
            entry.snapshot.completed_at = Some(Utc::now());
            tracing::debug!(id = %agent_id, status = entry.snapshot.status.as_str(), "sub-agent finished");
        });

        id
    }

    /// Snapshot of one agent.
    pub async fn check(&self, id: &str) -> Option<SubAgentSnapshot> {
        self.agents
            .read()
            .await
            .get(id)
            .map(|e| e.snapshot.clone())
    }

    /// Block up to `timeout` for the agent to reach a terminal status.
    /// Returns `None` for an unknown id or on timeout.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Option<SubAgentResult> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.check(id).await {
                None => return None,
                Some(snapshot) if snapshot.status.is_terminal() => return snapshot.result,
                Some(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    /// Wait for several agents, dividing the total budget equally.
    pub async fn wait_all(
        &self,
        ids: &[String],
        total_timeout: Duration,
    ) -> HashMap<String, Option<SubAgentResult>> {
        let mut results = HashMap::new();
        if ids.is_empty() {
            return results;
        }

        let per_agent = total_timeout / ids.len() as u32;
        for id in ids {
            results.insert(id.clone(), self.wait(id, per_agent).await);
        }
        results
    }

    /// Mark an agent cancelled. The underlying model call is not
    /// interrupted; its result is discarded at the next suspension point.
    pub async fn cancel(&self, id: &str) -> bool {
        let mut map = self.agents.write().await;
        match map.get_mut(id) {
            Some(entry) if !entry.snapshot.status.is_terminal() => {
                entry.snapshot.status = AgentStatus::Cancelled;
                entry.snapshot.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// All agents, newest first.
    pub async fn list(&self, include_completed: bool) -> Vec<SubAgentSnapshot> {
        let mut agents: Vec<SubAgentSnapshot> = self
            .agents
            .read()
            .await
            .values()
            .map(|e| e.snapshot.clone())
            .filter(|s| include_completed || !s.status.is_terminal())
            .collect();
        agents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        agents
    }

    /// Evict the oldest agents beyond `max_count`. Returns evicted count.
    pub async fn cleanup(&self, max_count: usize) -> usize {
        let mut map = self.agents.write().await;
        if map.len() <= max_count {
            return 0;
        }

        let mut by_age: Vec<(String, DateTime<Utc>)> = map
            .iter()
            .map(|(id, e)| (id.clone(), e.snapshot.created_at))
            .collect();
        by_age.sort_by(|a, b| b.1.cmp(&a.1));

        let evict: Vec<String> = by_age[max_count..].iter().map(|(id, _)| id.clone()).collect();
        for id in &evict {
            map.remove(id);
        }
        evict.len()
    }
}
