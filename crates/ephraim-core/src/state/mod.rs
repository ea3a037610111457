//! Session state model.
//!
//! The state record is the authoritative source of truth for a session.
//! The model never mutates it directly; all writes go through the
//! [`manager::StateManager`].

pub mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Workflow phase. Exactly one phase is current at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Boot,
    Planning,
    AwaitingApproval,
    Executing,
    Validating,
    CiCheck,
    Completed,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Boot,
        Phase::Planning,
        Phase::AwaitingApproval,
        Phase::Executing,
        Phase::Validating,
        Phase::CiCheck,
        Phase::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Boot => "boot",
            Phase::Planning => "planning",
            Phase::AwaitingApproval => "awaiting_approval",
            Phase::Executing => "executing",
            Phase::Validating => "validating",
            Phase::CiCheck => "ci_check",
            Phase::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification carried by model output. Bounded on assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    /// Parse a risk string case-insensitively. Anything else is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable confidence band derived from the 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceBand {
    pub fn from_score(score: i64) -> Self {
        if score >= 80 {
            ConfidenceBand::High
        } else if score >= 55 {
            ConfidenceBand::Medium
        } else if score >= 30 {
            ConfidenceBand::Low
        } else {
            ConfidenceBand::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::High => "HIGH",
            ConfidenceBand::Medium => "MEDIUM",
            ConfidenceBand::Low => "LOW",
            ConfidenceBand::VeryLow => "VERY_LOW",
        }
    }
}

/// Structured plan produced by the planning model and gated by human
/// approval. `approved` is false until the state manager grants it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub goal_understanding: String,
    pub reasoning: String,
    pub execution_steps: Vec<String>,
    pub risk_assessment: String,
    pub validation_plan: String,
    pub commit_strategy: String,
    #[serde(default)]
    pub approved: bool,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.execution_steps.is_empty() && self.goal_understanding.is_empty()
    }
}

/// Append-only record of one tool dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub params: Map<String, Value>,
    pub result: Map<String, Value>,
    pub success: bool,
}

impl ActionRecord {
    /// Short result summary for briefs and the context document.
    pub fn summary(&self) -> String {
        self.result
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .chars()
            .take(200)
            .collect()
    }
}

/// Snapshot of repository state, refreshed at task start and after git
/// actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitStatus {
    pub branch: String,
    pub is_clean: bool,
    pub modified_files: Vec<String>,
    pub untracked_files: Vec<String>,
    pub staged_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub has_remote: bool,
}

/// Snapshot of CI state, refreshed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CiStatus {
    pub status: String,
    pub workflow_name: String,
    pub run_id: Option<u64>,
    pub conclusion: String,
    pub duration: String,
    pub last_run_url: String,
    pub failed_tests: Vec<String>,
}

/// Iteration tracking for the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub iteration: u32,
    pub max_iterations: u32,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            iteration: 0,
            max_iterations: 20,
        }
    }
}

impl ExecutionState {
    pub fn can_continue(&self) -> bool {
        self.iteration < self.max_iterations
    }

    pub fn increment(&mut self) {
        self.iteration += 1;
    }
}

/// The authoritative session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: Phase,
    pub current_goal: String,

    /// 0-100, bounded on assignment.
    pub confidence_score: i64,
    pub risk_level: RiskLevel,

    pub awaiting_user_approval: bool,
    pub current_plan: Plan,

    pub git: GitStatus,
    pub ci: CiStatus,
    pub execution: ExecutionState,

    pub action_history: Vec<ActionRecord>,

    pub repo_root: PathBuf,
    pub config_doc_path: PathBuf,
    pub context_doc_path: PathBuf,

    pub session_start: DateTime<Utc>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Boot,
            current_goal: String::new(),
            confidence_score: 0,
            risk_level: RiskLevel::Low,
            awaiting_user_approval: false,
            current_plan: Plan::default(),
            git: GitStatus::default(),
            ci: CiStatus::default(),
            execution: ExecutionState::default(),
            action_history: Vec::new(),
            repo_root: PathBuf::new(),
            config_doc_path: PathBuf::new(),
            context_doc_path: PathBuf::new(),
            session_start: Utc::now(),
        }
    }
}

/// Tools whose use counts as plan-step progress.
pub const MUTATING_TOOLS: &[&str] = &[
    "write_file",
    "apply_patch",
    "run_command",
    "git_add",
    "git_commit",
];

impl SessionState {
    /// The `count` most recent action records, oldest first.
    pub fn recent_actions(&self, count: usize) -> &[ActionRecord] {
        let start = self.action_history.len().saturating_sub(count);
        &self.action_history[start..]
    }

    /// Count of mutating tool uses in the action log.
    pub fn mutation_count(&self) -> usize {
        self.action_history
            .iter()
            .filter(|a| MUTATING_TOOLS.contains(&a.tool.as_str()))
            .count()
    }

    /// Estimated plan-step index: mutating tool uses, clamped to the last
    /// plan step.
    pub fn current_step(&self) -> usize {
        let steps = self.current_plan.execution_steps.len();
        if steps == 0 {
            return 0;
        }
        self.mutation_count().min(steps - 1)
    }

    pub fn confidence_band(&self) -> ConfidenceBand {
        ConfidenceBand::from_score(self.confidence_score)
    }

    /// Clarification is needed below high confidence or at high risk.
    pub fn requires_clarification(&self) -> bool {
        self.confidence_score < 80 || self.risk_level == RiskLevel::High
    }

    pub fn add_action(
        &mut self,
        tool: impl Into<String>,
        params: Map<String, Value>,
        result: Map<String, Value>,
        success: bool,
    ) {
        self.action_history.push(ActionRecord {
            timestamp: Utc::now(),
            tool: tool.into(),
            params,
            result,
            success,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn confidence_bands_follow_thresholds() {
        assert_eq!(ConfidenceBand::from_score(100).as_str(), "HIGH");
        assert_eq!(ConfidenceBand::from_score(80).as_str(), "HIGH");
        assert_eq!(ConfidenceBand::from_score(79).as_str(), "MEDIUM");
        assert_eq!(ConfidenceBand::from_score(55).as_str(), "MEDIUM");
        assert_eq!(ConfidenceBand::from_score(54).as_str(), "LOW");
        assert_eq!(ConfidenceBand::from_score(30).as_str(), "LOW");
        assert_eq!(ConfidenceBand::from_score(29).as_str(), "VERY_LOW");
        assert_eq!(ConfidenceBand::from_score(0).as_str(), "VERY_LOW");
    }

    #[test]
    fn clarification_predicate_uses_confidence_and_risk() {
        let mut state = SessionState {
            confidence_score: 90,
            ..Default::default()
        };
        assert!(!state.requires_clarification());

        state.confidence_score = 79;
        assert!(state.requires_clarification());

        state.confidence_score = 95;
        state.risk_level = RiskLevel::High;
        assert!(state.requires_clarification());
    }

    #[test]
    fn recent_actions_returns_most_recent_bounded() {
        let mut state = SessionState::default();
        for i in 0..7 {
            state.add_action(format!("tool_{i}"), Map::new(), Map::new(), true);
        }

        let recent = state.recent_actions(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].tool, "tool_4");
        assert_eq!(recent[2].tool, "tool_6");

        assert_eq!(state.recent_actions(100).len(), 7);
    }

    #[test]
    fn risk_parse_is_case_insensitive_and_bounded() {
        assert_eq!(RiskLevel::parse("high"), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse("Medium"), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::parse("catastrophic"), None);
    }

    #[test]
    fn execution_state_ceiling() {
        let mut exec = ExecutionState {
            iteration: 0,
            max_iterations: 2,
        };
        assert!(exec.can_continue());
        exec.increment();
        assert!(exec.can_continue());
        exec.increment();
        assert!(!exec.can_continue());
    }
}
