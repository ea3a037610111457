//! State manager: the phase automaton and the only writer of state.
//!
//! The model proposes; this manager decides. Phase transitions, tool
//! gating, approval, iteration counting and brief assembly all live
//! here.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EphraimConfig;
use crate::state::{CiStatus, GitStatus, Phase, Plan, RiskLevel, SessionState};
use crate::tools::{Tool, ToolCategory};

/// Number of actions kept by `/compact`.
const COMPACT_KEEP: usize = 5;

/// Valid phase transitions.
pub fn allowed_transitions(from: Phase) -> &'static [Phase] {
    match from {
        Phase::Boot => &[Phase::Planning],
        Phase::Planning => &[Phase::AwaitingApproval, Phase::Completed],
        Phase::AwaitingApproval => &[Phase::Planning, Phase::Executing, Phase::Completed],
        Phase::Executing => &[Phase::Validating, Phase::Planning, Phase::Completed],
        Phase::Validating => &[
            Phase::CiCheck,
            Phase::Executing,
            Phase::Planning,
            Phase::Completed,
        ],
        Phase::CiCheck => &[Phase::Completed, Phase::Executing, Phase::Planning],
        Phase::Completed => &[Phase::Planning],
    }
}

/// Tool categories permitted in each phase.
pub fn permitted_categories(phase: Phase) -> &'static [ToolCategory] {
    match phase {
        Phase::Boot => &[],
        Phase::Planning => &[ToolCategory::ReadOnly, ToolCategory::UserInput],
        Phase::AwaitingApproval => &[ToolCategory::UserInput],
        Phase::Executing => &[
            ToolCategory::ReadOnly,
            ToolCategory::Execution,
            ToolCategory::Git,
            ToolCategory::UserInput,
        ],
        Phase::Validating => &[
            ToolCategory::ReadOnly,
            ToolCategory::Execution,
            ToolCategory::UserInput,
        ],
        Phase::CiCheck => &[
            ToolCategory::ReadOnly,
            ToolCategory::Ci,
            ToolCategory::UserInput,
        ],
        Phase::Completed => &[ToolCategory::ReadOnly, ToolCategory::UserInput],
    }
}

/// The orchestration layer that owns the state record.
pub struct StateManager {
    state: SessionState,
    config: Arc<EphraimConfig>,
}

impl StateManager {
    pub fn new(state: SessionState, config: Arc<EphraimConfig>) -> Self {
        Self { state, config }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &EphraimConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn can_transition(&self, to: Phase) -> bool {
        allowed_transitions(self.state.phase).contains(&to)
    }

    /// Attempt a phase transition. Invalid transitions are rejected with a
    /// log message and leave state untouched.
    pub fn transition(&mut self, to: Phase) -> bool {
        if !self.can_transition(to) {
            tracing::warn!(
                from = %self.state.phase,
                to = %to,
                "rejected phase transition"
            );
            return false;
        }

        self.state.phase = to;
        if to != Phase::AwaitingApproval {
            self.state.awaiting_user_approval = false;
        }
        tracing::info!(phase = %to, "phase transition");
        true
    }

    /// Check whether a tool may run right now. Returns the reason on
    /// rejection.
    pub fn can_use_tool(&self, tool: &dyn Tool) -> (bool, String) {
        let category = tool.category();
        if !permitted_categories(self.state.phase).contains(&category) {
            return (
                false,
                format!(
                    "Tool '{}' (category: {}) not allowed in phase '{}'",
                    tool.name(),
                    category.as_str(),
                    self.state.phase
                ),
            );
        }

        if category.requires_approval()
            && self.config.safety.require_approval
            && !self.state.current_plan.approved
        {
            return (
                false,
                format!("Tool '{}' requires plan approval first", tool.name()),
            );
        }

        (true, "Allowed".to_string())
    }

    /// Whether an action would require approval: its tool category is
    /// mutating, or it matches a configured dangerous command pattern.
    pub fn is_dangerous(&self, action: &str) -> bool {
        let lower = action.to_lowercase();
        self.config
            .safety
            .dangerous_commands
            .iter()
            .any(|pattern| lower.contains(&pattern.to_lowercase()))
    }

    pub fn request_approval(&mut self) {
        self.state.awaiting_user_approval = true;
        self.transition(Phase::AwaitingApproval);
    }

    pub fn grant_approval(&mut self) {
        self.state.awaiting_user_approval = false;
        self.state.current_plan.approved = true;
        self.transition(Phase::Executing);
    }

    pub fn deny_approval(&mut self) {
        self.state.awaiting_user_approval = false;
        self.state.current_plan.approved = false;
        self.transition(Phase::Planning);
    }

    pub fn set_goal(&mut self, goal: impl Into<String>) {
        self.state.current_goal = goal.into();
    }

    pub fn append_to_goal(&mut self, note: &str) {
        self.state.current_goal.push_str("\n\n");
        self.state.current_goal.push_str(note);
    }

    pub fn set_plan(&mut self, plan: Plan) {
        self.state.current_plan = plan;
    }

    pub fn set_git(&mut self, git: GitStatus) {
        self.state.git = git;
    }

    pub fn set_ci(&mut self, ci: CiStatus) {
        self.state.ci = ci;
    }

    /// Record a dispatched action and count the iteration.
    pub fn record_action(
        &mut self,
        tool: &str,
        params: Map<String, Value>,
        result: Map<String, Value>,
        success: bool,
    ) {
        self.state.add_action(tool, params, result, success);
        self.state.execution.increment();
    }

    pub fn can_continue(&self) -> bool {
        self.state.execution.can_continue()
    }

    pub fn update_confidence(&mut self, score: i64) {
        self.state.confidence_score = score.clamp(0, 100);
    }

    /// Update risk from a model-supplied string; invalid values keep the
    /// current level.
    pub fn update_risk(&mut self, level: &str) {
        if let Some(risk) = RiskLevel::parse(level) {
            self.state.risk_level = risk;
        }
    }

    pub fn should_ask_clarification(&self) -> bool {
        self.state.requires_clarification()
    }

    /// Truncate the action log to the most recent five entries.
    /// Idempotent after the first application.
    pub fn compact_actions(&mut self) -> usize {
        let len = self.state.action_history.len();
        if len <= COMPACT_KEEP {
            return 0;
        }
        let removed = len - COMPACT_KEEP;
        self.state.action_history.drain(..removed);
        removed
    }

    /// Count of mutating tool uses, clamped to the last plan step.
    pub fn current_step(&self) -> usize {
        self.state.current_step()
    }

    /// Count of mutating tool uses, unclamped, for progression checks.
    pub fn mutation_count(&self) -> usize {
        self.state.mutation_count()
    }

    /// Reset per-task state after completion.
    pub fn reset_task(&mut self) {
        self.state.current_goal.clear();
        self.state.current_plan = Plan::default();
        self.state.execution.iteration = 0;
    }

    /// Build the curated brief the model sees. The model never receives
    /// raw state; only what is assembled here.
    pub fn build_brief(
        &self,
        available_tools: Vec<Value>,
        file_snippets: Option<&HashMap<String, String>>,
    ) -> Value {
        let state = &self.state;
        let mut brief = Map::new();

        brief.insert("phase".to_string(), json!(state.phase.as_str()));
        brief.insert("goal".to_string(), json!(state.current_goal));
        brief.insert(
            "repo_root".to_string(),
            json!(state.repo_root.display().to_string()),
        );
        brief.insert("iteration".to_string(), json!(state.execution.iteration));
        brief.insert(
            "max_iterations".to_string(),
            json!(state.execution.max_iterations),
        );

        if !self.config.architecture_constraints.is_empty()
            || !self.config.coding_standards.is_empty()
            || !self.config.protected_areas.is_empty()
        {
            brief.insert(
                "constraints".to_string(),
                json!({
                    "architecture": self.config.architecture_constraints,
                    "coding_standards": self.config.coding_standards,
                    "protected_areas": self.config.protected_areas,
                }),
            );
        }

        if state.current_plan.approved {
            brief.insert(
                "approved_plan".to_string(),
                json!({
                    "goal": state.current_plan.goal_understanding,
                    "steps": state.current_plan.execution_steps,
                    "current_step": self.current_step(),
                }),
            );
        }

        let recent = state.recent_actions(5);
        if !recent.is_empty() {
            brief.insert(
                "recent_actions".to_string(),
                Value::Array(
                    recent
                        .iter()
                        .map(|a| {
                            json!({
                                "tool": a.tool,
                                "success": a.success,
                                "summary": a.summary(),
                            })
                        })
                        .collect(),
                ),
            );
        }

        if let Some(snippets) = file_snippets {
            let mut ordered: Vec<_> = snippets.iter().collect();
            ordered.sort();
            brief.insert(
                "file_context".to_string(),
                Value::Object(
                    ordered
                        .into_iter()
                        .map(|(k, v)| (k.clone(), json!(v)))
                        .collect(),
                ),
            );
        }

        if !state.git.branch.is_empty() {
            brief.insert(
                "git".to_string(),
                json!({
                    "branch": state.git.branch,
                    "is_clean": state.git.is_clean,
                    "modified_count": state.git.modified_files.len(),
                    "untracked_count": state.git.untracked_files.len(),
                }),
            );
        }

        if !state.ci.status.is_empty() {
            brief.insert(
                "ci".to_string(),
                json!({
                    "status": state.ci.status,
                    "workflow": state.ci.workflow_name,
                    "failed_tests": state.ci.failed_tests.len(),
                }),
            );
        }

        brief.insert("available_tools".to_string(), Value::Array(available_tools));

        Value::Object(brief)
    }

    /// Display summary for `/status` and the `status` subcommand.
    pub fn summary(&self) -> Value {
        let state = &self.state;
        json!({
            "phase": state.phase.as_str(),
            "goal": state.current_goal,
            "confidence": state.confidence_score,
            "confidence_level": state.confidence_band().as_str(),
            "risk": state.risk_level.as_str(),
            "awaiting_approval": state.awaiting_user_approval,
            "plan_approved": state.current_plan.approved,
            "iteration": state.execution.iteration,
            "max_iterations": state.execution.max_iterations,
            "actions_taken": state.action_history.len(),
        })
    }
}
