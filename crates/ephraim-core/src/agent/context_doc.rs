//! The human-readable context document (`Context.md`).
//!
//! Rewritten at plan approval and completion. Prior content is never
//! parsed; the file exists for humans.

use std::fmt::Write as _;
use std::fs;

use crate::state::{Phase, SessionState};

/// Render the context document for the current state.
pub fn render(state: &SessionState) -> String {
    let mut doc = String::new();

    let _ = writeln!(doc, "# Current Task");
    if state.current_goal.is_empty() {
        let _ = writeln!(doc, "No active task.");
    } else {
        let _ = writeln!(doc, "{}", state.current_goal);
    }

    let _ = writeln!(doc, "\n# Phase\n{}", state.phase);

    let _ = writeln!(doc, "\n# Active Plan");
    if state.current_plan.approved && !state.current_plan.goal_understanding.is_empty() {
        let _ = writeln!(doc, "Goal: {}", state.current_plan.goal_understanding);
        let _ = writeln!(doc, "Steps:");
        for (i, step) in state.current_plan.execution_steps.iter().enumerate() {
            let _ = writeln!(doc, "  {}. {}", i + 1, step);
        }
    } else if state.phase == Phase::Completed {
        let _ = writeln!(doc, "Completed.");
    } else {
        let _ = writeln!(doc, "No approved plan.");
    }

    let _ = writeln!(doc, "\n# Recent Decisions");
    let recent = state.recent_actions(5);
    if recent.is_empty() {
        let _ = writeln!(doc, "None yet.");
    } else {
        for action in recent {
            let summary: String = action.summary().chars().take(50).collect();
            let _ = writeln!(
                doc,
                "- {}: {} - {}",
                action.timestamp.format("%Y-%m-%dT%H:%M:%S"),
                action.tool,
                summary
            );
        }
    }

    let _ = writeln!(doc, "\n# CI Status");
    if state.ci.status.is_empty() {
        let _ = writeln!(doc, "Not checked.");
    } else {
        let _ = writeln!(doc, "{}", state.ci.status);
    }

    let _ = writeln!(doc, "\n# Git Status");
    let branch = if state.git.branch.is_empty() {
        "N/A"
    } else {
        &state.git.branch
    };
    let _ = writeln!(doc, "Branch: {branch}");
    let _ = writeln!(doc, "Clean: {}", state.git.is_clean);

    let _ = writeln!(doc, "\n# Next Steps");
    if state.phase == Phase::Completed {
        let _ = writeln!(doc, "Awaiting user input.");
    } else {
        let _ = writeln!(doc, "In progress.");
    }

    let _ = writeln!(doc, "\n# Updated\n{}", chrono::Local::now().to_rfc3339());

    doc
}

/// Rewrite `Context.md`. A write failure is non-fatal and only logged.
pub fn update(state: &SessionState) {
    if state.context_doc_path.as_os_str().is_empty() {
        return;
    }
    if let Err(e) = fs::write(&state.context_doc_path, render(state)) {
        tracing::warn!(error = %e, "could not update context document");
    }
}
