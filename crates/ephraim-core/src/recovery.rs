//! Error classification and recovery strategy.
//!
//! After a tool failure the strategist classifies the error, decides
//! whether a retry is worthwhile, and proposes a corrective next action
//! that the loop injects into the next prompt.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::state::Phase;

/// Error taxonomy shared by tool results and the strategist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Permission,
    Validation,
    Timeout,
    Network,
    Syntax,
    Conflict,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Permission => "permission",
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Syntax => "syntax",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Trigger substrings per kind, applied in order; first match wins.
const TRIGGERS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::NotFound,
        &["not found", "no such", "does not exist", "enoent"],
    ),
    (
        ErrorKind::Permission,
        &["permission denied", "forbidden", "eacces"],
    ),
    (
        ErrorKind::Validation,
        &["invalid", "pattern not found", "malformed"],
    ),
    (ErrorKind::Timeout, &["timeout", "deadline"]),
    (
        ErrorKind::Network,
        &["connection refused", "econnrefused"],
    ),
    (
        ErrorKind::Syntax,
        &["syntaxerror", "parse error", "indentation"],
    ),
    (ErrorKind::Conflict, &["already exists", "conflict"]),
];

/// Classify an error message into the taxonomy.
pub fn classify_error(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    for (kind, patterns) in TRIGGERS {
        if patterns.iter().any(|p| lower.contains(p)) {
            return *kind;
        }
    }
    ErrorKind::Unknown
}

/// Context for a failed action, handed to the strategist.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub failed_action: String,
    pub error_message: String,
    pub kind: ErrorKind,
    pub attempt_count: u32,
    pub original_params: Map<String, Value>,
    pub phase: Phase,
    pub previous_reasoning: String,
}

impl ErrorContext {
    pub fn new(
        action: impl Into<String>,
        error: impl Into<String>,
        params: Map<String, Value>,
        attempt: u32,
        phase: Phase,
        reasoning: impl Into<String>,
    ) -> Self {
        let error_message = error.into();
        let kind = classify_error(&error_message);
        Self {
            failed_action: action.into(),
            error_message,
            kind,
            attempt_count: attempt,
            original_params: params,
            phase,
            previous_reasoning: reasoning.into(),
        }
    }
}

/// Advisory next action after a failure.
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    pub strategy: &'static str,
    pub action: String,
    pub params: Map<String, Value>,
    pub reasoning: String,
    pub confidence: u8,
}

/// Failures of these actions are considered non-critical: after the retry
/// budget is spent the task can be force-closed instead of spinning.
const NON_CRITICAL_ACTIONS: &[&str] = &["run_command", "git_add", "git_commit"];

/// Stateless recovery strategist.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryStrategist;

impl RecoveryStrategist {
    pub fn new() -> Self {
        Self
    }

    /// Propose a corrective action for a failure. Network failures have no
    /// automatic remedy and are surfaced to the caller as `None`.
    pub fn suggest(&self, ctx: &ErrorContext) -> Option<RecoverySuggestion> {
        let path = ctx
            .original_params
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let suggestion = match ctx.kind {
            ErrorKind::NotFound => {
                let basename = path
                    .rsplit(['/', '\\'])
                    .next()
                    .filter(|s| !s.is_empty())
                    .unwrap_or("*");
                RecoverySuggestion {
                    strategy: "search_first",
                    action: "glob_search".to_string(),
                    params: object(json!({ "pattern": format!("**/{basename}") })),
                    reasoning: format!(
                        "'{path}' was not found. Searching for similar files to locate the correct path."
                    ),
                    confidence: 70,
                }
            }
            ErrorKind::Validation => RecoverySuggestion {
                strategy: "read_first",
                action: "read_file".to_string(),
                params: object(json!({ "path": path })),
                reasoning: format!(
                    "Validation failed. Reading '{path}' to understand current content before retrying."
                ),
                confidence: 80,
            },
            ErrorKind::Permission => RecoverySuggestion {
                strategy: "ask_permission",
                action: "ask_user".to_string(),
                params: object(json!({
                    "question": format!(
                        "Permission denied for {}. Should I try a different approach?",
                        ctx.failed_action
                    )
                })),
                reasoning: "Cannot access resource due to permissions. Need user guidance."
                    .to_string(),
                confidence: 50,
            },
            ErrorKind::Timeout => RecoverySuggestion {
                strategy: "skip_slow",
                action: "final_answer".to_string(),
                params: object(json!({
                    "message": format!(
                        "Skipped {} after it timed out. Main task completed.",
                        ctx.failed_action
                    )
                })),
                reasoning: "Operation timed out. Completing the task without this step."
                    .to_string(),
                confidence: 60,
            },
            ErrorKind::Syntax => RecoverySuggestion {
                strategy: "inspect_syntax",
                action: "read_file".to_string(),
                params: object(json!({ "path": path })),
                reasoning: format!(
                    "Syntax error detected. Reading '{path}' to identify and fix the issue."
                ),
                confidence: 75,
            },
            ErrorKind::Conflict => RecoverySuggestion {
                strategy: "handle_existing",
                action: "read_file".to_string(),
                params: object(json!({ "path": path })),
                reasoning: format!(
                    "Target already exists. Reading '{path}' to decide whether to update it or pick a different name."
                ),
                confidence: 70,
            },
            ErrorKind::Network => return None,
            ErrorKind::Unknown => RecoverySuggestion {
                strategy: "ask_help",
                action: "ask_user".to_string(),
                params: object(json!({
                    "question": format!(
                        "Action '{}' failed with: {}. How should I proceed?",
                        ctx.failed_action,
                        truncate(&ctx.error_message, 100)
                    )
                })),
                reasoning: "Encountered an unexpected error. Requesting user guidance."
                    .to_string(),
                confidence: 40,
            },
        };

        Some(suggestion)
    }

    /// Retry policy: permission never retries, unknown at most once,
    /// validation/not-found/syntax up to twice, everything else up to the
    /// overall ceiling of three attempts.
    pub fn should_retry(&self, ctx: &ErrorContext) -> bool {
        match ctx.kind {
            ErrorKind::Permission => false,
            ErrorKind::Unknown => ctx.attempt_count < 1,
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Syntax => {
                ctx.attempt_count < 2
            }
            _ => ctx.attempt_count < 3,
        }
    }

    /// Whether the task should be closed out despite the failure: the
    /// retry budget is spent and the action is non-critical.
    pub fn should_complete(&self, ctx: &ErrorContext) -> bool {
        ctx.attempt_count >= 3 && NON_CRITICAL_ACTIONS.contains(&ctx.failed_action.as_str())
    }

    /// Heuristic parameter adjustment for a retry of the same action.
    pub fn adjust_params(&self, ctx: &ErrorContext) -> Map<String, Value> {
        let mut params = ctx.original_params.clone();

        // An unmatched patch pattern often fails on trailing lines; retry
        // with just the first line.
        if ctx.failed_action == "apply_patch" && ctx.kind == ErrorKind::Validation {
            if let Some(first_line) = params
                .get("find")
                .and_then(Value::as_str)
                .and_then(|find| find.lines().next())
            {
                let shortened = first_line.to_string();
                params.insert("find".to_string(), Value::String(shortened));
            }
        }

        params
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_matches_taxonomy_table() {
        let cases = [
            ("file not found", ErrorKind::NotFound),
            ("No such file or directory", ErrorKind::NotFound),
            ("path does not exist", ErrorKind::NotFound),
            ("ENOENT while opening", ErrorKind::NotFound),
            ("Permission denied (publickey)", ErrorKind::Permission),
            ("403 Forbidden", ErrorKind::Permission),
            ("EACCES on /etc", ErrorKind::Permission),
            ("invalid parameter value", ErrorKind::Validation),
            ("pattern not found in file", ErrorKind::Validation),
            ("malformed input", ErrorKind::Validation),
            ("timeout after 120s", ErrorKind::Timeout),
            ("deadline exceeded", ErrorKind::Timeout),
            ("connection refused by host", ErrorKind::Network),
            ("ECONNREFUSED 127.0.0.1", ErrorKind::Network),
            ("SyntaxError: unexpected token", ErrorKind::Syntax),
            ("parse error near line 3", ErrorKind::Syntax),
            ("IndentationError in script", ErrorKind::Syntax),
            ("branch already exists", ErrorKind::Conflict),
            ("merge conflict in main.rs", ErrorKind::Conflict),
            ("something inexplicable", ErrorKind::Unknown),
        ];

        for (message, expected) in cases {
            assert_eq!(classify_error(message), expected, "message: {message}");
        }
    }

    #[test]
    fn first_match_wins_in_table_order() {
        // Contains both a not-found and a validation trigger; not-found is
        // earlier in the table.
        assert_eq!(
            classify_error("invalid path: does not exist"),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn not_found_suggests_glob_for_basename() {
        let ctx = ErrorContext::new(
            "read_file",
            "file not found",
            object(json!({ "path": "src/deep/mod.rs" })),
            1,
            Phase::Executing,
            "",
        );
        let suggestion = RecoveryStrategist::new().suggest(&ctx).expect("suggestion");
        assert_eq!(suggestion.action, "glob_search");
        assert_eq!(
            suggestion.params.get("pattern").and_then(Value::as_str),
            Some("**/mod.rs")
        );
    }

    #[test]
    fn network_errors_have_no_automatic_remedy() {
        let ctx = ErrorContext::new(
            "run_command",
            "connection refused",
            Map::new(),
            1,
            Phase::Executing,
            "",
        );
        assert!(RecoveryStrategist::new().suggest(&ctx).is_none());
    }

    #[test]
    fn retry_policy_follows_kind_limits() {
        let strategist = RecoveryStrategist::new();
        let ctx = |kind_msg: &str, attempt: u32| {
            ErrorContext::new("x", kind_msg, Map::new(), attempt, Phase::Executing, "")
        };

        // Permission never retries.
        assert!(!strategist.should_retry(&ctx("permission denied", 0)));

        // Unknown retries at most once.
        assert!(strategist.should_retry(&ctx("weird", 0)));
        assert!(!strategist.should_retry(&ctx("weird", 1)));

        // Validation retries up to twice.
        assert!(strategist.should_retry(&ctx("invalid thing", 1)));
        assert!(!strategist.should_retry(&ctx("invalid thing", 2)));

        // Overall ceiling of three.
        assert!(strategist.should_retry(&ctx("timeout", 2)));
        assert!(!strategist.should_retry(&ctx("timeout", 3)));
    }

    #[test]
    fn force_complete_requires_budget_spent_and_non_critical_action() {
        let strategist = RecoveryStrategist::new();
        let spent = ErrorContext::new(
            "run_command",
            "timeout",
            Map::new(),
            3,
            Phase::Executing,
            "",
        );
        assert!(strategist.should_complete(&spent));

        let critical = ErrorContext::new(
            "apply_patch",
            "timeout",
            Map::new(),
            3,
            Phase::Executing,
            "",
        );
        assert!(!strategist.should_complete(&critical));

        let early = ErrorContext::new(
            "run_command",
            "timeout",
            Map::new(),
            2,
            Phase::Executing,
            "",
        );
        assert!(!strategist.should_complete(&early));
    }

    #[test]
    fn adjust_params_shortens_unmatched_patch_pattern() {
        let ctx = ErrorContext::new(
            "apply_patch",
            "pattern not found",
            object(json!({ "path": "a.py", "find": "line one\nline two" })),
            1,
            Phase::Executing,
            "",
        );
        let params = RecoveryStrategist::new().adjust_params(&ctx);
        assert_eq!(
            params.get("find").and_then(Value::as_str),
            Some("line one")
        );
    }
}
