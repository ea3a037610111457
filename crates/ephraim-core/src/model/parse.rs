//! Strict-JSON reply parsing with layered fallbacks.
//!
//! Local models wrap JSON in markdown or prose often enough that three
//! extraction strategies are tried in order: direct parse, fenced code
//! block, then brace matching.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::model::{ModelAction, ModelReply, PlanProposal};
use crate::state::RiskLevel;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("static regex"));

/// Why a reply was rejected, with the keys that were present so the
/// correction prompt can be targeted.
#[derive(Debug, Clone)]
pub struct ParseIssue {
    pub message: String,
    pub present_keys: Vec<String>,
}

impl ParseIssue {
    fn new(message: impl Into<String>, present_keys: Vec<String>) -> Self {
        Self {
            message: message.into(),
            present_keys,
        }
    }

    /// Correction message sent back to the model.
    pub fn correction(&self) -> String {
        let keys = if self.present_keys.is_empty() {
            "none".to_string()
        } else {
            self.present_keys.join(", ")
        };
        format!(
            "Your previous response was not valid. Problem: {}. Keys present: {}. \
             Respond with ONLY a JSON object containing: reasoning (non-empty string), \
             action (string), confidence (integer 0-100), risk (LOW|MEDIUM|HIGH), and \
             either a \"plan\" object (when action is propose_plan) or a \"params\" object.",
            self.message, keys
        )
    }
}

/// Extract a JSON object from raw model output.
pub fn extract_json(raw: &str) -> Option<Value> {
    // Direct parse.
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        if value.is_object() {
            return Some(value);
        }
    }

    // Fenced code block.
    if let Some(captures) = FENCED_BLOCK.captures(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(captures[1].trim()) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    // Brace matching from the first `{`.
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &raw[start..start + offset + ch.len_utf8()];
                    return serde_json::from_str::<Value>(candidate)
                        .ok()
                        .filter(Value::is_object);
                }
            }
            _ => {}
        }
    }

    None
}

fn present_keys(value: &Value) -> Vec<String> {
    value
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn str_field(object: &Value, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Parse and validate a raw reply into a [`ModelReply`].
pub fn parse_reply(raw: &str) -> Result<ModelReply, ParseIssue> {
    let Some(value) = extract_json(raw) else {
        return Err(ParseIssue::new("no JSON object found", Vec::new()));
    };
    let keys = present_keys(&value);

    let reasoning = match value.get("reasoning").and_then(Value::as_str) {
        Some(r) if !r.trim().is_empty() => r.to_string(),
        _ => {
            return Err(ParseIssue::new(
                "missing or empty \"reasoning\" string",
                keys,
            ))
        }
    };

    let Some(action) = value.get("action").and_then(Value::as_str) else {
        return Err(ParseIssue::new("missing \"action\" string", keys));
    };
    let action_name = action.to_string();

    let confidence = match value.get("confidence").and_then(Value::as_i64) {
        Some(c) if (0..=100).contains(&c) => c,
        Some(_) => {
            return Err(ParseIssue::new(
                "\"confidence\" must be an integer 0-100",
                keys,
            ))
        }
        None => return Err(ParseIssue::new("missing integer \"confidence\"", keys)),
    };

    let risk = match value.get("risk").and_then(Value::as_str) {
        Some(r) => match RiskLevel::parse(r) {
            Some(risk) => risk,
            None => {
                return Err(ParseIssue::new(
                    "\"risk\" must be one of LOW, MEDIUM, HIGH",
                    keys,
                ))
            }
        },
        None => return Err(ParseIssue::new("missing \"risk\"", keys)),
    };

    let question = value
        .get("question")
        .and_then(Value::as_str)
        .map(String::from);

    let params_object = |value: &Value| -> Map<String, Value> {
        value
            .get("params")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    };

    let action = match action_name.as_str() {
        "propose_plan" => {
            let Some(plan) = value.get("plan").filter(|p| p.is_object()) else {
                return Err(ParseIssue::new(
                    "action \"propose_plan\" requires a \"plan\" object",
                    keys,
                ));
            };
            ModelAction::ProposePlan(PlanProposal {
                goal_understanding: str_field(plan, "goal_understanding"),
                reasoning: str_field(plan, "reasoning"),
                execution_steps: string_list(plan.get("execution_steps")),
                risk_assessment: str_field(plan, "risk_assessment"),
                validation_plan: str_field(plan, "validation_plan"),
                commit_strategy: str_field(plan, "commit_strategy"),
            })
        }
        "ask_user" => {
            let from_params = params_object(&value)
                .get("question")
                .and_then(Value::as_str)
                .map(String::from);
            let Some(question) = from_params.or_else(|| question.clone()) else {
                return Err(ParseIssue::new(
                    "action \"ask_user\" requires a question",
                    keys,
                ));
            };
            ModelAction::AskUser { question }
        }
        _ => {
            if value.get("params").map(Value::is_object) == Some(false) {
                return Err(ParseIssue::new("\"params\" must be an object", keys));
            }
            ModelAction::ToolCall {
                name: action_name,
                params: params_object(&value),
            }
        }
    };

    Ok(ModelReply {
        reasoning,
        confidence,
        risk,
        question,
        action,
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_call_json() -> String {
        json!({
            "reasoning": "inspect before editing",
            "confidence": 85,
            "risk": "LOW",
            "action": "read_file",
            "params": {"path": "src/main.rs"}
        })
        .to_string()
    }

    #[test]
    fn direct_parse_succeeds() {
        let reply = parse_reply(&tool_call_json()).expect("valid");
        match reply.action {
            ModelAction::ToolCall { name, params } => {
                assert_eq!(name, "read_file");
                assert_eq!(params.get("path"), Some(&json!("src/main.rs")));
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn fenced_block_extraction() {
        let wrapped = format!("Here is my answer:\n```json\n{}\n```\nDone.", tool_call_json());
        let reply = parse_reply(&wrapped).expect("valid");
        assert_eq!(reply.confidence, 85);
    }

    #[test]
    fn brace_matching_extraction() {
        let wrapped = format!("I think that {} is what you wanted", tool_call_json());
        let reply = parse_reply(&wrapped).expect("valid");
        assert_eq!(reply.reasoning, "inspect before editing");
    }

    #[test]
    fn brace_matching_ignores_braces_in_strings() {
        let raw = r#"{"reasoning": "use {curly} syntax", "confidence": 50, "risk": "LOW", "action": "read_file", "params": {}}"#;
        let reply = parse_reply(raw).expect("valid");
        assert_eq!(reply.reasoning, "use {curly} syntax");
    }

    #[test]
    fn parsing_twice_yields_same_reply() {
        let raw = tool_call_json();
        let first = parse_reply(&raw).expect("valid");
        let second = parse_reply(&raw).expect("valid");
        assert_eq!(first, second);
    }

    #[test]
    fn propose_plan_requires_plan_object() {
        let raw = json!({
            "reasoning": "plan it",
            "confidence": 70,
            "risk": "MEDIUM",
            "action": "propose_plan"
        })
        .to_string();
        let issue = parse_reply(&raw).expect_err("missing plan");
        assert!(issue.message.contains("plan"));
        assert!(issue.present_keys.contains(&"reasoning".to_string()));
    }

    #[test]
    fn propose_plan_parses_steps() {
        let raw = json!({
            "reasoning": "plan it",
            "confidence": 70,
            "risk": "MEDIUM",
            "action": "propose_plan",
            "plan": {
                "goal_understanding": "build a calculator",
                "reasoning": "simple",
                "execution_steps": ["write file", "test it"],
                "risk_assessment": "low",
                "validation_plan": "run it",
                "commit_strategy": "one commit"
            }
        })
        .to_string();
        let reply = parse_reply(&raw).expect("valid");
        match reply.action {
            ModelAction::ProposePlan(plan) => {
                assert_eq!(plan.execution_steps.len(), 2);
                assert_eq!(plan.goal_understanding, "build a calculator");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn ask_user_takes_question_from_params_or_top_level() {
        let raw = json!({
            "reasoning": "unclear",
            "confidence": 40,
            "risk": "LOW",
            "action": "ask_user",
            "params": {"question": "which file?"}
        })
        .to_string();
        let reply = parse_reply(&raw).expect("valid");
        assert_eq!(
            reply.action,
            ModelAction::AskUser {
                question: "which file?".to_string()
            }
        );

        let raw = json!({
            "reasoning": "unclear",
            "confidence": 40,
            "risk": "LOW",
            "action": "ask_user",
            "question": "which branch?",
            "params": {}
        })
        .to_string();
        let reply = parse_reply(&raw).expect("valid");
        assert_eq!(
            reply.action,
            ModelAction::AskUser {
                question: "which branch?".to_string()
            }
        );
    }

    #[test]
    fn rejects_out_of_range_confidence_and_bad_risk() {
        let raw = json!({
            "reasoning": "x",
            "confidence": 150,
            "risk": "LOW",
            "action": "read_file",
            "params": {}
        })
        .to_string();
        assert!(parse_reply(&raw).is_err());

        let raw = json!({
            "reasoning": "x",
            "confidence": 50,
            "risk": "EXTREME",
            "action": "read_file",
            "params": {}
        })
        .to_string();
        assert!(parse_reply(&raw).is_err());
    }

    #[test]
    fn rejects_empty_reasoning() {
        let raw = json!({
            "reasoning": "  ",
            "confidence": 50,
            "risk": "LOW",
            "action": "read_file",
            "params": {}
        })
        .to_string();
        let issue = parse_reply(&raw).expect_err("empty reasoning");
        assert!(issue.message.contains("reasoning"));
    }

    #[test]
    fn correction_lists_present_keys() {
        let issue = parse_reply(r#"{"action": "read_file"}"#).expect_err("invalid");
        let correction = issue.correction();
        assert!(correction.contains("action"));
        assert!(correction.contains("reasoning"));
    }

    #[test]
    fn no_json_at_all() {
        let issue = parse_reply("I cannot help with that").expect_err("no json");
        assert!(issue.message.contains("no JSON object"));
    }
}
