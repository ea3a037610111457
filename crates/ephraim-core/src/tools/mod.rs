//! Tool interface and registry.
//!
//! Every tool declares a stable name, a category used for phase gating,
//! and an ordered parameter schema. Parameter validation is uniform and
//! happens before a tool body runs.

pub mod implementations;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use crate::agent::subagent::SubAgentSupervisor;
use crate::mcp::McpManager;
use crate::prompter::Prompter;
use crate::recovery::ErrorKind;
use crate::tasks::TaskManager;

/// Default tool execution timeout.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Tool category for phase gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    ReadOnly,
    Execution,
    UserInput,
    Git,
    Ci,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 5] = [
        ToolCategory::ReadOnly,
        ToolCategory::Execution,
        ToolCategory::UserInput,
        ToolCategory::Git,
        ToolCategory::Ci,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::ReadOnly => "read_only",
            ToolCategory::Execution => "execution",
            ToolCategory::UserInput => "user_input",
            ToolCategory::Git => "git",
            ToolCategory::Ci => "ci",
        }
    }

    /// Tools that mutate the environment require an approved plan.
    pub fn requires_approval(&self) -> bool {
        matches!(self, ToolCategory::Execution | ToolCategory::Git)
    }
}

/// Scalar kind of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
    List,
    Map,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
            ParamKind::List => "list",
            ParamKind::Map => "map",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::List => value.is_array(),
            ParamKind::Map => value.is_object(),
        }
    }
}

/// One entry in a tool's ordered parameter schema.
#[derive(Debug, Clone)]
pub struct ToolParam {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<Value>,
}

impl ToolParam {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Structured result returned by every tool.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub success: bool,
    pub data: Map<String, Value>,
    pub summary: String,
    pub detail: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub steps: Vec<String>,
    pub suggestions: Vec<String>,
    /// Merged into the next prompt by the loop.
    pub context_for_next: Map<String, Value>,
}

impl ToolResult {
    pub fn ok(data: Map<String, Value>, summary: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        let error = error.into();
        let kind = crate::recovery::classify_error(&error);
        Self::fail_with(kind, error)
    }

    pub fn fail_with(kind: ErrorKind, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            summary: format!("Error: {error}"),
            error: Some(error),
            error_kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_for_next.insert(key.into(), value);
        self
    }

    /// Serialize for the action log.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("success".to_string(), Value::Bool(self.success));
        map.insert("data".to_string(), Value::Object(self.data.clone()));
        map.insert("summary".to_string(), Value::String(self.summary.clone()));
        if let Some(detail) = &self.detail {
            map.insert("detail".to_string(), Value::String(detail.clone()));
        }
        if let Some(error) = &self.error {
            map.insert("error".to_string(), Value::String(error.clone()));
        }
        if let Some(kind) = self.error_kind {
            map.insert(
                "error_kind".to_string(),
                Value::String(kind.as_str().to_string()),
            );
        }
        if !self.suggestions.is_empty() {
            map.insert(
                "suggestions".to_string(),
                Value::Array(
                    self.suggestions
                        .iter()
                        .map(|s| Value::String(s.clone()))
                        .collect(),
                ),
            );
        }
        map
    }
}

/// Services available to a tool at execution time.
#[derive(Default)]
pub struct ToolContext {
    pub working_dir: std::path::PathBuf,
    pub repo_root: std::path::PathBuf,
    pub prompter: Option<Arc<dyn Prompter>>,
    pub subagents: Option<Arc<SubAgentSupervisor>>,
    pub tasks: Option<Arc<TaskManager>>,
    pub mcp: Option<Arc<McpManager>>,
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
}

impl ToolContext {
    pub fn new(repo_root: std::path::PathBuf) -> Self {
        Self {
            working_dir: repo_root.clone(),
            repo_root,
            ..Default::default()
        }
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn with_subagents(mut self, subagents: Arc<SubAgentSupervisor>) -> Self {
        self.subagents = Some(subagents);
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<TaskManager>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_mcp(mut self, mcp: Arc<McpManager>) -> Self {
        self.mcp = Some(mcp);
        self
    }

    /// Resolve a path relative to the working directory; absolute paths
    /// pass through.
    pub fn resolve_path(&self, path: &str) -> std::path::PathBuf {
        let p = std::path::PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }
}

/// Trait implemented by every tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable tool name (what the model requests).
    fn name(&self) -> &str;

    /// One-line description for the brief.
    fn description(&self) -> &str;

    fn category(&self) -> ToolCategory;

    /// Ordered parameter schema.
    fn parameters(&self) -> Vec<ToolParam>;

    /// Execute with already-validated parameters.
    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult;
}

/// Schema export used when constructing the model's brief.
pub fn tool_schema(tool: &dyn Tool) -> Value {
    json!({
        "name": tool.name(),
        "description": tool.description(),
        "category": tool.category().as_str(),
        "parameters": tool
            .parameters()
            .iter()
            .map(|p| json!({
                "name": p.name,
                "type": p.kind.as_str(),
                "description": p.description,
                "required": p.required,
                "default": p.default.clone().unwrap_or(Value::Null),
            }))
            .collect::<Vec<_>>(),
    })
}

/// Validate parameters against a tool's schema and apply defaults.
/// Missing required parameters, type mismatches and unknown names are
/// all rejected before the tool body runs.
pub fn validate_params(
    schema: &[ToolParam],
    params: &Map<String, Value>,
) -> Result<Map<String, Value>, String> {
    for name in params.keys() {
        if !schema.iter().any(|p| p.name == name.as_str()) {
            return Err(format!("Unknown parameter: {name}"));
        }
    }

    let mut validated = params.clone();
    for param in schema {
        match validated.get(param.name) {
            Some(Value::Null) if !param.required => {}
            Some(value) => {
                if !param.kind.matches(value) {
                    return Err(format!(
                        "Parameter '{}' must be a {}",
                        param.name,
                        param.kind.as_str()
                    ));
                }
            }
            None if param.required => {
                return Err(format!("Missing required parameter: {}", param.name));
            }
            None => {
                if let Some(default) = &param.default {
                    validated.insert(param.name.to_string(), default.clone());
                }
            }
        }
    }

    Ok(validated)
}

/// Process-wide registry mapping tool names to implementations.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name, tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<_> = self.tools.read().await.values().cloned().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    pub async fn list_by_category(&self, category: ToolCategory) -> Vec<Arc<dyn Tool>> {
        self.list()
            .await
            .into_iter()
            .filter(|t| t.category() == category)
            .collect()
    }

    /// Schemas of every tool whose category is in `categories`, sorted by
    /// name so the brief is deterministic.
    pub async fn schemas_for(&self, categories: &[ToolCategory]) -> Vec<Value> {
        self.list()
            .await
            .into_iter()
            .filter(|t| categories.contains(&t.category()))
            .map(|t| tool_schema(t.as_ref()))
            .collect()
    }

    /// Validate parameters and execute a tool under a timeout. An unknown
    /// tool or a validation failure is surfaced as a failed result, never
    /// as a loop-level error.
    pub async fn invoke(
        &self,
        name: &str,
        params: Map<String, Value>,
        ctx: &ToolContext,
    ) -> ToolResult {
        let Some(tool) = self.get(name).await else {
            return ToolResult::fail(format!("Unknown tool: {name}"));
        };

        let validated = match validate_params(&tool.parameters(), &params) {
            Ok(validated) => validated,
            Err(message) => return ToolResult::fail_with(ErrorKind::Validation, message),
        };

        let timeout = ctx.timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT);
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, tool.run(validated, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tool = name, timeout_secs = timeout.as_secs(), "tool timed out");
                ToolResult::fail_with(
                    ErrorKind::Timeout,
                    format!("Tool '{}' hit its {}s timeout", name, timeout.as_secs()),
                )
            }
        };

        tracing::debug!(
            tool = name,
            success = result.success,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "tool finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo a message back"
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::ReadOnly
        }

        fn parameters(&self) -> Vec<ToolParam> {
            vec![
                ToolParam::required("message", ParamKind::String, "text to echo"),
                ToolParam::optional("repeat", ParamKind::Integer, "times to repeat")
                    .with_default(json!(1)),
            ]
        }

        async fn run(&self, params: Map<String, Value>, _ctx: &ToolContext) -> ToolResult {
            let message = params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let repeat = params.get("repeat").and_then(Value::as_i64).unwrap_or(1);
            let mut data = Map::new();
            data.insert("echoed".to_string(), json!(message.repeat(repeat as usize)));
            ToolResult::ok(data, "echoed")
        }
    }

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn invoke_unknown_tool_fails_as_result() {
        let registry = ToolRegistry::new();
        let ctx = ToolContext::default();
        let result = registry.invoke("nope", Map::new(), &ctx).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn invoke_rejects_missing_required_parameter() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        let ctx = ToolContext::default();

        let result = registry.invoke("echo", Map::new(), &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert!(result.error.unwrap().contains("Missing required parameter"));
    }

    #[tokio::test]
    async fn invoke_rejects_type_mismatch_and_unknown_names() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        let ctx = ToolContext::default();

        let result = registry
            .invoke("echo", params(json!({ "message": 5 })), &ctx)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("must be a string"));

        let result = registry
            .invoke("echo", params(json!({ "message": "hi", "volume": 11 })), &ctx)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Unknown parameter"));
    }

    #[tokio::test]
    async fn invoke_applies_defaults() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        let ctx = ToolContext::default();

        let result = registry
            .invoke("echo", params(json!({ "message": "hi" })), &ctx)
            .await;
        assert!(result.success);
        assert_eq!(result.data.get("echoed"), Some(&json!("hi")));
    }

    #[tokio::test]
    async fn schemas_filter_by_category_and_sort_by_name() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let schemas = registry.schemas_for(&[ToolCategory::ReadOnly]).await;
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["name"], "echo");
        assert_eq!(schemas[0]["parameters"][0]["name"], "message");

        let none = registry.schemas_for(&[ToolCategory::Git]).await;
        assert!(none.is_empty());
    }

    #[test]
    fn approval_requirement_covers_mutating_categories() {
        assert!(ToolCategory::Execution.requires_approval());
        assert!(ToolCategory::Git.requires_approval());
        assert!(!ToolCategory::ReadOnly.requires_approval());
        assert!(!ToolCategory::UserInput.requires_approval());
        assert!(!ToolCategory::Ci.requires_approval());
    }

    #[test]
    fn tool_result_map_round_trips_error_kind() {
        let result = ToolResult::fail("pattern not found in file");
        let map = result.to_map();
        assert_eq!(map.get("success"), Some(&Value::Bool(false)));
        assert_eq!(map.get("error_kind"), Some(&json!("validation")));
    }
}
