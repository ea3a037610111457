//! mcp_call - invoke a tool on a connected MCP server.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{ParamKind, Tool, ToolCategory, ToolContext, ToolParam, ToolResult};

pub struct McpCallTool;

#[async_trait]
impl Tool for McpCallTool {
    fn name(&self) -> &str {
        "mcp_call"
    }

    fn description(&self) -> &str {
        "Call a tool provided by a configured MCP server"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execution
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::required("server", ParamKind::String, "MCP server name from Ephraim.md"),
            ToolParam::required("tool", ParamKind::String, "Tool name on that server"),
            ToolParam::optional("arguments", ParamKind::Map, "Arguments object for the tool")
                .with_default(json!({})),
        ]
    }

    async fn run(&self, params: Map<String, Value>, ctx: &ToolContext) -> ToolResult {
        let Some(mcp) = &ctx.mcp else {
            return ToolResult::fail("No MCP servers are connected");
        };

        let server = params
            .get("server")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let tool = params.get("tool").and_then(Value::as_str).unwrap_or_default();
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        match mcp.call_tool(server, tool, arguments).await {
            Ok(rendered) => {
                let mut data = Map::new();
                data.insert("server".to_string(), json!(server));
                data.insert("tool".to_string(), json!(tool));
                data.insert("output".to_string(), json!(rendered));
                ToolResult::ok(data, format!("{server}:{tool} returned {} chars", rendered.len()))
            }
            Err(e) => ToolResult::fail(format!("MCP call failed: {e}")),
        }
    }
}
