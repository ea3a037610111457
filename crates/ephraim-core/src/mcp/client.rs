//! Connection to a single MCP tool server.
//!
//! Requests are serialized per connection: a request writes its frame,
//! then blocks for the matching response. Frames without an id are
//! server notifications and are skipped.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use anyhow::{anyhow, Result};

use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, McpToolDef, RpcFrame, RpcNotification,
    RpcRequest, ToolCallParams, ToolCallResult, ToolsListResult, PROTOCOL_VERSION,
};
use super::transport::StdioTransport;
use crate::config::McpServerConfig;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub struct McpConnection {
    name: String,
    transport: StdioTransport,
    next_id: AtomicI64,
    /// Serializes request/response exchanges on this connection.
    request_lock: Mutex<()>,
    tools: RwLock<Vec<McpToolDef>>,
    initialized: RwLock<bool>,
}

impl McpConnection {
    /// Spawn the configured server and perform the initialize handshake.
    pub async fn connect(config: &McpServerConfig, working_dir: &Path) -> Result<Self> {
        let transport =
            StdioTransport::spawn(&config.command, &config.args, &HashMap::new(), working_dir)
                .await?;

        let connection = Self {
            name: config.name.clone(),
            transport,
            next_id: AtomicI64::new(1),
            request_lock: Mutex::new(()),
            tools: RwLock::new(Vec::new()),
            initialized: RwLock::new(false),
        };

        connection.initialize().await?;
        connection.refresh_tools().await?;
        Ok(connection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    /// Initialize handshake. Not reentrant; a second call is a no-op.
    async fn initialize(&self) -> Result<()> {
        {
            let mut initialized = self.initialized.write().await;
            if *initialized {
                return Ok(());
            }
            *initialized = true;
        }

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: "ephraim".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;
        tracing::info!(
            server = %self.name,
            protocol = %result.protocol_version,
            "MCP server initialized"
        );

        self.notify("notifications/initialized", None).await
    }

    /// Re-list the server's tools and cache them.
    pub async fn refresh_tools(&self) -> Result<Vec<McpToolDef>> {
        let result: ToolsListResult = self.request("tools/list", None).await?;
        tracing::info!(server = %self.name, count = result.tools.len(), "MCP tools listed");
        *self.tools.write().await = result.tools.clone();
        Ok(result.tools)
    }

    pub async fn tools(&self) -> Vec<McpToolDef> {
        self.tools.read().await.clone()
    }

    /// Invoke a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: (!arguments.is_null()).then_some(arguments),
        };
        self.request("tools/call", Some(serde_json::to_value(params)?))
            .await
    }

    /// Terminate the server subprocess.
    pub async fn disconnect(&self) {
        self.transport.shutdown().await;
    }

    /// Write one request frame, then block for the matching response.
    async fn request<R: for<'de> serde::Deserialize<'de>>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R> {
        let _guard = self.request_lock.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&RpcRequest::new(id, method, params))?;
        tracing::debug!(server = %self.name, id, method, "mcp request");
        self.transport.send(&frame).await?;

        let value = tokio::time::timeout(REQUEST_TIMEOUT, self.read_response(id))
            .await
            .map_err(|_| {
                anyhow!(
                    "MCP '{}' request '{}' hit the {}s timeout",
                    self.name,
                    method,
                    REQUEST_TIMEOUT.as_secs()
                )
            })??;

        Ok(serde_json::from_value(value)?)
    }

    async fn read_response(&self, id: i64) -> Result<Value> {
        loop {
            let raw = self.transport.receive().await?;
            let frame: RpcFrame = serde_json::from_str(&raw)?;

            match frame.id {
                Some(frame_id) if frame_id == id => {
                    if let Some(error) = frame.error {
                        return Err(anyhow!("MCP error {}: {}", error.code, error.message));
                    }
                    return Ok(frame.result.unwrap_or(Value::Null));
                }
                Some(other) => {
                    tracing::debug!(server = %self.name, id = other, "dropping stale response");
                }
                None => {
                    if let Some(method) = frame.method {
                        tracing::debug!(server = %self.name, %method, "mcp notification");
                    }
                }
            }
        }
    }

    /// Fire-and-forget notification.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let frame = serde_json::to_string(&RpcNotification::new(method, params))?;
        self.transport.send(&frame).await
    }
}
