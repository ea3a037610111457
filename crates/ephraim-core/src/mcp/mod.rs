//! MCP bridge: external tool servers over stdio JSON-RPC.

pub mod client;
pub mod protocol;
pub mod transport;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;

use anyhow::{anyhow, Result};

use crate::config::McpServerConfig;
pub use client::McpConnection;
pub use protocol::McpToolDef;

/// Manager over all configured MCP server connections.
pub struct McpManager {
    connections: RwLock<HashMap<String, Arc<McpConnection>>>,
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl McpManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Connect every configured server. A server that fails to start is
    /// logged and skipped. Returns the number of live connections.
    pub async fn connect_all(&self, servers: &[McpServerConfig], working_dir: &Path) -> usize {
        for config in servers {
            match McpConnection::connect(config, working_dir).await {
                Ok(connection) => {
                    self.connections
                        .write()
                        .await
                        .insert(config.name.clone(), Arc::new(connection));
                }
                Err(e) => {
                    tracing::warn!(server = %config.name, error = %e, "MCP connect failed");
                }
            }
        }
        self.connections.read().await.len()
    }

    /// All tools across servers, as `(server, tool)` pairs.
    pub async fn list_tools(&self) -> Vec<(String, McpToolDef)> {
        let connections = self.connections.read().await;
        let mut tools = Vec::new();
        for (name, connection) in connections.iter() {
            for tool in connection.tools().await {
                tools.push((name.clone(), tool));
            }
        }
        tools.sort_by(|a, b| (&a.0, &a.1.name).cmp(&(&b.0, &b.1.name)));
        tools
    }

    /// Invoke a tool on a named server, rendering the content blocks.
    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> Result<String> {
        let connection = {
            let connections = self.connections.read().await;
            connections
                .get(server)
                .cloned()
                .ok_or_else(|| anyhow!("not connected to MCP server: {server}"))?
        };

        let result = connection.call_tool(tool, arguments).await?;
        if result.is_error {
            return Err(anyhow!("MCP tool '{tool}' failed: {}", result.rendered()));
        }
        Ok(result.rendered())
    }

    /// Connection status for display.
    pub async fn status(&self) -> Value {
        let connections = self.connections.read().await;
        let mut connected = Vec::new();
        for (name, connection) in connections.iter() {
            if connection.is_alive().await {
                connected.push(name.clone());
            }
        }
        connected.sort();
        json!({
            "connected": connected,
            "tools": self.list_tools().await.len(),
        })
    }

    /// Disconnect every server, terminating the subprocesses.
    pub async fn disconnect_all(&self) {
        let mut connections = self.connections.write().await;
        for (name, connection) in connections.drain() {
            tracing::info!(server = %name, "disconnecting MCP server");
            connection.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calling_unknown_server_errors() {
        let manager = McpManager::new();
        let err = manager
            .call_tool("ghost", "anything", Value::Null)
            .await
            .expect_err("no such server");
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn connect_all_skips_unspawnable_servers() {
        let manager = McpManager::new();
        let servers = vec![McpServerConfig {
            name: "broken".to_string(),
            command: "definitely-not-a-real-binary".to_string(),
            args: Vec::new(),
        }];
        let connected = manager.connect_all(&servers, Path::new(".")).await;
        assert_eq!(connected, 0);
        assert!(manager.list_tools().await.is_empty());
    }
}
