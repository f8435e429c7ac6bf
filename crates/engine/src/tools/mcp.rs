//! MCP-variant tool backend: proxies a call to an externally supplied MCP
//! client.
//!
//! The MCP wire protocol itself belongs to an external deploy-adapter
//! layer; this module only defines the seam a host implementation plugs
//! into.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::tools::ToolBackend;

/// Minimal contract an MCP client implementation must satisfy to back an
/// [`McpTool`]. The host supplies a concrete implementation; this crate
/// only defines the seam.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        input: &HashMap<String, serde_json::Value>,
    ) -> Result<String>;
}

/// Proxies a tool call through `server/tool` to an [`McpClient`].
pub struct McpTool {
    client: Arc<dyn McpClient>,
    server: String,
    tool: String,
}

impl McpTool {
    pub fn new(client: Arc<dyn McpClient>, server: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            client,
            server: server.into(),
            tool: tool.into(),
        }
    }
}

#[async_trait]
impl ToolBackend for McpTool {
    async fn invoke(&self, input: &HashMap<String, serde_json::Value>) -> Result<String> {
        self.client.call_tool(&self.server, &self.tool, input).await
    }
}
