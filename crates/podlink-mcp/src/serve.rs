//! Tool registration types for the MCP server.
//!
//! The server does not depend on any tool crate; tools are plugged in as
//! [`McpServerTool`] values carrying an [`McpToolExecutor`].

use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Tool definition for the MCP server.
#[derive(Clone)]
pub struct McpServerTool {
    /// Tool name/ID.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for parameters.
    pub parameters: Value,
    /// Tool executor.
    pub executor: Arc<dyn McpToolExecutor>,
}

impl std::fmt::Debug for McpServerTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServerTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Trait for tool execution.
///
/// `Err` carries the message shown to the client after `Error: `.
#[async_trait::async_trait]
pub trait McpToolExecutor: Send + Sync {
    /// Execute the tool with given arguments.
    async fn execute(&self, args: Value, ctx: &McpToolContext) -> Result<String, String>;
}

/// Context provided to tools during execution.
#[derive(Debug, Clone)]
pub struct McpToolContext {
    /// Working directory.
    pub cwd: PathBuf,
}

impl Default for McpToolContext {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_default(),
        }
    }
}
