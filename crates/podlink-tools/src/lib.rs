//! Tool implementations for podlink.
//!
//! This crate provides the tools an assistant can call through the MCP
//! server: remote resource reads through the shared session, arithmetic,
//! and local file access.

pub mod error;
pub mod registry;

// Tool implementations
pub mod calculate;
pub mod list;
pub mod read;
pub mod remote;
pub mod write;

pub use error::{ToolError, ToolResult};
pub use registry::ToolRegistry;

use async_trait::async_trait;
use podlink_auth::SessionHandle;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Context provided to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Directory relative paths resolve against.
    pub cwd: PathBuf,
    /// Shared login session.
    pub sessions: SessionHandle,
}

impl ToolContext {
    /// Create a new tool context.
    pub fn new(cwd: impl Into<PathBuf>, sessions: SessionHandle) -> Self {
        Self {
            cwd: cwd.into(),
            sessions,
        }
    }

    /// Resolve a user-supplied path to an absolute, normalized path.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.cwd.join(path))
        }
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }

    components.iter().collect()
}

/// Result of tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Title/summary of the operation.
    pub title: String,
    /// Output text.
    pub output: String,
    /// Tool-specific metadata.
    pub metadata: Value,
}

impl ToolOutput {
    /// Create a new tool output.
    pub fn new(title: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output: output.into(),
            metadata: Value::Null,
        }
    }

    /// Add metadata to the output.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The main trait for tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool ID.
    fn id(&self) -> &str;

    /// Get the tool description (for the AI).
    fn description(&self) -> &str;

    /// Get the JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput>;
}

/// A boxed tool for dynamic dispatch.
pub type BoxedTool = Arc<dyn Tool>;

/// Read a required string argument.
pub(crate) fn required_str<'a>(args: &'a Value, name: &str) -> ToolResult<&'a str> {
    args[name]
        .as_str()
        .ok_or_else(|| ToolError::validation(format!("{name} is required")))
}
