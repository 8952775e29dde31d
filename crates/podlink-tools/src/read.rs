//! Read-file tool - read local file contents.

use crate::{required_str, Tool, ToolContext, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// Read a local text file.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn id(&self) -> &str {
        "read-file"
    }

    fn description(&self) -> &str {
        r#"Reads a file from the local filesystem.

Usage:
- Relative paths resolve against the server's working directory.
- Returns the whole file as text."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path of the file to read"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let path = ctx.resolve_path(required_str(&args, "path")?);

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ToolError::from_io(e, &path))?;
        if metadata.is_dir() {
            return Err(ToolError::validation(format!(
                "{} is a directory",
                path.display()
            )));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::from_io(e, &path))?;
        let bytes = content.len();

        debug!(path = %path.display(), bytes, "Read file");

        Ok(
            ToolOutput::new(format!("Read {}", path.display()), content).with_metadata(json!({
                "path": path.display().to_string(),
                "bytes": bytes,
            })),
        )
    }
}
