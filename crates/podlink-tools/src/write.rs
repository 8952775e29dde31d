//! Write-file tool - write file contents.

use crate::{required_str, Tool, ToolContext, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// Write file contents.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn id(&self) -> &str {
        "write-file"
    }

    fn description(&self) -> &str {
        r#"Writes a file to the local filesystem.

Usage:
- This tool will overwrite the existing file if there is one at the provided path.
- The parent directory must already exist."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path", "content"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let path = ctx.resolve_path(required_str(&args, "path")?);
        let content = required_str(&args, "content")?;

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::from_io(e, &path))?;

        debug!(path = %path.display(), bytes = content.len(), "Wrote file");

        Ok(ToolOutput::new(
            format!("Wrote {}", path.display()),
            format!(
                "Successfully wrote {} bytes to {}",
                content.len(),
                path.display()
            ),
        )
        .with_metadata(json!({
            "path": path.display().to_string(),
            "bytes": content.len(),
        })))
    }
}
