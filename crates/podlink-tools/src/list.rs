//! List-directory tool - one line per directory entry.

use crate::{required_str, Tool, ToolContext, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};

/// List the entries of a directory.
pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn id(&self) -> &str {
        "list-directory"
    }

    fn description(&self) -> &str {
        r#"Lists the entries of a directory.

Each entry is printed on its own line as "[DIR] name" or "[FILE] name", sorted by name."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path of the directory to list"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let path = ctx.resolve_path(required_str(&args, "path")?);

        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::from_io(e, &path))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ToolError::from_io(e, &path))?
        {
            // Follow symlinks so a link to a directory lists as one.
            let is_dir = match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) => metadata.is_dir(),
                Err(_) => entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false),
            };
            entries.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
        }
        entries.sort();

        let output = entries
            .iter()
            .map(|(name, is_dir)| {
                if *is_dir {
                    format!("[DIR] {name}")
                } else {
                    format!("[FILE] {name}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(
            ToolOutput::new(path.display().to_string(), output).with_metadata(json!({
                "count": entries.len(),
            })),
        )
    }
}
