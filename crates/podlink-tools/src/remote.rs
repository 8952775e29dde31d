//! Read-remote-resource tool - fetch a URI through the login session.

use crate::{required_str, Tool, ToolContext, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

/// Text returned when no session has been established.
pub const NOT_AUTHENTICATED: &str = "not authenticated";

/// Fetch a remote resource with the session's credentials.
pub struct ReadRemoteResourceTool;

#[async_trait]
impl Tool for ReadRemoteResourceTool {
    fn id(&self) -> &str {
        "read-remote-resource"
    }

    fn description(&self) -> &str {
        r#"Reads a remote resource using the logged-in identity.

Usage:
- The URI must be an absolute http or https URL.
- Returns the response body as text.
- Returns "not authenticated" if no login has completed."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["uri"],
            "properties": {
                "uri": {
                    "type": "string",
                    "description": "The URI of the resource to read"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput> {
        let uri = required_str(&args, "uri")?;

        let session = ctx.sessions.current_valid().await;
        if !session.is_logged_in() {
            debug!(uri = %uri, "Skipping fetch without a session");
            return Ok(ToolOutput::new("Not authenticated", NOT_AUTHENTICATED));
        }

        let url = Url::parse(uri).map_err(|e| ToolError::validation(format!("Invalid URI: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::validation(format!(
                "Only http and https URIs are supported, got: {}",
                url.scheme()
            )));
        }

        let response = session.fetch(url.as_str()).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::execution_failed(format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("text/plain")
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|e| ToolError::execution_failed(format!("Failed to read response: {e}")))?;

        Ok(ToolOutput::new(format!("Read {url}"), body).with_metadata(json!({
            "contentType": content_type,
            "webId": session.web_id(),
        })))
    }
}
