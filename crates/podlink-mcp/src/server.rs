//! MCP tool server.
//!
//! Dispatches `initialize`, `tools/list` and `tools/call` requests to the
//! registered tools. Tool failures never become protocol errors: they are
//! returned as a normal result whose single text block reads
//! `Error: <message>` with `isError` set.

use crate::error::McpResult;
use crate::protocol::{
    CallToolParams, InitializeResult, JsonRpcId, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, McpTool, ServerCapabilities, ServerInfo, ToolCallResult, ToolsCapability,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    PROTOCOL_VERSION,
};
use crate::serve::{McpServerTool, McpToolContext};
use crate::transport::{spawn_writer, Inbound, MessageReader};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// MCP server exposing a fixed set of tools.
pub struct McpServer {
    name: String,
    version: String,
    tools: BTreeMap<String, McpServerTool>,
    context: McpToolContext,
}

impl McpServer {
    /// Create a new server.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools: BTreeMap::new(),
            context: McpToolContext::default(),
        }
    }

    /// Set the context passed to every tool call.
    pub fn with_context(mut self, context: McpToolContext) -> Self {
        self.context = context;
        self
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: McpServerTool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Serve on stdin/stdout until stdin closes.
    pub async fn serve_stdio(self) -> McpResult<()> {
        Arc::new(self)
            .serve(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Serve newline-delimited JSON-RPC until `reader` reaches end of input.
    ///
    /// Each message is handled on its own task, so a slow tool call does not
    /// hold up other requests. Pending calls finish before this returns.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> McpResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!(name = %self.name, tools = self.tools.len(), "MCP server listening");

        let mut reader = MessageReader::new(reader);
        let (sender, writer_task) = spawn_writer(writer);
        let mut in_flight = JoinSet::new();
        let mut read_error = None;

        loop {
            tokio::select! {
                message = reader.next_message() => {
                    let line = match message {
                        Ok(Some(Inbound::Message(line))) => line,
                        Ok(Some(Inbound::InvalidUtf8)) => {
                            let response = JsonRpcResponse::error(
                                None,
                                PARSE_ERROR,
                                "Parse error: message is not valid UTF-8",
                            );
                            if let Err(e) = sender.send(&response).await {
                                warn!(error = %e, "Failed to send response");
                            }
                            continue;
                        }
                        Ok(None) => {
                            info!("Input closed");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to read input");
                            read_error = Some(e);
                            break;
                        }
                    };

                    let server = self.clone();
                    let sender = sender.clone();
                    in_flight.spawn(async move {
                        if let Some(response) = server.handle_message(&line).await {
                            if let Err(e) = sender.send(&response).await {
                                warn!(error = %e, "Failed to send response");
                            }
                        }
                    });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Request handler failed");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Request handler failed");
            }
        }

        drop(sender);
        let written = match writer_task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Writer task failed");
                Ok(())
            }
        };

        match read_error {
            Some(e) => Err(e),
            None => written,
        }
    }

    /// Handle one raw line. Returns `None` for notifications.
    pub async fn handle_message(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to parse message");
                return Some(JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };

        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value::<JsonRpcId>(id.clone()).ok());

        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) if request.jsonrpc == "2.0" => self.handle_request(request).await,
            Ok(_) => Some(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            )),
            Err(e) => Some(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                format!("Invalid Request: {e}"),
            )),
        }
    }

    /// Handle a parsed request. Returns `None` for notifications.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, id = ?request.id, "Handling MCP request");

        // Notifications (no id) don't expect a response
        let Some(id) = request.id else {
            match request.method.as_str() {
                "notifications/initialized" => debug!("Received initialized notification"),
                _ => debug!(method = %request.method, "Received unknown notification"),
            }
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "ping" => JsonRpcResponse::success(Some(id), Value::Object(Default::default())),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, request.params).await,
            method => {
                debug!(method = %method, "Unknown method");
                JsonRpcResponse::error(Some(id), METHOD_NOT_FOUND, "Method not found")
            }
        };
        Some(response)
    }

    fn handle_initialize(&self, id: JsonRpcId) -> JsonRpcResponse {
        info!(name = %self.name, version = %self.version, "Initializing MCP server");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: self.name.clone(),
                version: Some(self.version.clone()),
            },
        };

        to_response(id, &result)
    }

    fn handle_list_tools(&self, id: JsonRpcId) -> JsonRpcResponse {
        debug!(count = self.tools.len(), "Listing MCP tools");

        let tools = self
            .tools
            .values()
            .map(|tool| McpTool {
                name: tool.name.clone(),
                description: Some(tool.description.clone()),
                input_schema: Some(tool.parameters.clone()),
            })
            .collect();

        to_response(id, &ListToolsResult { tools })
    }

    async fn handle_call_tool(&self, id: JsonRpcId, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        Some(id),
                        INVALID_PARAMS,
                        format!("Invalid params: {e}"),
                    );
                }
            },
            None => return JsonRpcResponse::error(Some(id), INVALID_PARAMS, "Missing params"),
        };

        debug!(tool = %params.name, "Calling MCP tool");

        let Some(tool) = self.tools.get(&params.name) else {
            warn!(tool = %params.name, "Unknown tool");
            return to_response(
                id,
                &ToolCallResult::error(format!("Unknown tool: {}", params.name)),
            );
        };

        let args = params
            .arguments
            .unwrap_or(Value::Object(serde_json::Map::new()));
        let executor = tool.executor.clone();
        let context = self.context.clone();

        // A panicking tool must not take the request task down with it.
        let outcome = tokio::spawn(async move { executor.execute(args, &context).await }).await;

        let result = match outcome {
            Ok(Ok(output)) => {
                debug!(tool = %params.name, output_len = output.len(), "Tool completed successfully");
                ToolCallResult::text(output)
            }
            Ok(Err(e)) => {
                warn!(tool = %params.name, error = %e, "Tool failed");
                ToolCallResult::error(e)
            }
            Err(e) => {
                error!(tool = %params.name, error = %e, "Tool panicked");
                ToolCallResult::error(format!("Tool {} failed unexpectedly", params.name))
            }
        };

        to_response(id, &result)
    }
}

fn to_response<T: serde::Serialize>(id: JsonRpcId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(Some(id), value),
        Err(e) => JsonRpcResponse::error(
            Some(id),
            INTERNAL_ERROR,
            format!("Failed to serialize result: {e}"),
        ),
    }
}
