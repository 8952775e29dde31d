//! Model Context Protocol (MCP) server for podlink.
//!
//! Serves a fixed set of tools to an MCP client over newline-delimited
//! JSON-RPC on stdio.

pub mod error;
pub mod protocol;
pub mod serve;
pub mod server;
pub mod transport;

pub use error::{McpError, McpResult};
pub use protocol::{JsonRpcId, JsonRpcRequest, JsonRpcResponse, ToolCallResult, ToolContent};
pub use serve::{McpServerTool, McpToolContext, McpToolExecutor};
pub use server::McpServer;
