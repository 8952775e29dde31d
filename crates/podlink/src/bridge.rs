//! Wiring between the login strategies, the tool registry and the MCP server.

use crate::config::{Config, LoginMode};
use async_trait::async_trait;
use podlink_auth::{
    AuthResult, ClientCredentialsLogin, LoginBroker, LoginOutcome, LoginStrategy, OidcProvider,
    SessionHandle,
};
use podlink_mcp::{McpServer, McpServerTool, McpToolContext, McpToolExecutor};
use podlink_tools::{BoxedTool, ToolContext, ToolRegistry};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name the server reports in `initialize`.
pub const SERVER_NAME: &str = "podlink";

/// Runs a podlink tool for the MCP server.
struct ToolExecutorWrapper {
    tool: BoxedTool,
    sessions: SessionHandle,
}

#[async_trait]
impl McpToolExecutor for ToolExecutorWrapper {
    async fn execute(&self, args: Value, ctx: &McpToolContext) -> Result<String, String> {
        let tool_ctx = ToolContext::new(ctx.cwd.clone(), self.sessions.clone());
        debug!(tool = %self.tool.id(), "Executing tool");

        match self.tool.execute(args, &tool_ctx).await {
            Ok(output) => Ok(output.output),
            Err(e) => {
                debug!(tool = %self.tool.id(), error = %e, "Tool failed");
                Err(e.to_string())
            }
        }
    }
}

/// Build an MCP server exposing every built-in tool.
pub fn build_server(sessions: SessionHandle, cwd: impl Into<PathBuf>) -> McpServer {
    let registry = ToolRegistry::with_builtins();
    let mut server = McpServer::new(SERVER_NAME, env!("CARGO_PKG_VERSION"))
        .with_context(McpToolContext { cwd: cwd.into() });

    for tool in registry.all() {
        server.register(McpServerTool {
            name: tool.id().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
            executor: Arc::new(ToolExecutorWrapper {
                tool: tool.clone(),
                sessions: sessions.clone(),
            }),
        });
    }

    server
}

/// The identity provider for the configured issuer.
pub fn provider(config: &Config) -> Arc<OidcProvider> {
    Arc::new(OidcProvider::new(config.issuer(), config.oidc_config()))
}

/// A session handle whose expired tokens are renewed through `provider`.
pub fn session_handle(provider: &Arc<OidcProvider>) -> SessionHandle {
    SessionHandle::new().with_refresher(provider.clone())
}

/// The login strategy selected by the configuration, if any.
pub fn login_strategy(
    config: &Config,
    provider: Arc<OidcProvider>,
    sessions: SessionHandle,
) -> Option<Box<dyn LoginStrategy>> {
    match config.login_mode() {
        LoginMode::Disabled => None,
        LoginMode::ClientCredentials => {
            Some(Box::new(ClientCredentialsLogin::new(provider, sessions)))
        }
        LoginMode::Browser | LoginMode::Auto => Some(Box::new(LoginBroker::new(
            config.broker_config(),
            provider,
            sessions,
        ))),
    }
}

/// Log the outcome of a startup login. Failures leave the server unauthenticated.
pub fn report_login(strategy: &str, result: &AuthResult<LoginOutcome>) {
    match result {
        Ok(outcome) => info!(strategy, web_id = %outcome.web_id, "Logged in"),
        Err(e) => warn!(strategy, error = %e, "Login failed, continuing unauthenticated"),
    }
}
