//! podlink CLI entry point.

use clap::{Parser, Subcommand};
use podlink::bridge;
use podlink::config::{Config, LoginMode};
use podlink_auth::{OidcProvider, SessionHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "podlink")]
#[command(author, version, about = "MCP tool server with Solid OIDC login", long_about = None)]
struct Cli {
    /// Extra config file, merged last
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Start without logging in
    #[arg(long, global = true)]
    no_login: bool,

    /// OIDC issuer URL
    #[arg(long, global = true)]
    issuer: Option<String>,

    /// Loopback port for the login callback
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and serve tools over stdio (default)
    Serve,
    /// Log in once and print the WebID
    Login,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded config.
    fn apply(&self, config: &mut Config) {
        if self.no_login {
            config.login = Some(LoginMode::Disabled);
        }
        if let Some(issuer) = &self.issuer {
            config.issuer = Some(issuer.clone());
        }
        if let Some(port) = self.port {
            config.callback_port = Some(port);
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = Some(log_file.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    let (mut config, sources) = Config::load(Some(&cwd), cli.config.as_deref()).await?;
    cli.apply(&mut config);

    init_logging(cli.verbose, config.log_file.as_deref());
    debug!(?sources, "Loaded configuration");

    let provider = bridge::provider(&config);
    let sessions = bridge::session_handle(&provider);
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config, provider, sessions, cwd).await,
        Commands::Login => login(&config, provider, sessions).await,
    }
}

/// Initialize tracing. stdout carries the MCP transport, so logs go to stderr
/// or to a file.
fn init_logging(verbose: bool, log_file: Option<&Path>) {
    let default = if verbose {
        "podlink=debug,podlink_auth=debug,podlink_tools=debug,podlink_mcp=debug"
    } else {
        "podlink=info,podlink_auth=info,podlink_tools=info,podlink_mcp=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if let Some(path) = log_file {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .init();
                return;
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file {}: {}", path.display(), e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Log in with the configured strategy, then serve tools until EOF or interrupt.
async fn serve(
    config: &Config,
    provider: Arc<OidcProvider>,
    sessions: SessionHandle,
    cwd: PathBuf,
) -> anyhow::Result<()> {
    if let Some(strategy) = bridge::login_strategy(config, provider, sessions.clone()) {
        info!(strategy = strategy.name(), issuer = %config.issuer(), "Starting login");
        tokio::select! {
            result = strategy.login() => bridge::report_login(strategy.name(), &result),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted during login");
                sessions.logout().await;
                return Ok(());
            }
        }
    }

    let server = bridge::build_server(sessions.clone(), &cwd);
    info!(
        cwd = %cwd.display(),
        tools = server.tool_count(),
        logged_in = sessions.current().await.is_logged_in(),
        "Starting MCP server"
    );

    tokio::select! {
        result = server.serve_stdio() => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    sessions.logout().await;
    info!("MCP server stopped");
    Ok(())
}

/// Run the configured login once and report the WebID on stderr.
async fn login(
    config: &Config,
    provider: Arc<OidcProvider>,
    sessions: SessionHandle,
) -> anyhow::Result<()> {
    let Some(strategy) = bridge::login_strategy(config, provider, sessions.clone()) else {
        anyhow::bail!("login is disabled by configuration");
    };

    info!(strategy = strategy.name(), issuer = %config.issuer(), "Starting login");
    let outcome = tokio::select! {
        result = strategy.login() => result?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("login interrupted"),
    };

    eprintln!("Logged in as {}", outcome.web_id);
    sessions.logout().await;
    Ok(())
}
