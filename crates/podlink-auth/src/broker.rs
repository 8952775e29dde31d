//! Browser login broker.
//!
//! Runs one authorization-code login through a short-lived loopback HTTP
//! listener. The browser is sent to `/start`, which redirects it to the
//! identity provider; the provider sends it back to `/callback`, where the
//! code is exchanged and the session established. The listener is closed as
//! soon as the callback has been handled, on timeout, or when the login
//! future is dropped.

use crate::error::{AuthError, AuthResult};
use crate::oidc::{
    generate_code_challenge, generate_code_verifier, generate_state, AuthorizationRequest,
    CodeExchange, IdentityProvider,
};
use crate::session::SessionHandle;
use crate::{LoginOutcome, LoginStrategy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Default loopback port for the login listener.
pub const DEFAULT_CALLBACK_PORT: u16 = 19876;

/// Default time to wait for the browser to come back.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Route that begins a login.
pub const START_PATH: &str = "/start";

/// Route the identity provider redirects back to.
pub const CALLBACK_PATH: &str = "/callback";

/// HTML response for successful login.
const HTML_SUCCESS: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>podlink - Login Successful</title>
  <style>
    body { font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; }
    .container { text-align: center; padding: 2rem; }
    h1 { color: #15803d; }
  </style>
</head>
<body>
  <div class="container">
    <h1>Login Successful</h1>
    <p>You may close this window.</p>
  </div>
</body>
</html>"#;

/// HTML response for a failed login.
fn html_error(error: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>podlink - Login Failed</title>
  <style>
    body {{ font-family: system-ui, -apple-system, sans-serif; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; }}
    .container {{ text-align: center; padding: 2rem; }}
    h1 {{ color: #b91c1c; }}
    .error {{ font-family: monospace; margin-top: 1rem; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Login Failed</h1>
    <p>You may close this window.</p>
    <div class="error">{}</div>
  </div>
</body>
</html>"#,
        html_escape(error)
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Observable state of the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Idle,
    ListenerOpen,
    AwaitingCallback,
    Authenticated,
    Failed,
    ListenerClosed,
}

/// Broker settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Loopback port to listen on. `0` lets the OS pick one.
    pub callback_port: u16,
    /// How long to wait for the callback before giving up.
    pub login_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            callback_port: DEFAULT_CALLBACK_PORT,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }
}

/// Opens a URL in a user agent.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> AuthResult<()>;
}

/// Launches the system's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> AuthResult<()> {
        open::that_detached(url).map_err(|e| AuthError::BrowserLaunch(e.to_string()))
    }
}

/// Where one attempt stands between `start` and `callback`.
enum AttemptPhase {
    /// Listener open, `start` not visited yet.
    Waiting,
    /// Redirected to the provider; waiting for the code.
    Pending {
        state: String,
        code_verifier: String,
        version: u64,
    },
    /// The callback was handled.
    Completed,
}

/// One login attempt, shared by the connection handlers.
struct LoginAttempt {
    origin: String,
    provider: Arc<dyn IdentityProvider>,
    sessions: SessionHandle,
    phase: Mutex<AttemptPhase>,
}

impl LoginAttempt {
    fn new(origin: String, provider: Arc<dyn IdentityProvider>, sessions: SessionHandle) -> Self {
        Self {
            origin,
            provider,
            sessions,
            phase: Mutex::new(AttemptPhase::Waiting),
        }
    }

    fn redirect_uri(&self) -> String {
        format!("{}{}", self.origin, CALLBACK_PATH)
    }

    /// Handle `start`: compute the provider URL and install a fresh session.
    ///
    /// Visiting `start` again restarts PKCE and state; only the newest state
    /// is accepted at the callback.
    async fn begin(&self) -> AuthResult<String> {
        let mut phase = self.phase.lock().await;
        if matches!(*phase, AttemptPhase::Completed) {
            return Err(AuthError::AlreadyCompleted);
        }

        let code_verifier = generate_code_verifier();
        let state = generate_state();
        let url = self
            .provider
            .authorization_url(&AuthorizationRequest {
                redirect_uri: self.redirect_uri(),
                state: state.clone(),
                code_challenge: generate_code_challenge(&code_verifier),
            })
            .await?;

        let version = self.sessions.reset().await;
        debug!(version, "Login started, redirecting to identity provider");

        *phase = AttemptPhase::Pending {
            state,
            code_verifier,
            version,
        };
        Ok(url)
    }

    /// Handle `callback` for the given request target (path and query).
    ///
    /// Terminal: whatever the outcome, later calls fail with
    /// [`AuthError::AlreadyCompleted`] and never exchange a second code.
    async fn complete(&self, target: &str) -> AuthResult<LoginOutcome> {
        let mut phase = self.phase.lock().await;
        let (expected_state, code_verifier, version) =
            match std::mem::replace(&mut *phase, AttemptPhase::Completed) {
                AttemptPhase::Completed => return Err(AuthError::AlreadyCompleted),
                AttemptPhase::Waiting => {
                    error!("Callback received before login was started");
                    return Err(AuthError::StateMismatch);
                }
                AttemptPhase::Pending {
                    state,
                    code_verifier,
                    version,
                } => (state, code_verifier, version),
            };

        let url = url::Url::parse(&format!("{}{}", self.origin, target))
            .map_err(|e| AuthError::auth_failed(format!("Invalid callback URL: {e}")))?;
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        debug!(
            has_code = params.contains_key("code"),
            error = ?params.get("error"),
            "Received login callback"
        );

        if params.get("state") != Some(&expected_state) {
            error!("Login callback with missing or unexpected state");
            return Err(AuthError::StateMismatch);
        }

        if let Some(err) = params.get("error") {
            let message = params
                .get("error_description")
                .cloned()
                .unwrap_or_else(|| err.clone());
            return Err(AuthError::provider(message));
        }

        let code = params
            .get("code")
            .ok_or_else(|| AuthError::auth_failed("No authorization code provided"))?;

        let credentials = self
            .provider
            .exchange_code(&CodeExchange {
                code: code.clone(),
                redirect_uri: self.redirect_uri(),
                code_verifier,
            })
            .await?;

        let session = self.sessions.establish(version, credentials).await?;
        let web_id = session.web_id().unwrap_or_default().to_string();
        Ok(LoginOutcome { web_id, version })
    }
}

/// Interactive login through the system browser.
pub struct LoginBroker {
    config: BrokerConfig,
    provider: Arc<dyn IdentityProvider>,
    sessions: SessionHandle,
    launcher: Arc<dyn BrowserLauncher>,
    state: RwLock<LoginState>,
    in_flight: Mutex<()>,
}

impl LoginBroker {
    /// Create a broker that opens the system browser.
    pub fn new(
        config: BrokerConfig,
        provider: Arc<dyn IdentityProvider>,
        sessions: SessionHandle,
    ) -> Self {
        Self::with_launcher(config, provider, sessions, Arc::new(SystemBrowser))
    }

    /// Create a broker with a custom browser launcher.
    pub fn with_launcher(
        config: BrokerConfig,
        provider: Arc<dyn IdentityProvider>,
        sessions: SessionHandle,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            config,
            provider,
            sessions,
            launcher,
            state: RwLock::new(LoginState::Idle),
            in_flight: Mutex::new(()),
        }
    }

    /// Current broker state.
    pub async fn state(&self) -> LoginState {
        *self.state.read().await
    }

    async fn set_state(&self, state: LoginState) {
        debug!(?state, "Login state changed");
        *self.state.write().await = state;
    }

    /// Run one login attempt to completion.
    pub async fn login(&self) -> AuthResult<LoginOutcome> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| AuthError::LoginInProgress)?;

        let port = self.config.callback_port;
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AuthError::PortUnavailable {
                port,
                message: e.to_string(),
            })?;
        let local_port = listener.local_addr()?.port();
        self.set_state(LoginState::ListenerOpen).await;
        info!(port = local_port, "Login listener started");

        let origin = format!("http://127.0.0.1:{local_port}");
        let start_url = format!("{origin}{START_PATH}");
        let attempt = Arc::new(LoginAttempt::new(
            origin,
            self.provider.clone(),
            self.sessions.clone(),
        ));

        if let Err(e) = self.launcher.open(&start_url) {
            warn!(error = %e, url = %start_url, "Open this URL in a browser to log in");
        }
        self.set_state(LoginState::AwaitingCallback).await;

        let result = self.serve(listener, attempt).await;

        match &result {
            Ok(outcome) => {
                info!(web_id = %outcome.web_id, "Login succeeded");
                self.set_state(LoginState::Authenticated).await;
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.set_state(LoginState::Failed).await;
            }
        }
        self.set_state(LoginState::ListenerClosed).await;
        info!(port = local_port, "Login listener closed");

        result
    }

    /// Accept connections until the callback is handled or time runs out.
    ///
    /// The listener is consumed and dropped on return.
    async fn serve(
        &self,
        listener: TcpListener,
        attempt: Arc<LoginAttempt>,
    ) -> AuthResult<LoginOutcome> {
        let (done_tx, mut done_rx) = mpsc::channel::<AuthResult<LoginOutcome>>(1);
        let timeout = self.config.login_timeout;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let attempt = attempt.clone();
                            let done = done_tx.clone();
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, attempt, done).await {
                                    warn!(error = %e, "Error handling login request");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Error accepting connection");
                        }
                    }
                }
                Some(outcome) = done_rx.recv() => {
                    return outcome;
                }
                _ = &mut deadline => {
                    return Err(AuthError::CallbackTimeout(timeout));
                }
            }
        }
    }
}

#[async_trait]
impl LoginStrategy for LoginBroker {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn login(&self) -> AuthResult<LoginOutcome> {
        LoginBroker::login(self).await
    }
}

/// Handle one HTTP connection on the login listener.
async fn handle_connection(
    mut stream: TcpStream,
    attempt: Arc<LoginAttempt>,
    done: mpsc::Sender<AuthResult<LoginOutcome>>,
) -> AuthResult<()> {
    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..n]);

    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();

    if parts.len() < 2 {
        let response = http_response(400, "text/plain", "Bad Request");
        stream.write_all(response.as_bytes()).await?;
        return Ok(());
    }

    let target = parts[1];
    let path = target.split('?').next().unwrap_or("");

    if path.contains("callback") {
        let result = attempt.complete(target).await;
        let response = match &result {
            Ok(_) => http_response(200, "text/html", HTML_SUCCESS),
            Err(e) => http_response(400, "text/html", &html_error(&e.to_string())),
        };
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;

        if !matches!(result, Err(AuthError::AlreadyCompleted)) {
            let _ = done.try_send(result);
        }
    } else if path.contains("start") {
        let response = match attempt.begin().await {
            Ok(location) => http_redirect(&location),
            Err(e) => {
                error!(error = %e, "Could not compute authorization URL");
                http_response(500, "text/html", &html_error(&e.to_string()))
            }
        };
        stream.write_all(response.as_bytes()).await?;
    } else {
        let response = http_response(404, "text/plain", "Not Found");
        stream.write_all(response.as_bytes()).await?;
    }

    Ok(())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Build an HTTP response.
fn http_response(status: u16, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text(status),
        content_type,
        body.len(),
        body
    )
}

/// Build a `302 Found` response.
fn http_redirect(location: &str) -> String {
    format!(
        "HTTP/1.1 302 {}\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status_text(302),
        location
    )
}
