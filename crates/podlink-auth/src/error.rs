//! Authentication error types.

use thiserror::Error;

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur while logging in or using a session.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The loopback callback port could not be bound.
    #[error("Callback port {port} is unavailable: {message}")]
    PortUnavailable { port: u16, message: String },

    /// Another login attempt is still outstanding.
    #[error("A login attempt is already in progress")]
    LoginInProgress,

    /// The callback for this login attempt was already handled.
    #[error("This login attempt has already completed")]
    AlreadyCompleted,

    /// The browser never came back to the callback route.
    #[error("Login timed out after {0:?} waiting for the browser callback")]
    CallbackTimeout(std::time::Duration),

    /// The callback carried a missing or unexpected state parameter.
    #[error("OAuth state mismatch - potential CSRF attack")]
    StateMismatch,

    /// The identity provider reported an error on the redirect.
    #[error("Identity provider error: {0}")]
    Provider(String),

    /// Provider metadata could not be discovered.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Authentication failed (token exchange, registration, claims).
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A newer login attempt replaced the session this exchange belonged to.
    #[error("Session was superseded by a newer login attempt")]
    SessionSuperseded,

    /// The system browser could not be opened.
    #[error("Failed to open browser: {0}")]
    BrowserLaunch(String),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    /// Create an authentication failed error.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed(message.into())
    }

    /// Create a discovery error.
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery(message.into())
    }

    /// Create a provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }
}
