//! Login and session management for podlink.
//!
//! This crate owns the authenticated session that tools use to fetch remote
//! resources, and the strategies that establish it:
//! - [`LoginBroker`]: interactive authorization-code login through the
//!   system browser and a loopback callback listener
//! - [`ClientCredentialsLogin`]: non-interactive login with a configured
//!   client ID and secret

pub mod broker;
pub mod client_credentials;
pub mod error;
pub mod oidc;
pub mod session;

pub use broker::{
    BrokerConfig, BrowserLauncher, LoginBroker, LoginState, SystemBrowser, DEFAULT_CALLBACK_PORT,
    DEFAULT_LOGIN_TIMEOUT,
};
pub use client_credentials::ClientCredentialsLogin;
pub use error::{AuthError, AuthResult};
pub use oidc::{IdentityProvider, OidcConfig, OidcProvider};
pub use session::{Credentials, Session, SessionHandle, TokenRefresher};

use async_trait::async_trait;

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    /// WebID of the authenticated principal.
    pub web_id: String,
    /// Version of the session that was established.
    pub version: u64,
}

/// A way of establishing the shared session.
#[async_trait]
pub trait LoginStrategy: Send + Sync {
    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Run the login to completion.
    async fn login(&self) -> AuthResult<LoginOutcome>;
}
