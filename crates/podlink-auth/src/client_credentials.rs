//! Non-interactive login with pre-registered client credentials.

use crate::error::AuthResult;
use crate::oidc::OidcProvider;
use crate::session::SessionHandle;
use crate::{LoginOutcome, LoginStrategy};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Establishes a session with the client credentials grant, no browser.
pub struct ClientCredentialsLogin {
    provider: Arc<OidcProvider>,
    sessions: SessionHandle,
}

impl ClientCredentialsLogin {
    pub fn new(provider: Arc<OidcProvider>, sessions: SessionHandle) -> Self {
        Self { provider, sessions }
    }
}

#[async_trait]
impl LoginStrategy for ClientCredentialsLogin {
    fn name(&self) -> &'static str {
        "client-credentials"
    }

    async fn login(&self) -> AuthResult<LoginOutcome> {
        let version = self.sessions.reset().await;
        info!(issuer = %self.provider.issuer(), "Requesting client credentials token");

        let credentials = self.provider.client_credentials().await?;
        let session = self.sessions.establish(version, credentials).await?;

        Ok(LoginOutcome {
            web_id: session.web_id().unwrap_or_default().to_string(),
            version,
        })
    }
}
