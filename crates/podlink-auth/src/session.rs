//! In-process session state.
//!
//! A [`Session`] is immutable once built. Login and logout never mutate a
//! session in place; they install a new one through the [`SessionHandle`],
//! so a reader holding an `Arc<Session>` always sees a consistent snapshot.

use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Seconds before expiry at which a token is treated as expired.
const EXPIRY_BUFFER_SECS: u64 = 60;

/// Credentials bound to an authenticated identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// WebID of the authenticated principal.
    pub web_id: String,
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp when the access token expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Client the tokens were issued to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Credentials {
    /// Create bearer credentials for a WebID.
    pub fn bearer(web_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            web_id: web_id.into(),
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_at: None,
            scope: None,
            client_id: None,
        }
    }

    /// Set the expiry from a relative lifetime in seconds.
    pub fn with_expires_in(mut self, expires_in: Option<u64>) -> Self {
        self.expires_at = expires_in.map(|secs| now_secs() + secs);
        self
    }

    /// Check whether the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now_secs() + EXPIRY_BUFFER_SECS,
            None => false,
        }
    }

    /// True when the access token has expired and a refresh token can renew it.
    pub fn needs_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.is_expired()
    }
}

/// Renews expired credentials.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange the refresh token in `credentials` for a new access token.
    async fn refresh(&self, credentials: &Credentials) -> AuthResult<Credentials>;
}

/// One login outcome plus the fetch capability bound to it.
#[derive(Debug)]
pub struct Session {
    version: u64,
    credentials: Option<Credentials>,
    http: reqwest::Client,
}

impl Session {
    fn unauthenticated(version: u64, http: reqwest::Client) -> Self {
        Self {
            version,
            credentials: None,
            http,
        }
    }

    /// Version of this session object. Every replacement gets a new one.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// True when credentials are present and still valid.
    pub fn is_logged_in(&self) -> bool {
        self.credentials
            .as_ref()
            .is_some_and(|credentials| !credentials.is_expired())
    }

    /// WebID of the authenticated principal, if any.
    pub fn web_id(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.web_id.as_str())
    }

    /// Credentials, if the session was established.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// GET a URI, attaching the bearer token once logged in.
    pub async fn fetch(&self, uri: &str) -> AuthResult<reqwest::Response> {
        let mut request = self.http.get(uri);
        if let Some(credentials) = self.credentials.as_ref().filter(|c| !c.is_expired()) {
            request = request.bearer_auth(&credentials.access_token);
        }

        debug!(uri = %uri, authenticated = self.is_logged_in(), "Fetching resource");
        Ok(request.send().await?)
    }
}

/// Shared, versioned holder of the current session.
#[derive(Clone)]
pub struct SessionHandle {
    current: Arc<RwLock<Arc<Session>>>,
    next_version: Arc<AtomicU64>,
    http: reqwest::Client,
    refresher: Option<Arc<dyn TokenRefresher>>,
    // Serializes refreshes so one expiry triggers one token request.
    refreshing: Arc<Mutex<()>>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("next_version", &self.next_version)
            .field("refresher", &self.refresher.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Create a handle holding a fresh unauthenticated session.
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Create a handle whose sessions fetch through the given client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(Session::unauthenticated(
                0,
                http.clone(),
            )))),
            next_version: Arc::new(AtomicU64::new(1)),
            http,
            refresher: None,
            refreshing: Arc::new(Mutex::new(())),
        }
    }

    /// Renew expired credentials through `refresher` in [`current_valid`](Self::current_valid).
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Snapshot of the current session.
    pub async fn current(&self) -> Arc<Session> {
        self.current.read().await.clone()
    }

    /// Snapshot of the current session, refreshing expired credentials first.
    ///
    /// The refreshed credentials are only installed if no reset happened while
    /// the token request was in flight. A failed refresh is logged and the
    /// expired session is returned.
    pub async fn current_valid(&self) -> Arc<Session> {
        let Some(refresher) = self.refresher.as_ref() else {
            return self.current().await;
        };
        let snapshot = self.current().await;
        if !snapshot.credentials().is_some_and(Credentials::needs_refresh) {
            return snapshot;
        }
        drop(snapshot);

        let _refreshing = self.refreshing.lock().await;
        let session = self.current().await;
        let Some(credentials) = session.credentials().filter(|c| c.needs_refresh()) else {
            return session;
        };

        debug!(
            web_id = %credentials.web_id,
            version = session.version,
            "Refreshing access token"
        );
        match refresher.refresh(credentials).await {
            Ok(fresh) => match self.install(session.version, fresh).await {
                Ok(refreshed) => {
                    info!(version = session.version, "Access token refreshed");
                    refreshed
                }
                Err(e) => {
                    debug!(error = %e, "Discarding refreshed token");
                    self.current().await
                }
            },
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                session
            }
        }
    }

    /// Replace the current session with a fresh unauthenticated one.
    ///
    /// Returns the version of the new session.
    pub async fn reset(&self) -> u64 {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.write().await;
        *current = Arc::new(Session::unauthenticated(version, self.http.clone()));
        debug!(version, "Session reset");
        version
    }

    /// Install credentials for the session created by [`reset`](Self::reset).
    ///
    /// Fails if another reset happened in between.
    pub async fn establish(
        &self,
        version: u64,
        credentials: Credentials,
    ) -> AuthResult<Arc<Session>> {
        let web_id = credentials.web_id.clone();
        let session = self.install(version, credentials).await?;
        info!(web_id = %web_id, version, "Session established");
        Ok(session)
    }

    async fn install(&self, version: u64, credentials: Credentials) -> AuthResult<Arc<Session>> {
        let mut current = self.current.write().await;
        if current.version != version {
            return Err(AuthError::SessionSuperseded);
        }

        let session = Arc::new(Session {
            version,
            credentials: Some(credentials),
            http: self.http.clone(),
        });
        *current = session.clone();
        Ok(session)
    }

    /// Drop any credentials by installing a fresh unauthenticated session.
    pub async fn logout(&self) {
        let was_logged_in = self.current().await.is_logged_in();
        self.reset().await;
        if was_logged_in {
            info!("Logged out");
        }
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
