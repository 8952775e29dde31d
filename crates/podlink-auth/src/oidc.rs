//! OpenID Connect relying-party support.
//!
//! Implements the authorization-code flow with PKCE against a Solid-OIDC
//! style issuer: discovery, optional dynamic client registration, the
//! authorization redirect, and the token exchange. The WebID of the
//! authenticated principal is read from the token claims.

use crate::error::{AuthError, AuthResult};
use crate::session::{Credentials, TokenRefresher};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default scopes requested from the issuer.
pub const DEFAULT_SCOPE: &str = "openid webid offline_access";

/// Inputs for building one authorization redirect.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub redirect_uri: String,
    pub state: String,
    pub code_challenge: String,
}

/// Inputs for redeeming an authorization code.
#[derive(Debug, Clone)]
pub struct CodeExchange {
    pub code: String,
    pub redirect_uri: String,
    pub code_verifier: String,
}

/// The delegated identity boundary used by the login broker.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Compute the provider URL the browser must visit to grant consent.
    async fn authorization_url(&self, request: &AuthorizationRequest) -> AuthResult<String>;

    /// Exchange an authorization code for credentials bound to a WebID.
    async fn exchange_code(&self, exchange: &CodeExchange) -> AuthResult<Credentials>;
}

/// OIDC client configuration.
#[derive(Debug, Clone, Default)]
pub struct OidcConfig {
    /// Pre-registered client ID (optional).
    pub client_id: Option<String>,
    /// Pre-registered client secret (optional).
    pub client_secret: Option<String>,
    /// Client name sent with dynamic registration.
    pub client_name: Option<String>,
    /// Requested scopes.
    pub scope: Option<String>,
}

/// Subset of the issuer's discovery document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
}

/// Client information (from dynamic registration or config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<u64>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// Turn the token response into session credentials.
    pub fn into_credentials(self) -> AuthResult<Credentials> {
        let web_id = self
            .id_token
            .as_deref()
            .and_then(web_id_from_jwt)
            .or_else(|| web_id_from_jwt(&self.access_token))
            .ok_or_else(|| AuthError::auth_failed("No WebID claim in token response"))?;

        Ok(Credentials {
            web_id,
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token,
            expires_at: None,
            scope: self.scope,
            client_id: None,
        }
        .with_expires_in(self.expires_in))
    }

    /// Credentials renewing `previous`. The identity never changes on refresh.
    pub fn into_refreshed(self, previous: &Credentials) -> Credentials {
        Credentials {
            web_id: previous.web_id.clone(),
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token.or_else(|| previous.refresh_token.clone()),
            expires_at: None,
            scope: self.scope.or_else(|| previous.scope.clone()),
            client_id: previous.client_id.clone(),
        }
        .with_expires_in(self.expires_in)
    }
}

/// Read the WebID from a JWT's claims without verifying the signature.
///
/// Prefers the `webid` claim and falls back to a URI-shaped `sub`.
pub fn web_id_from_jwt(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

    let candidate = claims
        .get("webid")
        .and_then(|v| v.as_str())
        .or_else(|| claims.get("sub").and_then(|v| v.as_str()))?;

    url::Url::parse(candidate)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(|_| candidate.to_string())
}

/// Generate PKCE code verifier.
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Generate PKCE code challenge from verifier.
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate OAuth state parameter.
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Build authorization URL.
pub fn build_auth_url(
    auth_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: Option<&str>,
    state: &str,
    code_challenge: &str,
) -> String {
    let separator = if auth_endpoint.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{}{}response_type=code&client_id={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
        auth_endpoint,
        separator,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state),
        urlencoding::encode(code_challenge),
    );

    if let Some(scope) = scope {
        url.push_str(&format!("&scope={}", urlencoding::encode(scope)));
    }

    url
}

/// OIDC provider bound to one issuer.
pub struct OidcProvider {
    issuer: String,
    config: OidcConfig,
    http: reqwest::Client,
    metadata: RwLock<Option<ProviderMetadata>>,
    /// Dynamically registered clients keyed by redirect URI.
    registered: RwLock<HashMap<String, ClientInfo>>,
}

impl OidcProvider {
    /// Create a provider for an issuer URL.
    pub fn new(issuer: impl Into<String>, config: OidcConfig) -> Self {
        Self::with_client(issuer, config, reqwest::Client::new())
    }

    /// Create a provider that talks to the issuer through the given client.
    pub fn with_client(
        issuer: impl Into<String>,
        config: OidcConfig,
        http: reqwest::Client,
    ) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            config,
            http,
            metadata: RwLock::new(None),
            registered: RwLock::new(HashMap::new()),
        }
    }

    /// Issuer URL without a trailing slash.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn scope(&self) -> &str {
        self.config.scope.as_deref().unwrap_or(DEFAULT_SCOPE)
    }

    /// Fetch (and cache) the issuer's discovery document.
    pub async fn metadata(&self) -> AuthResult<ProviderMetadata> {
        if let Some(metadata) = self.metadata.read().await.clone() {
            return Ok(metadata);
        }

        let url = format!("{}/.well-known/openid-configuration", self.issuer);
        debug!(url = %url, "Discovering OIDC provider");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::discovery(format!("Request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::discovery(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| AuthError::discovery(format!("Invalid discovery document: {e}")))?;

        info!(issuer = %metadata.issuer, "Discovered OIDC provider");
        *self.metadata.write().await = Some(metadata.clone());
        Ok(metadata)
    }

    /// Get client metadata for dynamic registration.
    pub fn client_metadata(&self, redirect_uri: &str) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        metadata.insert(
            "redirect_uris".to_string(),
            serde_json::json!([redirect_uri]),
        );
        metadata.insert(
            "client_name".to_string(),
            serde_json::json!(self.config.client_name.as_deref().unwrap_or("podlink")),
        );
        metadata.insert(
            "grant_types".to_string(),
            serde_json::json!(["authorization_code", "refresh_token"]),
        );
        metadata.insert("response_types".to_string(), serde_json::json!(["code"]));
        metadata.insert("scope".to_string(), serde_json::json!(self.scope()));
        metadata.insert(
            "application_type".to_string(),
            serde_json::json!("native"),
        );

        let auth_method = if self.config.client_secret.is_some() {
            "client_secret_post"
        } else {
            "none"
        };
        metadata.insert(
            "token_endpoint_auth_method".to_string(),
            serde_json::json!(auth_method),
        );

        metadata
    }

    /// Get client information, registering a client if none is configured.
    pub async fn client_info(&self, redirect_uri: &str) -> AuthResult<ClientInfo> {
        if let Some(info) = self.configured_client() {
            return Ok(info);
        }

        if let Some(info) = self.registered.read().await.get(redirect_uri) {
            let expired = info
                .client_secret_expires_at
                .is_some_and(|at| at != 0 && at < now_secs());
            if !expired {
                return Ok(info.clone());
            }
            info!("Registered client secret expired");
        }

        let info = self.register_client(redirect_uri).await?;
        self.registered
            .write()
            .await
            .insert(redirect_uri.to_string(), info.clone());
        Ok(info)
    }

    fn configured_client(&self) -> Option<ClientInfo> {
        self.config.client_id.as_ref().map(|client_id| ClientInfo {
            client_id: client_id.clone(),
            client_secret: self.config.client_secret.clone(),
            client_secret_expires_at: None,
        })
    }

    /// The client that obtained `credentials`, with its secret if one is known.
    async fn issuing_client(&self, credentials: &Credentials) -> AuthResult<ClientInfo> {
        if let Some(info) = self.configured_client() {
            return Ok(info);
        }

        let client_id = credentials
            .client_id
            .as_deref()
            .ok_or_else(|| AuthError::auth_failed("No client recorded for these credentials"))?;
        let client_secret = self
            .registered
            .read()
            .await
            .values()
            .find(|info| info.client_id == client_id)
            .and_then(|info| info.client_secret.clone());

        Ok(ClientInfo {
            client_id: client_id.to_string(),
            client_secret,
            client_secret_expires_at: None,
        })
    }

    async fn register_client(&self, redirect_uri: &str) -> AuthResult<ClientInfo> {
        let metadata = self.metadata().await?;
        let endpoint = metadata.registration_endpoint.ok_or_else(|| {
            AuthError::auth_failed(
                "Issuer does not support dynamic registration and no clientId is configured",
            )
        })?;

        let response = self
            .http
            .post(&endpoint)
            .json(&self.client_metadata(redirect_uri))
            .send()
            .await
            .map_err(|e| AuthError::auth_failed(format!("Registration request failed: {e}")))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AuthError::auth_failed(format!(
                "Client registration failed: {text}"
            )));
        }

        let info: ClientInfo = response
            .json()
            .await
            .map_err(|e| AuthError::auth_failed(format!("Invalid registration response: {e}")))?;

        info!(client_id = %info.client_id, "Registered OIDC client");
        Ok(info)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> AuthResult<TokenResponse> {
        let metadata = self.metadata().await?;

        let response = self
            .http
            .post(&metadata.token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::auth_failed(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AuthError::auth_failed(format!(
                "Token exchange failed: {text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::auth_failed(format!("Invalid token response: {e}")))
    }

    /// Obtain credentials with the client credentials grant.
    pub async fn client_credentials(&self) -> AuthResult<Credentials> {
        let (Some(client_id), Some(client_secret)) = (
            self.config.client_id.as_deref(),
            self.config.client_secret.as_deref(),
        ) else {
            return Err(AuthError::auth_failed(
                "Client credentials login requires clientId and clientSecret",
            ));
        };

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", self.scope()),
        ];

        let mut credentials = self.token_request(&params).await?.into_credentials()?;
        credentials.client_id = Some(client_id.to_string());
        Ok(credentials)
    }
}

#[async_trait]
impl TokenRefresher for OidcProvider {
    async fn refresh(&self, credentials: &Credentials) -> AuthResult<Credentials> {
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::auth_failed("No refresh token available"))?;
        let client = self.issuing_client(credentials).await?;

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
        ];

        if let Some(ref secret) = client.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let tokens = self.token_request(&params).await?;
        debug!(web_id = %credentials.web_id, "Refreshed access token");
        Ok(tokens.into_refreshed(credentials))
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    async fn authorization_url(&self, request: &AuthorizationRequest) -> AuthResult<String> {
        let metadata = self.metadata().await?;
        let client = self.client_info(&request.redirect_uri).await?;

        Ok(build_auth_url(
            &metadata.authorization_endpoint,
            &client.client_id,
            &request.redirect_uri,
            Some(self.scope()),
            &request.state,
            &request.code_challenge,
        ))
    }

    async fn exchange_code(&self, exchange: &CodeExchange) -> AuthResult<Credentials> {
        let client = self.client_info(&exchange.redirect_uri).await?;

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", exchange.code.as_str()),
            ("redirect_uri", exchange.redirect_uri.as_str()),
            ("client_id", client.client_id.as_str()),
            ("code_verifier", exchange.code_verifier.as_str()),
        ];

        if let Some(ref secret) = client.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let mut credentials = self.token_request(&params).await?.into_credentials()?;
        credentials.client_id = Some(client.client_id.clone());
        Ok(credentials)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Build an unsigned JWT carrying the given claims.
    pub(crate) fn fake_jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }

    async fn mount_discovery(server: &MockServer, with_registration: bool) {
        let mut doc = serde_json::json!({
            "issuer": server.uri(),
            "authorization_endpoint": format!("{}/authorize", server.uri()),
            "token_endpoint": format!("{}/token", server.uri()),
        });
        if with_registration {
            doc["registration_endpoint"] = serde_json::json!(format!("{}/register", server.uri()));
        }

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(doc))
            .mount(server)
            .await;
    }

    #[test]
    fn test_generate_code_verifier() {
        let verifier = generate_code_verifier();
        // Base64url encoded 32 bytes = 43 characters
        assert_eq!(verifier.len(), 43);
        assert_ne!(verifier, generate_code_verifier());
    }

    #[test]
    fn test_generate_code_challenge() {
        let verifier = "test_verifier_12345678901234567890";
        let challenge = generate_code_challenge(verifier);
        assert_eq!(challenge.len(), 43);
        assert_eq!(challenge, generate_code_challenge(verifier));
    }

    #[test]
    fn test_code_challenge_rfc7636_vector() {
        assert_eq!(
            generate_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_generate_state_uniqueness() {
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn test_build_auth_url() {
        let url = build_auth_url(
            "https://login.example/authorize",
            "client123",
            "http://127.0.0.1:19876/callback",
            Some("openid webid"),
            "state123",
            "challenge123",
        );

        assert!(url.starts_with("https://login.example/authorize?response_type=code"));
        assert!(url.contains("client_id=client123"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A19876%2Fcallback"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("scope=openid%20webid"));
    }

    #[test]
    fn test_build_auth_url_existing_query() {
        let url = build_auth_url(
            "https://login.example/authorize?tenant=a",
            "client123",
            "http://127.0.0.1/callback",
            None,
            "s",
            "c",
        );
        assert!(url.starts_with("https://login.example/authorize?tenant=a&response_type=code"));
        assert!(!url.contains("scope="));
    }

    #[test]
    fn test_web_id_from_webid_claim() {
        let token = fake_jwt(serde_json::json!({
            "sub": "abc",
            "webid": "https://alice.example/profile/card#me"
        }));
        assert_eq!(
            web_id_from_jwt(&token).as_deref(),
            Some("https://alice.example/profile/card#me")
        );
    }

    #[test]
    fn test_web_id_from_uri_sub() {
        let token = fake_jwt(serde_json::json!({ "sub": "https://bob.example/#me" }));
        assert_eq!(
            web_id_from_jwt(&token).as_deref(),
            Some("https://bob.example/#me")
        );
    }

    #[test]
    fn test_web_id_rejects_opaque_sub() {
        let token = fake_jwt(serde_json::json!({ "sub": "user-42" }));
        assert!(web_id_from_jwt(&token).is_none());
        assert!(web_id_from_jwt("not-a-jwt").is_none());
    }

    #[test]
    fn test_token_response_without_web_id() {
        let response = TokenResponse {
            access_token: "opaque".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_in: None,
            scope: None,
            id_token: None,
        };
        assert!(matches!(
            response.into_credentials(),
            Err(AuthError::AuthFailed(_))
        ));
    }

    #[test]
    fn test_client_metadata() {
        let provider = OidcProvider::new("https://login.example", OidcConfig::default());
        let metadata = provider.client_metadata("http://127.0.0.1:19876/callback");

        assert_eq!(
            metadata["redirect_uris"],
            serde_json::json!(["http://127.0.0.1:19876/callback"])
        );
        assert_eq!(metadata["client_name"], "podlink");
        assert_eq!(metadata["token_endpoint_auth_method"], "none");
    }

    #[test]
    fn test_client_metadata_with_secret() {
        let provider = OidcProvider::new(
            "https://login.example",
            OidcConfig {
                client_id: Some("client123".to_string()),
                client_secret: Some("secret456".to_string()),
                ..Default::default()
            },
        );
        let metadata = provider.client_metadata("http://127.0.0.1/callback");
        assert_eq!(metadata["token_endpoint_auth_method"], "client_secret_post");
    }

    #[test]
    fn test_issuer_trailing_slash_trimmed() {
        let provider = OidcProvider::new("https://login.example/", OidcConfig::default());
        assert_eq!(provider.issuer(), "https://login.example");
    }

    #[tokio::test]
    async fn test_authorization_url_with_configured_client() {
        let server = MockServer::start().await;
        mount_discovery(&server, false).await;

        let provider = OidcProvider::new(
            server.uri(),
            OidcConfig {
                client_id: Some("my-client".to_string()),
                ..Default::default()
            },
        );

        let url = provider
            .authorization_url(&AuthorizationRequest {
                redirect_uri: "http://127.0.0.1:19876/callback".to_string(),
                state: "xyz".to_string(),
                code_challenge: "challenge".to_string(),
            })
            .await
            .unwrap();

        assert!(url.starts_with(&format!("{}/authorize?", server.uri())));
        assert!(url.contains("client_id=my-client"));
        assert!(url.contains("state=xyz"));
    }

    #[tokio::test]
    async fn test_authorization_url_registers_client() {
        let server = MockServer::start().await;
        mount_discovery(&server, true).await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({ "client_id": "dynamic-client" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = OidcProvider::new(server.uri(), OidcConfig::default());
        let request = AuthorizationRequest {
            redirect_uri: "http://127.0.0.1:19876/callback".to_string(),
            state: "s".to_string(),
            code_challenge: "c".to_string(),
        };

        let first = provider.authorization_url(&request).await.unwrap();
        let second = provider.authorization_url(&request).await.unwrap();
        assert!(first.contains("client_id=dynamic-client"));
        assert!(second.contains("client_id=dynamic-client"));
    }

    #[tokio::test]
    async fn test_no_registration_endpoint_without_client_id() {
        let server = MockServer::start().await;
        mount_discovery(&server, false).await;

        let provider = OidcProvider::new(server.uri(), OidcConfig::default());
        let result = provider.client_info("http://127.0.0.1/callback").await;
        assert!(matches!(result, Err(AuthError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_discovery_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = OidcProvider::new(server.uri(), OidcConfig::default());
        assert!(matches!(
            provider.metadata().await,
            Err(AuthError::Discovery(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        mount_discovery(&server, false).await;

        let id_token = fake_jwt(serde_json::json!({
            "webid": "https://alice.example/profile/card#me"
        }));
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("code_verifier=the-verifier"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access123",
                "token_type": "Bearer",
                "expires_in": 3600,
                "id_token": id_token,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OidcProvider::new(
            server.uri(),
            OidcConfig {
                client_id: Some("my-client".to_string()),
                ..Default::default()
            },
        );

        let credentials = provider
            .exchange_code(&CodeExchange {
                code: "the-code".to_string(),
                redirect_uri: "http://127.0.0.1:19876/callback".to_string(),
                code_verifier: "the-verifier".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(credentials.web_id, "https://alice.example/profile/card#me");
        assert_eq!(credentials.access_token, "access123");
        assert!(credentials.expires_at.is_some());
        assert_eq!(credentials.client_id.as_deref(), Some("my-client"));
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let server = MockServer::start().await;
        mount_discovery(&server, false).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let provider = OidcProvider::new(
            server.uri(),
            OidcConfig {
                client_id: Some("my-client".to_string()),
                ..Default::default()
            },
        );

        let err = provider
            .exchange_code(&CodeExchange {
                code: "expired".to_string(),
                redirect_uri: "http://127.0.0.1/callback".to_string(),
                code_verifier: "v".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_client_credentials_grant() {
        let server = MockServer::start().await;
        mount_discovery(&server, false).await;

        let access_token = fake_jwt(serde_json::json!({
            "webid": "https://service.example/profile/card#me"
        }));
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_secret=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": access_token,
                "token_type": "Bearer",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OidcProvider::new(
            server.uri(),
            OidcConfig {
                client_id: Some("svc".to_string()),
                client_secret: Some("s3cret".to_string()),
                ..Default::default()
            },
        );

        let credentials = provider.client_credentials().await.unwrap();
        assert_eq!(credentials.web_id, "https://service.example/profile/card#me");
    }

    #[tokio::test]
    async fn test_client_credentials_requires_secret() {
        let provider = OidcProvider::new(
            "https://login.example",
            OidcConfig {
                client_id: Some("svc".to_string()),
                ..Default::default()
            },
        );
        assert!(provider.client_credentials().await.is_err());
    }

    #[tokio::test]
    async fn test_expired_session_refreshed_through_provider() {
        let server = MockServer::start().await;
        mount_discovery(&server, false).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .and(body_string_contains("client_id=my-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(OidcProvider::new(
            server.uri(),
            OidcConfig {
                client_id: Some("my-client".to_string()),
                ..Default::default()
            },
        ));
        let sessions = SessionHandle::new().with_refresher(provider);

        let version = sessions.reset().await;
        let expired = Credentials {
            refresh_token: Some("refresh-1".to_string()),
            ..Credentials::bearer("https://alice.example/profile/card#me", "access-1")
        }
        .with_expires_in(Some(5));
        sessions.establish(version, expired).await.unwrap();
        assert!(!sessions.current().await.is_logged_in());

        let session = sessions.current_valid().await;
        assert!(session.is_logged_in());
        assert_eq!(session.web_id(), Some("https://alice.example/profile/card#me"));

        let credentials = session.credentials().unwrap();
        assert_eq!(credentials.access_token, "access-2");
        assert_eq!(credentials.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_refresh_uses_registered_client_secret() {
        let server = MockServer::start().await;
        mount_discovery(&server, true).await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "client_id": "dynamic-client",
                "client_secret": "dynamic-secret",
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_id=dynamic-client"))
            .and(body_string_contains("client_secret=dynamic-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "refresh_token": "refresh-2",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OidcProvider::new(server.uri(), OidcConfig::default());
        provider
            .client_info("http://127.0.0.1:19876/callback")
            .await
            .unwrap();

        let previous = Credentials {
            refresh_token: Some("refresh-1".to_string()),
            client_id: Some("dynamic-client".to_string()),
            ..Credentials::bearer("https://alice.example/profile/card#me", "access-1")
        };
        let refreshed = provider.refresh(&previous).await.unwrap();
        assert_eq!(refreshed.access_token, "access-2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(refreshed.client_id.as_deref(), Some("dynamic-client"));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let provider = OidcProvider::new("https://login.example", OidcConfig::default());
        let credentials = Credentials::bearer("https://alice.example/profile/card#me", "a");
        assert!(matches!(
            provider.refresh(&credentials).await,
            Err(AuthError::AuthFailed(_))
        ));
    }
}
