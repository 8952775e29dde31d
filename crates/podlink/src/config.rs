//! Configuration for podlink.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/podlink/config.json`
//! 2. Environment variable: `PODLINK_CONFIG_CONTENT`
//! 3. Project config: `podlink.jsonc` or `podlink.json` in the working directory
//! 4. An explicit file passed with `--config`
//!
//! Supports JSONC (JSON with comments) and variable substitution:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents

use podlink_auth::{BrokerConfig, OidcConfig, DEFAULT_CALLBACK_PORT, DEFAULT_LOGIN_TIMEOUT};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Issuer used when none is configured.
pub const DEFAULT_ISSUER: &str = "https://login.inrupt.com";

/// Client name sent with dynamic registration when none is configured.
pub const DEFAULT_CLIENT_NAME: &str = "podlink";

/// Environment variable holding inline config content.
pub const CONFIG_CONTENT_ENV: &str = "PODLINK_CONFIG_CONTENT";

static VAR_REGEX: OnceLock<Regex> = OnceLock::new();

fn var_regex() -> &'static Regex {
    VAR_REGEX.get_or_init(|| {
        Regex::new(r"\{(env|file):([^}]+)\}").expect("variable pattern is a valid regex")
    })
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid JSON/JSONC syntax.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// Environment variable not found during substitution.
    #[error("environment variable not found: {name}")]
    EnvVarNotFound { name: String },

    /// File reference not found during substitution.
    #[error("file reference not found: {path}")]
    FileRefNotFound { path: String },

    /// Could not read a config file.
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// How the server establishes its session at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoginMode {
    /// Client credentials when a client ID and secret are configured,
    /// otherwise the browser.
    #[default]
    Auto,
    /// Interactive browser login.
    Browser,
    /// Non-interactive client credentials grant.
    ClientCredentials,
    /// Start unauthenticated.
    #[serde(rename = "none")]
    Disabled,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// OIDC issuer URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Pre-registered client ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Pre-registered client secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Client name for dynamic registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// Requested scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Loopback port for the login callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_port: Option<u16>,

    /// Seconds to wait for the login callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_timeout_secs: Option<u64>,

    /// Login strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginMode>,

    /// Write logs to this file instead of stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Returns the merged config and the files it was read from.
    pub async fn load(
        project_dir: Option<&Path>,
        explicit: Option<&Path>,
    ) -> ConfigResult<(Self, Vec<PathBuf>)> {
        let env_content = std::env::var(CONFIG_CONTENT_ENV).ok();
        Self::load_layers(
            Self::global_config_dir().as_deref(),
            env_content.as_deref(),
            project_dir,
            explicit,
        )
        .await
    }

    /// Load and merge the given layers, later layers winning.
    pub async fn load_layers(
        global_dir: Option<&Path>,
        env_content: Option<&str>,
        project_dir: Option<&Path>,
        explicit: Option<&Path>,
    ) -> ConfigResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        if let Some(dir) = global_dir {
            let path = dir.join("config.json");
            if path.exists() {
                config = config.merge(Self::load_file(&path).await?);
                sources.push(path);
            }
        }

        if let Some(content) = env_content {
            config = config.merge(Self::parse_jsonc(content, "<env>")?);
        }

        if let Some(dir) = project_dir {
            for name in ["podlink.jsonc", "podlink.json"] {
                let path = dir.join(name);
                if path.exists() {
                    config = config.merge(Self::load_file(&path).await?);
                    sources.push(path);
                    break;
                }
            }
        }

        if let Some(path) = explicit {
            config = config.merge(Self::load_file(path).await?);
            sources.push(path.to_path_buf());
        }

        Ok((config, sources))
    }

    /// Get the global config directory.
    ///
    /// On Unix, `~/.config/podlink` is preferred when it exists.
    pub fn global_config_dir() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            if let Some(home) = dirs::home_dir() {
                let xdg_config = home.join(".config").join("podlink");
                if xdg_config.exists() {
                    return Some(xdg_config);
                }
            }
        }

        dirs::config_dir().map(|d| d.join("podlink"))
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let content = Self::substitute_variables(&content, path)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Parse JSONC (JSON with comments).
    pub fn parse_jsonc(content: &str, source: &str) -> ConfigResult<Self> {
        let stripped = strip_comments(content);
        serde_json::from_str(&stripped).map_err(|e| ConfigError::InvalidJson {
            path: source.to_string(),
            message: e.to_string(),
        })
    }

    /// Substitute `{env:NAME}` and `{file:path}` references.
    ///
    /// File references are relative to the config file's directory and are
    /// trimmed.
    pub fn substitute_variables(content: &str, config_path: &Path) -> ConfigResult<String> {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        let mut failure = None;

        let result = var_regex().replace_all(content, |cap: &regex::Captures<'_>| {
            let value = &cap[2];
            let replacement = match &cap[1] {
                "env" => std::env::var(value).map_err(|_| ConfigError::EnvVarNotFound {
                    name: value.to_string(),
                }),
                _ => {
                    let file_path = config_dir.join(value);
                    std::fs::read_to_string(&file_path)
                        .map(|v| v.trim().to_string())
                        .map_err(|_| ConfigError::FileRefNotFound {
                            path: file_path.display().to_string(),
                        })
                }
            };
            match replacement {
                Ok(v) => v,
                Err(e) => {
                    failure.get_or_insert(e);
                    String::new()
                }
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(result.into_owned()),
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(self, other: Self) -> Self {
        Self {
            issuer: merge_option(self.issuer, other.issuer),
            client_id: merge_option(self.client_id, other.client_id),
            client_secret: merge_option(self.client_secret, other.client_secret),
            client_name: merge_option(self.client_name, other.client_name),
            scope: merge_option(self.scope, other.scope),
            callback_port: merge_option(self.callback_port, other.callback_port),
            login_timeout_secs: merge_option(self.login_timeout_secs, other.login_timeout_secs),
            login: merge_option(self.login, other.login),
            log_file: merge_option(self.log_file, other.log_file),
        }
    }

    /// Issuer URL, falling back to [`DEFAULT_ISSUER`].
    pub fn issuer(&self) -> &str {
        self.issuer.as_deref().unwrap_or(DEFAULT_ISSUER)
    }

    /// Whether both a client ID and a client secret are configured.
    pub fn has_client_credentials(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }

    /// The login strategy to run, with `auto` resolved.
    pub fn login_mode(&self) -> LoginMode {
        match self.login.unwrap_or_default() {
            LoginMode::Auto if self.has_client_credentials() => LoginMode::ClientCredentials,
            LoginMode::Auto => LoginMode::Browser,
            mode => mode,
        }
    }

    /// OIDC client settings.
    pub fn oidc_config(&self) -> OidcConfig {
        OidcConfig {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            client_name: Some(
                self.client_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string()),
            ),
            scope: self.scope.clone(),
        }
    }

    /// Loopback broker settings.
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            callback_port: self.callback_port.unwrap_or(DEFAULT_CALLBACK_PORT),
            login_timeout: self
                .login_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_LOGIN_TIMEOUT),
        }
    }
}

/// Strip `//` and `/* */` comments outside of string literals.
///
/// Newlines inside comments are kept so parse errors report the right line.
pub fn strip_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            result.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                result.push(c);
            }
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        result.push('\n');
                    }
                    prev = c;
                }
            }
            _ => result.push(c),
        }
    }

    result
}

fn merge_option<T>(base: Option<T>, other: Option<T>) -> Option<T> {
    other.or(base)
}
