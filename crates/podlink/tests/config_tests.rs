//! Configuration integration tests.
//!
//! Layer order, JSONC handling and substitution across real files.

use podlink::config::{Config, LoginMode, DEFAULT_ISSUER};
use std::fs;
use tempfile::TempDir;

#[tokio::test]
async fn test_load_project_config() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    fs::write(
        temp.path().join("podlink.json"),
        r#"{ "issuer": "https://idp.example", "callbackPort": 4000 }"#,
    )
    .expect("Failed to write config");

    let (config, sources) = Config::load_layers(None, None, Some(temp.path()), None)
        .await
        .expect("Failed to load config");

    assert_eq!(config.issuer(), "https://idp.example");
    assert_eq!(config.callback_port, Some(4000));
    assert_eq!(sources, vec![temp.path().join("podlink.json")]);
}

#[tokio::test]
async fn test_jsonc_preferred_over_json() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    fs::write(
        temp.path().join("podlink.jsonc"),
        r#"{
            // interactive login only
            "login": "browser",
            /* shorter wait
               for tests */
            "loginTimeoutSecs": 30
        }"#,
    )
    .expect("Failed to write config");
    fs::write(temp.path().join("podlink.json"), r#"{ "login": "none" }"#)
        .expect("Failed to write config");

    let (config, sources) = Config::load_layers(None, None, Some(temp.path()), None)
        .await
        .expect("Failed to load config");

    assert_eq!(config.login, Some(LoginMode::Browser));
    assert_eq!(config.login_timeout_secs, Some(30));
    assert_eq!(sources.len(), 1);
}

#[tokio::test]
async fn test_default_config_when_no_file() {
    let temp = TempDir::new().expect("Failed to create temp dir");

    let (config, sources) = Config::load_layers(None, None, Some(temp.path()), None)
        .await
        .expect("Failed to load config");

    assert_eq!(config, Config::default());
    assert_eq!(config.issuer(), DEFAULT_ISSUER);
    assert!(sources.is_empty());
}

#[tokio::test]
async fn test_layer_precedence() {
    let global = TempDir::new().expect("Failed to create temp dir");
    let project = TempDir::new().expect("Failed to create temp dir");
    let extra = TempDir::new().expect("Failed to create temp dir");

    fs::write(
        global.path().join("config.json"),
        r#"{ "issuer": "https://global.example", "clientName": "global", "scope": "openid" }"#,
    )
    .expect("Failed to write config");
    fs::write(
        project.path().join("podlink.json"),
        r#"{ "issuer": "https://project.example", "callbackPort": 5000 }"#,
    )
    .expect("Failed to write config");
    let explicit = extra.path().join("override.json");
    fs::write(&explicit, r#"{ "callbackPort": 6000 }"#).expect("Failed to write config");

    let (config, sources) = Config::load_layers(
        Some(global.path()),
        Some(r#"{ "clientName": "from-env" }"#),
        Some(project.path()),
        Some(&explicit),
    )
    .await
    .expect("Failed to load config");

    assert_eq!(config.issuer.as_deref(), Some("https://project.example"));
    assert_eq!(config.client_name.as_deref(), Some("from-env"));
    assert_eq!(config.scope.as_deref(), Some("openid"));
    assert_eq!(config.callback_port, Some(6000));
    assert_eq!(sources.len(), 3);
    assert_eq!(sources.last(), Some(&explicit));
}

#[tokio::test]
async fn test_file_substitution_in_project_config() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    fs::write(temp.path().join("client-secret"), "  hunter2\n").expect("Failed to write secret");
    fs::write(
        temp.path().join("podlink.json"),
        r#"{ "clientId": "podlink-ci", "clientSecret": "{file:client-secret}" }"#,
    )
    .expect("Failed to write config");

    let (config, _) = Config::load_layers(None, None, Some(temp.path()), None)
        .await
        .expect("Failed to load config");

    assert_eq!(config.client_secret.as_deref(), Some("hunter2"));
    assert_eq!(config.login_mode(), LoginMode::ClientCredentials);
}

#[tokio::test]
async fn test_missing_file_reference_fails() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    fs::write(
        temp.path().join("podlink.json"),
        r#"{ "clientSecret": "{file:does-not-exist}" }"#,
    )
    .expect("Failed to write config");

    let result = Config::load_layers(None, None, Some(temp.path()), None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_invalid_env_content_fails() {
    let result = Config::load_layers(None, Some("{ not json"), None, None).await;
    let err = result.expect_err("invalid env content should fail");
    assert!(err.to_string().contains("<env>"));
}

#[tokio::test]
async fn test_missing_explicit_config_fails() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let missing = temp.path().join("nope.json");

    let result = Config::load_layers(None, None, None, Some(&missing)).await;
    assert!(result.is_err());
}
