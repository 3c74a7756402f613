use std::collections::HashMap;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use rox_auth::authproviders::AuthProviderConfig;
use rox_auth::m2m::{M2mConfig, M2mConfigType};
use rox_auth::roles::{Mapping, ProviderRoleRules, ResolvedRole};
use rox_auth_server::{AppConfig, build_app, build_state};
use serde_json::{Value, json};
use tower::ServiceExt;

fn config() -> AppConfig {
    AppConfig {
        roles: vec![ResolvedRole::named("ci")],
        providers: vec![AuthProviderConfig {
            id: "ci-tokens".to_string(),
            provider_type: "tokenbased".to_string(),
            name: "CI tokens".to_string(),
            enabled: true,
            ..AuthProviderConfig::default()
        }],
        role_rules: HashMap::from([(
            "ci-tokens".to_string(),
            ProviderRoleRules {
                mappings: Vec::new(),
                default_role: Some("ci".to_string()),
            },
        )]),
        m2m: vec![
            M2mConfig {
                id: "github".to_string(),
                config_type: M2mConfigType::GithubActions,
                token_expiration_duration: Duration::from_secs(300),
                issuer: String::new(),
                mappings: vec![Mapping::new("repository", "github.com/acme/.*", "ci")],
            },
            M2mConfig {
                id: "plain-http".to_string(),
                config_type: M2mConfigType::Generic,
                token_expiration_duration: Duration::from_secs(300),
                issuer: "http://issuer.example".to_string(),
                mappings: Vec::new(),
            },
        ],
        ..AppConfig::default()
    }
}

async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_bootstrap_loads_providers_and_valid_m2m_configs() {
    let state = build_state(&config()).await.unwrap();

    let provider = state.registry.get_provider("ci-tokens").await.unwrap();
    assert_eq!(provider.provider_type(), "tokenbased");
    assert!(provider.backend().is_some());

    assert!(state.exchangers.has_exchanger("github").await);
    // Plain HTTP issuers are rejected and skipped at startup.
    assert!(!state.exchangers.has_exchanger("plain-http").await);
}

#[tokio::test]
async fn test_m2m_exchange_rejects_empty_token() {
    let state = build_state(&config()).await.unwrap();
    let (status, body) = post_json(
        build_app(&state),
        "/v1/auth/m2m/exchange",
        json!({"id_token": ""}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_args");
}

#[tokio::test]
async fn test_login_for_unknown_provider_is_not_found() {
    let state = build_state(&config()).await.unwrap();
    let response = build_app(&state)
        .oneshot(
            Request::get("/sso/providers/login/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
