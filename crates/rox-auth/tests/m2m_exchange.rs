//! M2M exchange over HTTP with a mocked OIDC issuer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use rox_auth::AuthResult;
use rox_auth::config::M2mSettings;
use rox_auth::error::AuthError;
use rox_auth::http::{M2M_EXCHANGE_PATH, m2m_routes};
use rox_auth::m2m::{
    KubeApi, M2mConfig, M2mConfigType, NetworkVerifierFactory, TokenExchangerSet,
    TokenReviewStatus,
};
use rox_auth::roles::{InMemoryRoleStore, Mapping, ResolvedRole};
use rox_auth::tokens::{IssuerFactory, SigningAlgorithm, SigningKeyPair, TokenOption, TokenSigner};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct NoCluster;

#[async_trait]
impl KubeApi for NoCluster {
    async fn review_token(&self, _token: &str) -> AuthResult<TokenReviewStatus> {
        Err(AuthError::internal("no cluster"))
    }

    async fn service_account_issuer(&self) -> AuthResult<String> {
        Err(AuthError::internal("no cluster"))
    }
}

async fn issuer_server(signer: &TokenSigner) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "authorization_endpoint": format!("{}/authorize", server.uri()),
            "jwks_uri": format!("{}/keys", server.uri()),
            "response_types_supported": ["id_token"]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(signer.jwks()))
        .mount(&server)
        .await;
    server
}

fn id_token(signer: &TokenSigner, issuer: &str, subject: &str, exp_offset: i64) -> String {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    signer
        .encode(&json!({
            "iss": issuer,
            "sub": subject,
            "aud": "whatever-the-workload-chose",
            "iat": now,
            "exp": now + exp_offset
        }))
        .unwrap()
}

async fn setup(issuer: &str) -> (axum::Router, IssuerFactory) {
    let settings = M2mSettings {
        allow_http: true,
        ..M2mSettings::default()
    };
    let issuers = IssuerFactory::new(
        TokenSigner::new(SigningKeyPair::generate_ec().unwrap(), "https://rox/jwt"),
        vec![TokenOption::DefaultTtl(Duration::from_secs(3600))],
    );
    let kube: Arc<dyn KubeApi> = Arc::new(NoCluster);
    let set = TokenExchangerSet::new(
        settings.clone(),
        Arc::new(NetworkVerifierFactory::new(&settings, Arc::clone(&kube)).unwrap()),
        kube,
        issuers.clone(),
        Arc::new(InMemoryRoleStore::with_roles([ResolvedRole::named("ci")])),
    );
    set.upsert(M2mConfig {
        id: "build-bot".to_string(),
        config_type: M2mConfigType::Generic,
        token_expiration_duration: Duration::from_secs(120),
        issuer: issuer.to_string(),
        mappings: vec![Mapping::new("sub", "svc-.*", "ci")],
    })
    .await
    .unwrap();
    (m2m_routes(Arc::new(set)), issuers)
}

async fn exchange(app: axum::Router, id_token: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::post(M2M_EXCHANGE_PATH)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"id_token": id_token}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_exchange_issues_short_lived_token() {
    let external = TokenSigner::new(
        SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap(),
        "unused",
    );
    let server = issuer_server(&external).await;
    let (app, issuers) = setup(&server.uri()).await;

    let raw = id_token(&external, &server.uri(), "svc-deployer", 300);
    let (status, body) = exchange(app, &raw).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let info = issuers
        .validator()
        .validate(body["access_token"].as_str().unwrap())
        .unwrap();
    assert_eq!(info.claims.rox.role_names, ["ci"]);
    assert_eq!(info.claims.aud, ["build-bot"]);
    assert_eq!(info.claims.exp - info.claims.iat, 120);
    assert_eq!(info.claims.rox.name, "generic-svc-deployer");
}

#[tokio::test]
async fn test_unmapped_subject_is_unauthorized() {
    let external = TokenSigner::new(
        SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap(),
        "unused",
    );
    let server = issuer_server(&external).await;
    let (app, _) = setup(&server.uri()).await;

    let raw = id_token(&external, &server.uri(), "human", 300);
    let (status, body) = exchange(app, &raw).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "no_credentials");
}

#[tokio::test]
async fn test_foreign_signature_is_unauthorized() {
    let external = TokenSigner::new(
        SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap(),
        "unused",
    );
    let impostor = TokenSigner::new(
        SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap(),
        "unused",
    );
    let server = issuer_server(&external).await;
    let (app, _) = setup(&server.uri()).await;

    let raw = id_token(&impostor, &server.uri(), "svc-deployer", 300);
    let (status, _) = exchange(app, &raw).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let external = TokenSigner::new(
        SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap(),
        "unused",
    );
    let server = issuer_server(&external).await;
    let (app, _) = setup(&server.uri()).await;

    let raw = id_token(&external, &server.uri(), "svc-deployer", -3600);
    let (status, _) = exchange(app, &raw).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_issuer_is_bad_request() {
    let external = TokenSigner::new(
        SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap(),
        "unused",
    );
    let server = issuer_server(&external).await;
    let (app, _) = setup(&server.uri()).await;

    let raw = id_token(&external, "https://elsewhere.example", "svc-deployer", 300);
    let (status, body) = exchange(app, &raw).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_args");
}
