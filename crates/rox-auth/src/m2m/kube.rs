//! Narrow Kubernetes API access: TokenReview and service account issuer discovery.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::M2mSettings;
use crate::error::{AuthError, AuthResult};

/// User a TokenReview authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReviewedUser {
    pub username: String,
    pub uid: String,
    pub groups: Vec<String>,
    pub extra: HashMap<String, Vec<String>>,
}

/// Status block of a TokenReview response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TokenReviewStatus {
    pub authenticated: bool,
    pub user: Option<ReviewedUser>,
    pub error: String,
}

#[derive(Deserialize)]
struct TokenReviewResponse {
    #[serde(default)]
    status: TokenReviewStatus,
}

#[derive(Deserialize)]
struct IssuerDocument {
    issuer: String,
}

/// Kubernetes API calls the M2M exchange depends on.
#[async_trait]
pub trait KubeApi: Send + Sync {
    /// Submits `token` to the TokenReview API.
    async fn review_token(&self, token: &str) -> AuthResult<TokenReviewStatus>;

    /// Issuer the cluster puts into projected service account tokens.
    async fn service_account_issuer(&self) -> AuthResult<String>;
}

/// In-cluster API client authenticating with the mounted service account token.
pub struct HttpKubeApi {
    http: reqwest::Client,
    api_url: String,
    token_path: PathBuf,
    issuer: OnceCell<String>,
}

impl HttpKubeApi {
    /// # Errors
    /// Returns `Internal` if the CA bundle is unreadable or the client cannot be built.
    pub fn new(settings: &M2mSettings) -> AuthResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(settings.request_timeout);
        if settings.service_account_ca_path.exists() {
            let pem = std::fs::read(&settings.service_account_ca_path).map_err(|e| {
                AuthError::internal(format!(
                    "reading {}: {e}",
                    settings.service_account_ca_path.display()
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| AuthError::internal(format!("parsing cluster CA: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| AuthError::internal(format!("building Kubernetes client: {e}")))?;
        Ok(Self {
            http,
            api_url: settings.kubernetes_api_url.trim_end_matches('/').to_string(),
            token_path: settings.service_account_token_path.clone(),
            issuer: OnceCell::new(),
        })
    }

    /// Read on every call; the kubelet rotates the file.
    async fn bearer(&self) -> AuthResult<String> {
        let token = tokio::fs::read_to_string(&self.token_path)
            .await
            .map_err(|e| {
                AuthError::internal(format!(
                    "reading service account token {}: {e}",
                    self.token_path.display()
                ))
            })?;
        Ok(token.trim().to_string())
    }

    async fn fetch_issuer(&self) -> AuthResult<String> {
        let url = format!("{}/.well-known/openid-configuration", self.api_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await
            .map_err(|e| AuthError::internal(format!("fetching {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::internal(format!(
                "fetching {url}: status {}",
                response.status()
            )));
        }
        let doc: IssuerDocument = response
            .json()
            .await
            .map_err(|e| AuthError::internal(format!("parsing {url}: {e}")))?;
        info!(issuer = %doc.issuer, "Discovered service account issuer");
        Ok(doc.issuer)
    }
}

#[async_trait]
impl KubeApi for HttpKubeApi {
    async fn review_token(&self, token: &str) -> AuthResult<TokenReviewStatus> {
        let url = format!("{}/apis/authentication.k8s.io/v1/tokenreviews", self.api_url);
        let body = json!({
            "apiVersion": "authentication.k8s.io/v1",
            "kind": "TokenReview",
            "spec": { "token": token },
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.bearer().await?)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::internal(format!("creating token review: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::internal(format!(
                "creating token review: status {}",
                response.status()
            )));
        }
        let review: TokenReviewResponse = response
            .json()
            .await
            .map_err(|e| AuthError::internal(format!("parsing token review: {e}")))?;
        debug!(authenticated = review.status.authenticated, "Token review completed");
        Ok(review.status)
    }

    async fn service_account_issuer(&self) -> AuthResult<String> {
        self.issuer
            .get_or_try_init(|| self.fetch_issuer())
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer, token_file: &tempfile::NamedTempFile) -> HttpKubeApi {
        let settings = M2mSettings {
            request_timeout: Duration::from_secs(5),
            kubernetes_api_url: server.uri(),
            service_account_token_path: token_file.path().to_path_buf(),
            service_account_ca_path: PathBuf::from("/nonexistent/ca.crt"),
            ..M2mSettings::default()
        };
        HttpKubeApi::new(&settings).unwrap()
    }

    fn token_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sa-token").unwrap();
        file
    }

    #[tokio::test]
    async fn test_review_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apis/authentication.k8s.io/v1/tokenreviews"))
            .and(header("authorization", "Bearer sa-token"))
            .and(body_partial_json(json!({"spec": {"token": "presented"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": {
                    "authenticated": true,
                    "user": {
                        "username": "system:serviceaccount:ns:robot",
                        "uid": "u-1",
                        "groups": ["system:serviceaccounts"]
                    }
                }
            })))
            .mount(&server)
            .await;

        let file = token_file();
        let status = api(&server, &file).review_token("presented").await.unwrap();
        assert!(status.authenticated);
        let user = status.user.unwrap();
        assert_eq!(user.username, "system:serviceaccount:ns:robot");
        assert_eq!(user.groups, ["system:serviceaccounts"]);
        assert!(user.extra.is_empty());
    }

    #[tokio::test]
    async fn test_issuer_is_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"issuer": "https://kubernetes.default.svc"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let file = token_file();
        let api = api(&server, &file);
        for _ in 0..3 {
            assert_eq!(
                api.service_account_issuer().await.unwrap(),
                "https://kubernetes.default.svc"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_token_file_is_internal() {
        let server = MockServer::start().await;
        let settings = M2mSettings {
            kubernetes_api_url: server.uri(),
            service_account_token_path: PathBuf::from("/nonexistent/token"),
            service_account_ca_path: PathBuf::from("/nonexistent/ca.crt"),
            ..M2mSettings::default()
        };
        let err = HttpKubeApi::new(&settings)
            .unwrap()
            .review_token("x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }
}
