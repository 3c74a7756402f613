use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use rox_auth::authproviders::{
    AuthProviderStore, InMemoryAuthProviderStore, Registry, RegistryPaths,
};
use rox_auth::http::auth_routes;
use rox_auth::m2m::{HttpKubeApi, KubeApi, NetworkVerifierFactory, TokenExchangerSet};
use rox_auth::oidc::{OIDC_TYPE, OidcBackendFactory};
use rox_auth::roles::{InMemoryRoleStore, RoleDataStore, RuleRoleMapperFactory};
use rox_auth::tokenbased::{TYPE_NAME as TOKENBASED_TYPE, TokenBasedFactory};
use rox_auth::tokens::IssuerFactory;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;

/// Shared services behind the HTTP routes.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub exchangers: Arc<TokenExchangerSet>,
    pub role_mappers: RuleRoleMapperFactory,
}

pub struct RoxAuthServer {
    addr: SocketAddr,
    app: Router,
}

/// Wires the role store, provider registry and M2M exchangers from `cfg`.
///
/// Bootstrap M2M configurations that fail to load are logged and skipped.
pub async fn build_state(cfg: &AppConfig) -> anyhow::Result<AppState> {
    let issuers = IssuerFactory::from_config(&cfg.auth).context("loading signing key")?;
    let roles: Arc<dyn RoleDataStore> = Arc::new(InMemoryRoleStore::with_roles(cfg.roles.clone()));

    let role_mappers = RuleRoleMapperFactory::new(Arc::clone(&roles));
    for (provider_id, rules) in &cfg.role_rules {
        role_mappers.set_rules(provider_id.clone(), rules.clone());
    }

    let store = InMemoryAuthProviderStore::new();
    for provider in &cfg.providers {
        store
            .add_auth_provider(provider)
            .await
            .with_context(|| format!("adding auth provider {}", provider.id))?;
    }

    let registry = Registry::new(
        RegistryPaths::from_config(&cfg.auth),
        Arc::new(store),
        issuers.clone(),
        Arc::new(role_mappers.clone()),
    );
    registry
        .register_backend_factory(OIDC_TYPE, OidcBackendFactory::creator(cfg.auth.oidc.clone()))
        .await?;
    registry
        .register_backend_factory(TOKENBASED_TYPE, TokenBasedFactory::creator())
        .await?;
    registry.init().await?;

    let kube: Arc<dyn KubeApi> = Arc::new(HttpKubeApi::new(&cfg.auth.m2m)?);
    let verifiers = NetworkVerifierFactory::new(&cfg.auth.m2m, Arc::clone(&kube))?;
    let exchangers = Arc::new(TokenExchangerSet::new(
        cfg.auth.m2m.clone(),
        Arc::new(verifiers),
        kube,
        issuers,
        roles,
    ));
    for m2m in &cfg.m2m {
        if let Err(e) = exchangers.upsert(m2m.clone()).await {
            tracing::warn!(config_id = %m2m.id, error = %e, "Skipping M2M configuration");
        }
    }

    Ok(AppState {
        registry,
        exchangers,
        role_mappers,
    })
}

pub fn build_app(state: &AppState) -> Router {
    auth_routes(state.registry.clone(), Arc::clone(&state.exchangers)).layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &axum::http::Request<_>| {
                use tracing::field::Empty;
                tracing::info_span!(
                    "http.request",
                    http.method = %req.method(),
                    http.target = %req.uri().path(),
                    http.status_code = Empty,
                )
            })
            .on_response(
                |res: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                    span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                    tracing::info!(
                        http.status = %res.status().as_u16(),
                        elapsed_ms = %latency.as_millis(),
                        "request handled"
                    );
                },
            ),
    )
}

impl RoxAuthServer {
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let state = build_state(cfg).await?;
        Ok(Self {
            addr: cfg.addr(),
            app: build_app(&state),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
