//! Persistence of auth provider configurations.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::AuthProviderConfig;
use crate::error::{AuthError, AuthResult};

/// Durable storage for provider configurations.
#[async_trait]
pub trait AuthProviderStore: Send + Sync {
    async fn get_auth_provider(&self, id: &str) -> AuthResult<Option<AuthProviderConfig>>;

    async fn get_all_auth_providers(&self) -> AuthResult<Vec<AuthProviderConfig>>;

    /// Adds a new provider.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the ID or the name is taken.
    async fn add_auth_provider(&self, config: &AuthProviderConfig) -> AuthResult<()>;

    /// Replaces a stored provider.
    ///
    /// # Errors
    ///
    /// `NotFound` if the ID is unknown, `AlreadyExists` if another provider
    /// has the same name.
    async fn update_auth_provider(&self, config: &AuthProviderConfig) -> AuthResult<()>;

    /// Removes a provider. With `force`, removing an unknown ID succeeds.
    async fn remove_auth_provider(&self, id: &str, force: bool) -> AuthResult<()>;

    async fn auth_provider_exists_with_name(&self, name: &str) -> AuthResult<bool>;
}

/// Process-local provider store.
#[derive(Debug, Default)]
pub struct InMemoryAuthProviderStore {
    providers: RwLock<HashMap<String, AuthProviderConfig>>,
}

impl InMemoryAuthProviderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn name_taken(
    providers: &HashMap<String, AuthProviderConfig>,
    name: &str,
    except_id: &str,
) -> bool {
    providers
        .values()
        .any(|p| p.id != except_id && p.name == name)
}

#[async_trait]
impl AuthProviderStore for InMemoryAuthProviderStore {
    async fn get_auth_provider(&self, id: &str) -> AuthResult<Option<AuthProviderConfig>> {
        Ok(self.providers.read().await.get(id).cloned())
    }

    async fn get_all_auth_providers(&self) -> AuthResult<Vec<AuthProviderConfig>> {
        let mut all: Vec<_> = self.providers.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn add_auth_provider(&self, config: &AuthProviderConfig) -> AuthResult<()> {
        let mut providers = self.providers.write().await;
        if providers.contains_key(&config.id) {
            return Err(AuthError::already_exists(format!(
                "auth provider with ID {:?}",
                config.id
            )));
        }
        if name_taken(&providers, &config.name, &config.id) {
            return Err(AuthError::already_exists(format!(
                "auth provider with name {:?}",
                config.name
            )));
        }
        providers.insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn update_auth_provider(&self, config: &AuthProviderConfig) -> AuthResult<()> {
        let mut providers = self.providers.write().await;
        if !providers.contains_key(&config.id) {
            return Err(AuthError::not_found(format!(
                "auth provider with ID {:?}",
                config.id
            )));
        }
        if name_taken(&providers, &config.name, &config.id) {
            return Err(AuthError::already_exists(format!(
                "auth provider with name {:?}",
                config.name
            )));
        }
        providers.insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn remove_auth_provider(&self, id: &str, force: bool) -> AuthResult<()> {
        let removed = self.providers.write().await.remove(id);
        if removed.is_none() && !force {
            return Err(AuthError::not_found(format!("auth provider with ID {id:?}")));
        }
        Ok(())
    }

    async fn auth_provider_exists_with_name(&self, name: &str) -> AuthResult<bool> {
        Ok(name_taken(&*self.providers.read().await, name, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: &str, name: &str) -> AuthProviderConfig {
        AuthProviderConfig {
            id: id.into(),
            name: name.into(),
            provider_type: "oidc".into(),
            ..AuthProviderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_name() {
        let store = InMemoryAuthProviderStore::new();
        store.add_auth_provider(&config("a", "Corp")).await.unwrap();
        let err = store.add_auth_provider(&config("b", "Corp")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExists);
        assert!(store.auth_provider_exists_with_name("Corp").await.unwrap());
        assert!(!store.auth_provider_exists_with_name("Other").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let store = InMemoryAuthProviderStore::new();
        let err = store.update_auth_provider(&config("a", "Corp")).await.unwrap_err();
        assert!(err.is_not_found());

        store.add_auth_provider(&config("a", "Corp")).await.unwrap();
        store.update_auth_provider(&config("a", "Corp 2")).await.unwrap();
        let stored = store.get_auth_provider("a").await.unwrap().unwrap();
        assert_eq!(stored.name, "Corp 2");
    }

    #[tokio::test]
    async fn test_remove_force() {
        let store = InMemoryAuthProviderStore::new();
        assert!(store.remove_auth_provider("nope", false).await.unwrap_err().is_not_found());
        store.remove_auth_provider("nope", true).await.unwrap();
    }
}
