//! Adapter factory and cache.
//!
//! `get_adapter(user, provider, role?)` returns a live adapter, building it
//! at most once per cache key: lookups are lock-free, and a cache miss for
//! the same key is serialized by a per-key single-flight guard so
//! concurrent callers share one construction. Cached-but-disconnected
//! adapters get one reconnect attempt before being evicted and rebuilt.
//!
//! Credentials are resolved here, before construction: OAuth tokens are
//! refreshed (and persisted) when inside the expiry buffer, API keys come
//! from the provider config table, and per-role stores receive their
//! `{role_id, db_path}` pair.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use tandem_adapters::{
    Adapter, AuthRequirement, CreateContext, ProviderRegistry, ProviderScope, Transport,
};
use tandem_auth::{InstalledAppCredentials, TokenService, prepare_user_dir};
use tandem_store::ProviderConfigStore;

use crate::error::{AgentError, Result};

/// Directory and credential settings for adapter construction.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Base directory for subprocess working directories.
    pub work_root: PathBuf,
    /// Directory holding per-role memory graph files.
    pub memory_root: PathBuf,
    /// Installed-app OAuth client, for Google subprocess providers.
    pub google: Option<InstalledAppCredentials>,
}

/// The adapter cache. One instance per process.
pub struct AdapterFactory {
    registry: ProviderRegistry,
    tokens: Arc<TokenService>,
    provider_configs: ProviderConfigStore,
    config: FactoryConfig,
    cache: DashMap<String, Arc<dyn Adapter>>,
    /// Per-key construction guards (single-flight).
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl AdapterFactory {
    pub fn new(
        registry: ProviderRegistry,
        tokens: Arc<TokenService>,
        provider_configs: ProviderConfigStore,
        config: FactoryConfig,
    ) -> Self {
        Self {
            registry,
            tokens,
            provider_configs,
            config,
            cache: DashMap::new(),
            inflight: DashMap::new(),
        }
    }

    /// The registry this factory constructs from.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Compute the cache key for (user, provider, role?, account?). The
    /// role segment only participates for per-role providers.
    fn cache_key(
        &self,
        user_id: &str,
        provider_key: &str,
        role_id: Option<&str>,
        account: Option<&str>,
    ) -> String {
        let scope = self
            .registry
            .descriptor(provider_key)
            .map(|d| d.scope)
            .unwrap_or(ProviderScope::Global);
        let role_part = match scope {
            ProviderScope::PerRole => role_id.unwrap_or(""),
            _ => "",
        };
        let account_part = match scope {
            ProviderScope::PerAccount => account.unwrap_or(""),
            _ => "",
        };
        format!("{user_id}|{provider_key}|{role_part}|{account_part}")
    }

    /// Return a live adapter for (user, provider, role?), constructing and
    /// caching one if needed.
    pub async fn get_adapter(
        &self,
        user_id: &str,
        provider_key: &str,
        role_id: Option<&str>,
    ) -> Result<Arc<dyn Adapter>> {
        self.get_adapter_for_account(user_id, provider_key, role_id, None)
            .await
    }

    /// As [`Self::get_adapter`], pinned to a specific account email for
    /// per-account providers.
    #[instrument(skip(self))]
    pub async fn get_adapter_for_account(
        &self,
        user_id: &str,
        provider_key: &str,
        role_id: Option<&str>,
        account: Option<&str>,
    ) -> Result<Arc<dyn Adapter>> {
        let key = self.cache_key(user_id, provider_key, role_id, account);

        // Fast path: cached and connected.
        if let Some(adapter) = self.lookup_usable(&key).await {
            return Ok(adapter);
        }

        // Slow path: serialize construction per key.
        let guard = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _held = guard.lock().await;

        // Re-check under the guard — another caller may have just built it.
        if let Some(adapter) = self.lookup_usable(&key).await {
            return Ok(adapter);
        }

        let adapter = self
            .build(user_id, provider_key, role_id, account)
            .await?;
        self.cache.insert(key.clone(), Arc::clone(&adapter));
        self.inflight.remove(&key);
        info!(provider = provider_key, user = user_id, "adapter cached");
        Ok(adapter)
    }

    /// Cached adapter if connected; one reconnect attempt otherwise, with
    /// eviction on failure.
    async fn lookup_usable(&self, key: &str) -> Option<Arc<dyn Adapter>> {
        let adapter = self.cache.get(key).map(|e| Arc::clone(e.value()))?;
        if adapter.is_connected().await {
            return Some(adapter);
        }

        debug!(key, "cached adapter disconnected; attempting reconnect");
        match adapter.reconnect().await {
            Ok(()) => Some(adapter),
            Err(e) => {
                warn!(key, error = %e, "reconnect failed; evicting");
                self.cache.remove(key);
                None
            }
        }
    }

    /// Resolve credentials, construct through the registry, and connect.
    async fn build(
        &self,
        user_id: &str,
        provider_key: &str,
        role_id: Option<&str>,
        account: Option<&str>,
    ) -> Result<Arc<dyn Adapter>> {
        let descriptor = self.registry.descriptor(provider_key)?;

        // 1. Credential material.
        let mut token_data = match descriptor.auth {
            AuthRequirement::OauthGoogle => {
                let token = self
                    .tokens
                    .fresh_token(user_id, provider_key, account)
                    .await?;
                json!({
                    "access_token": token.access_token,
                    "account_email": token.account_email,
                    "expires_at": token.expires_at,
                })
            }
            AuthRequirement::ApiKey => {
                let api_key = self
                    .provider_configs
                    .api_key(user_id, provider_key)
                    .await?
                    .ok_or_else(|| AgentError::AuthRequired {
                        provider: provider_key.to_string(),
                    })?;
                json!({ "api_key": api_key })
            }
            AuthRequirement::None => json!({}),
        };

        // 2. Per-role stores get their isolated database path.
        if descriptor.scope == ProviderScope::PerRole {
            let role = role_id.ok_or_else(|| AgentError::Validation {
                reason: format!("provider `{provider_key}` requires a role"),
            })?;
            token_data["role_id"] = json!(role);
            token_data["db_path"] = json!(
                self.config
                    .memory_root
                    .join(format!("{provider_key}_{role}.db"))
                    .display()
                    .to_string()
            );
        }

        // 3. Prepared working directory for subprocess providers (with the
        //    installed-app credentials file for Google ones).
        let workdir = if descriptor.transport == Transport::Subprocess {
            let credentials = match descriptor.auth {
                AuthRequirement::OauthGoogle => self.config.google.as_ref(),
                _ => None,
            };
            Some(
                prepare_user_dir(
                    &self.config.work_root,
                    user_id,
                    provider_key,
                    descriptor.credentials_file.as_deref(),
                    credentials,
                )
                .await
                .map_err(|e| AgentError::AdapterFailed {
                    provider: provider_key.to_string(),
                    reason: e.to_string(),
                })?,
            )
        } else {
            None
        };

        // 4. Construct and connect.
        let adapter = self
            .registry
            .create(
                provider_key,
                CreateContext {
                    user_id: user_id.to_string(),
                    role_id: role_id.map(str::to_string),
                    token_data,
                    workdir,
                },
            )
            .await
            .map_err(|e| AgentError::AdapterFailed {
                provider: provider_key.to_string(),
                reason: e.to_string(),
            })?;

        adapter
            .connect()
            .await
            .map_err(|e| AgentError::AdapterFailed {
                provider: provider_key.to_string(),
                reason: e.to_string(),
            })?;

        Ok(adapter)
    }

    /// Close and evict one adapter. Closing always removes the mapping.
    pub async fn close_adapter(
        &self,
        user_id: &str,
        provider_key: &str,
        role_id: Option<&str>,
        account: Option<&str>,
    ) {
        let key = self.cache_key(user_id, provider_key, role_id, account);
        if let Some((_, adapter)) = self.cache.remove(&key) {
            if let Err(e) = adapter.close().await {
                warn!(key, error = %e, "adapter close failed");
            }
        }
    }

    /// Close and evict every adapter owned by `user_id` (logout).
    pub async fn close_user(&self, user_id: &str) {
        let prefix = format!("{user_id}|");
        let keys: Vec<String> = self
            .cache
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.key().clone())
            .collect();

        for key in keys {
            if let Some((_, adapter)) = self.cache.remove(&key) {
                if let Err(e) = adapter.close().await {
                    warn!(key, error = %e, "adapter close failed");
                }
            }
        }
        info!(user = user_id, "user adapters closed");
    }

    /// Snapshot of all live adapters, for catalog refresh.
    pub fn live_adapters(&self) -> Vec<Arc<dyn Adapter>> {
        self.cache.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Number of cached adapters.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tandem_adapters::{
        AuthRequirement, InProcessAdapter, ProviderDescriptor, Visibility,
    };
    use tandem_auth::{RefreshedToken, TokenRefresher};
    use tandem_store::{Database, OAuthToken, TokenStore, UserStore};

    struct NoRefresh;

    #[async_trait]
    impl TokenRefresher for NoRefresh {
        async fn refresh(
            &self,
            provider: &str,
            _refresh_token: &str,
        ) -> tandem_auth::Result<RefreshedToken> {
            Err(tandem_auth::AuthError::RefreshFailed {
                provider: provider.to_string(),
                reason: "refresh not expected in this test".into(),
            })
        }
    }

    fn in_process_descriptor(key: &str, auth: AuthRequirement, scope: ProviderScope) -> ProviderDescriptor {
        ProviderDescriptor {
            key: key.into(),
            display_name: key.into(),
            transport: Transport::InProcess,
            command: Vec::new(),
            auth,
            visibility: Visibility::UserVisible,
            scope,
            credentials_file: None,
        }
    }

    async fn factory_with(
        registry: ProviderRegistry,
    ) -> (AdapterFactory, TokenStore, ProviderConfigStore, tempfile::TempDir) {
        let db = Database::metadata_in_memory().await.unwrap();
        UserStore::new(db.clone()).ensure("u1", "u1").await.unwrap();

        let tokens = TokenStore::new(db.clone());
        let provider_configs = ProviderConfigStore::new(db);
        let dir = tempfile::tempdir().unwrap();
        let config = FactoryConfig {
            work_root: dir.path().join("work"),
            memory_root: dir.path().join("memory"),
            google: None,
        };
        std::fs::create_dir_all(&config.memory_root).unwrap();

        let factory = AdapterFactory::new(
            registry,
            Arc::new(TokenService::new(tokens.clone(), Box::new(NoRefresh))),
            provider_configs.clone(),
            config,
        );
        (factory, tokens, provider_configs, dir)
    }

    fn counting_registry(counter: Arc<AtomicU32>) -> ProviderRegistry {
        let registry = ProviderRegistry::new();
        registry.register_in_process(
            in_process_descriptor("demo", AuthRequirement::None, ProviderScope::Global),
            Arc::new(move |_ctx| {
                let counter = Arc::clone(&counter);
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(InProcessAdapter::builder("demo").build()) as Arc<dyn Adapter>)
                })
            }),
        );
        registry
    }

    #[tokio::test]
    async fn cache_hit_returns_same_instance() {
        let constructed = Arc::new(AtomicU32::new(0));
        let (factory, _, _, _dir) = factory_with(counting_registry(Arc::clone(&constructed))).await;

        let a = factory.get_adapter("u1", "demo", None).await.unwrap();
        let b = factory.get_adapter("u1", "demo", None).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert_eq!(factory.cached_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_construct_once() {
        let constructed = Arc::new(AtomicU32::new(0));
        let (factory, _, _, _dir) = factory_with(counting_registry(Arc::clone(&constructed))).await;
        let factory = Arc::new(factory);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let factory = Arc::clone(&factory);
            handles.push(tokio::spawn(async move {
                factory.get_adapter("u1", "demo", None).await.unwrap()
            }));
        }
        let adapters: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        for other in &adapters[1..] {
            assert!(Arc::ptr_eq(&adapters[0], other));
        }
    }

    #[tokio::test]
    async fn api_key_provider_requires_config() {
        let registry = ProviderRegistry::new();
        registry.register_in_process(
            in_process_descriptor("alpha_vantage", AuthRequirement::ApiKey, ProviderScope::Global),
            Arc::new(|ctx| {
                Box::pin(async move {
                    assert_eq!(ctx.token_data["api_key"], "k-1");
                    Ok(Arc::new(InProcessAdapter::builder("alpha_vantage").build())
                        as Arc<dyn Adapter>)
                })
            }),
        );
        let (factory, _, provider_configs, _dir) = factory_with(registry).await;

        let result = factory.get_adapter("u1", "alpha_vantage", None).await;
        assert!(matches!(result, Err(AgentError::AuthRequired { .. })));

        provider_configs
            .upsert("u1", "alpha_vantage", &serde_json::json!({"api_key": "k-1"}))
            .await
            .unwrap();
        factory.get_adapter("u1", "alpha_vantage", None).await.unwrap();
    }

    #[tokio::test]
    async fn oauth_provider_receives_fresh_token() {
        let registry = ProviderRegistry::new();
        registry.register_in_process(
            in_process_descriptor("gmail", AuthRequirement::OauthGoogle, ProviderScope::PerAccount),
            Arc::new(|ctx| {
                Box::pin(async move {
                    assert_eq!(ctx.token_data["access_token"], "at-1");
                    assert_eq!(ctx.token_data["account_email"], "a@example.com");
                    Ok(Arc::new(InProcessAdapter::builder("gmail").build()) as Arc<dyn Adapter>)
                })
            }),
        );
        let (factory, tokens, _, _dir) = factory_with(registry).await;

        // Missing token surfaces as AuthRequired with the provider key.
        let result = factory.get_adapter("u1", "gmail", None).await;
        match result {
            Err(AgentError::AuthRequired { provider }) => assert_eq!(provider, "gmail"),
            Ok(_) => panic!("unexpected: Ok"),
            Err(other) => panic!("unexpected: {other:?}"),
        }

        tokens
            .upsert(&OAuthToken {
                user_id: "u1".into(),
                provider: "gmail".into(),
                account_email: "a@example.com".into(),
                access_token: "at-1".into(),
                refresh_token: Some("rt".into()),
                expires_at: Some(chrono::Utc::now().timestamp() + 3600),
                updated_at: 0,
            })
            .await
            .unwrap();
        factory.get_adapter("u1", "gmail", None).await.unwrap();
    }

    #[tokio::test]
    async fn per_role_provider_gets_role_and_db_path() {
        let registry = ProviderRegistry::new();
        registry.register_in_process(
            in_process_descriptor("memory", AuthRequirement::None, ProviderScope::PerRole),
            Arc::new(|ctx| {
                Box::pin(async move {
                    assert_eq!(ctx.token_data["role_id"], "r1");
                    let path = ctx.token_data["db_path"].as_str().unwrap();
                    assert!(path.contains("memory_r1.db"));
                    Ok(Arc::new(InProcessAdapter::builder("memory").build()) as Arc<dyn Adapter>)
                })
            }),
        );
        let (factory, _, _, _dir) = factory_with(registry).await;

        // No role is a validation error.
        assert!(matches!(
            factory.get_adapter("u1", "memory", None).await,
            Err(AgentError::Validation { .. })
        ));

        factory.get_adapter("u1", "memory", Some("r1")).await.unwrap();

        // Different roles get different instances.
        let r1 = factory.get_adapter("u1", "memory", Some("r1")).await.unwrap();
        let r2 = factory.get_adapter("u1", "memory", Some("r2")).await.unwrap();
        assert!(!Arc::ptr_eq(&r1, &r2));
        assert_eq!(factory.cached_count(), 2);
    }

    #[tokio::test]
    async fn close_user_evicts_only_that_user() {
        let constructed = Arc::new(AtomicU32::new(0));
        let (factory, _, _, _dir) = factory_with(counting_registry(constructed)).await;

        // Seed a second user.
        let adapter_u1 = factory.get_adapter("u1", "demo", None).await.unwrap();
        factory.get_adapter("u2", "demo", None).await.unwrap();
        assert_eq!(factory.cached_count(), 2);

        factory.close_user("u1").await;
        assert_eq!(factory.cached_count(), 1);
        assert!(!adapter_u1.is_connected().await);
    }
}
