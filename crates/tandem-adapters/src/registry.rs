//! Provider registry.
//!
//! Maps a provider key to the recipe for constructing its adapter: a
//! [`ProviderDescriptor`] plus, for in-process providers, a factory
//! function. Registration is static — everything is wired at startup —
//! but the registry itself is a concurrent map so the factory can consult
//! it from any task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::info;

use crate::error::{AdapterError, Result};
use crate::subprocess::SubprocessAdapter;
use crate::traits::{Adapter, ProviderDescriptor, Transport};

/// Everything an adapter constructor may need for one principal.
#[derive(Debug, Clone)]
pub struct CreateContext {
    pub user_id: String,
    pub role_id: Option<String>,
    /// Credential material resolved by the factory: access token for
    /// OAuth providers, `{"api_key": …}` for key providers,
    /// `{"role_id", "db_path"}` for per-role stores.
    pub token_data: Value,
    /// Prepared working directory, for subprocess providers.
    pub workdir: Option<PathBuf>,
}

/// Factory function for in-process adapters.
pub type InProcessFactory =
    Arc<dyn Fn(CreateContext) -> BoxFuture<'static, Result<Arc<dyn Adapter>>> + Send + Sync>;

/// Registry of provider descriptors and in-process factories.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    descriptors: Arc<DashMap<String, ProviderDescriptor>>,
    in_process: Arc<DashMap<String, InProcessFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subprocess provider from its descriptor.
    pub fn register_subprocess(&self, descriptor: ProviderDescriptor) {
        info!(provider = %descriptor.key, "registered subprocess provider");
        self.descriptors.insert(descriptor.key.clone(), descriptor);
    }

    /// Register an in-process provider with its factory function.
    pub fn register_in_process(&self, descriptor: ProviderDescriptor, factory: InProcessFactory) {
        info!(provider = %descriptor.key, "registered in-process provider");
        self.in_process.insert(descriptor.key.clone(), factory);
        self.descriptors.insert(descriptor.key.clone(), descriptor);
    }

    /// Whether a provider runs in-process.
    pub fn is_in_process(&self, provider_key: &str) -> bool {
        self.descriptors
            .get(provider_key)
            .map(|d| d.transport == Transport::InProcess)
            .unwrap_or(false)
    }

    /// Look up a provider descriptor.
    pub fn descriptor(&self, provider_key: &str) -> Result<ProviderDescriptor> {
        self.descriptors
            .get(provider_key)
            .map(|d| d.clone())
            .ok_or_else(|| AdapterError::UnknownProvider {
                provider: provider_key.to_string(),
            })
    }

    /// Every registered descriptor, sorted by key for determinism.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut all: Vec<_> = self.descriptors.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Construct (but do not connect) the adapter for `provider_key`.
    pub async fn create(&self, provider_key: &str, ctx: CreateContext) -> Result<Arc<dyn Adapter>> {
        let descriptor = self.descriptor(provider_key)?;

        match descriptor.transport {
            Transport::InProcess => {
                let factory = self
                    .in_process
                    .get(provider_key)
                    .map(|f| Arc::clone(f.value()))
                    .ok_or_else(|| AdapterError::UnknownProvider {
                        provider: provider_key.to_string(),
                    })?;
                factory(ctx).await
            }
            Transport::Subprocess => {
                let workdir = ctx.workdir.ok_or_else(|| AdapterError::Fatal {
                    provider: provider_key.to_string(),
                    reason: "subprocess provider created without a working directory".into(),
                })?;
                let env = subprocess_env(&ctx.token_data);
                Ok(Arc::new(SubprocessAdapter::new(descriptor, workdir, env)))
            }
        }
    }
}

/// Environment variables handed to a subprocess adapter: the resolved
/// access token and account, when present.
fn subprocess_env(token_data: &Value) -> HashMap<String, String> {
    let mut env = HashMap::new();
    if let Some(token) = token_data.get("access_token").and_then(Value::as_str) {
        env.insert("PROVIDER_ACCESS_TOKEN".to_string(), token.to_string());
    }
    if let Some(account) = token_data.get("account_email").and_then(Value::as_str) {
        env.insert("PROVIDER_ACCOUNT".to_string(), account.to_string());
    }
    if let Some(key) = token_data.get("api_key").and_then(Value::as_str) {
        env.insert("PROVIDER_API_KEY".to_string(), key.to_string());
    }
    env
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
