//! Shared application state for request handlers.

use std::sync::Arc;

use axum::http::HeaderMap;

use tandem_agent::{AdapterFactory, Orchestrator};
use tandem_store::{
    JobStore, MessageStore, ProviderConfigStore, RoleStore, SkillStore, TokenStore,
};

/// Bind configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub factory: Arc<AdapterFactory>,
    pub roles: RoleStore,
    pub jobs: JobStore,
    pub tokens: TokenStore,
    pub messages: MessageStore,
    pub provider_configs: ProviderConfigStore,
    pub skills: SkillStore,
    /// User attributed to requests that carry no identity header.
    /// Authentication itself is handled upstream of this server.
    pub default_user: String,
}

impl AppState {
    /// The user a request acts as: the upstream-auth header when present,
    /// the configured default otherwise.
    pub fn user_id(&self, headers: &HeaderMap) -> String {
        headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_user.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_localhost() {
        let config = WebConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.port, 8080);
    }
}
