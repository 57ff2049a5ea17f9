//! Per-user provider configuration blobs.
//!
//! Providers that authenticate with an API key (rather than OAuth) keep
//! their key and any extra settings in a JSON blob keyed by
//! (user, provider key).

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// CRUD operations on provider config blobs.
#[derive(Clone)]
pub struct ProviderConfigStore {
    db: Database,
}

impl ProviderConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the config blob for (user, provider).
    pub async fn upsert(&self, user_id: &str, provider: &str, config: &Value) -> StoreResult<()> {
        debug!(provider, "storing provider config");
        let user_id = user_id.to_string();
        let provider = provider.to_string();
        let config = serde_json::to_string(config)?;
        let now = Utc::now().timestamp();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO provider_configs (user_id, provider, config, updated_at) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(user_id, provider) DO UPDATE SET \
                       config = excluded.config, updated_at = excluded.updated_at",
                    rusqlite::params![user_id, provider, config, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Fetch the config blob for (user, provider).
    pub async fn get(&self, user_id: &str, provider: &str) -> StoreResult<Value> {
        let key = format!("{user_id}/{provider}");
        let user_id = user_id.to_string();
        let provider = provider.to_string();
        self.db
            .call(move |conn| {
                let raw: String = conn
                    .query_row(
                        "SELECT config FROM provider_configs WHERE user_id = ?1 AND provider = ?2",
                        rusqlite::params![user_id, provider],
                        |row| row.get(0),
                    )
                    .map_err(StoreError::from)?;
                Ok(serde_json::from_str(&raw)?)
            })
            .await
            .map_err(|e| match e {
                StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => StoreError::NotFound {
                    entity: "provider_config",
                    id: key,
                },
                other => other,
            })
    }

    /// Fetch the `api_key` field of a provider config, if present.
    pub async fn api_key(&self, user_id: &str, provider: &str) -> StoreResult<Option<String>> {
        let config = match self.get(user_id, provider).await {
            Ok(c) => c,
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(config
            .get("api_key")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// Remove the config blob for (user, provider).
    pub async fn delete(&self, user_id: &str, provider: &str) -> StoreResult<()> {
        let user_id = user_id.to_string();
        let provider = provider.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM provider_configs WHERE user_id = ?1 AND provider = ?2",
                    rusqlite::params![user_id, provider],
                )?;
                Ok(())
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
