//! Runtime settings with a hot cache.
//!
//! Settings are key/value JSON rows read on every chat turn (iteration cap,
//! bootstrap mode, stream pacing), so lookups go through a [`moka`] future
//! cache with a short TTL. Writes invalidate the cached entry.

use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;
use tracing::debug;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Default maximum orchestrator iterations when no setting row exists.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Tool discovery mode for the orchestrator's bootstrap toolset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Expose `search_tool` + memory retrieval, expand on demand.
    Search,
    /// Inject every visible tool up front and omit `search_tool`.
    Direct,
}

/// Key/value settings store with a read-through cache.
#[derive(Clone)]
pub struct SettingsStore {
    db: Database,
    cache: Cache<String, String>,
}

impl SettingsStore {
    /// Create a settings store. Cached reads expire after 30 seconds so
    /// out-of-band edits to the table are picked up without a restart.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: Cache::builder()
                .max_capacity(256)
                .time_to_live(Duration::from_secs(30))
                .build(),
        }
    }

    /// Fetch the raw JSON value for `key`, if present.
    pub async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        if let Some(raw) = self.cache.get(key).await {
            return Ok(Some(serde_json::from_str(&raw)?));
        }

        let key_owned = key.to_string();
        let raw: Option<String> = self
            .db
            .call(move |conn| {
                let result = conn.query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    rusqlite::params![key_owned],
                    |row| row.get(0),
                );
                match result {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::from(e)),
                }
            })
            .await?;

        match raw {
            Some(raw) => {
                self.cache.insert(key.to_string(), raw.clone()).await;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// Insert or replace the value for `key`.
    pub async fn set(&self, key: &str, value: &Value) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        let key_owned = key.to_string();
        let raw_owned = raw.clone();
        let now = chrono::Utc::now().timestamp();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    rusqlite::params![key_owned, raw_owned, now],
                )?;
                Ok(())
            })
            .await?;

        self.cache.insert(key.to_string(), raw).await;
        debug!(key, "setting updated");
        Ok(())
    }

    // ── typed accessors ──────────────────────────────────────────────

    /// The orchestrator's iteration cap (default 10).
    pub async fn max_iterations(&self) -> StoreResult<u32> {
        Ok(self
            .get("max_iterations")
            .await?
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_MAX_ITERATIONS))
    }

    /// The tool discovery mode (default two-phase search).
    pub async fn bootstrap_mode(&self) -> StoreResult<BootstrapMode> {
        let mode = self
            .get("bootstrap_mode")
            .await?
            .and_then(|v| v.as_str().map(str::to_string));
        Ok(match mode.as_deref() {
            Some("direct") => BootstrapMode::Direct,
            _ => BootstrapMode::Search,
        })
    }

    /// Delay between outgoing content chunks, in milliseconds (default 20).
    pub async fn stream_delay_ms(&self) -> StoreResult<u64> {
        Ok(self
            .get("stream_delay_ms")
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(20))
    }
}

// ── tests ────────────────────────────────────────────────────────────
