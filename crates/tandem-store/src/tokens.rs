//! OAuth token persistence.
//!
//! Tokens are keyed by (user, provider, account email). Expiry is stored as
//! a unix timestamp; the refresh decision (the 5-minute buffer) belongs to
//! the auth layer, which reads and writes rows through this store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// A stored OAuth token for one (user, provider, account) triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub user_id: String,
    pub provider: String,
    pub account_email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) when the access token expires, if known.
    pub expires_at: Option<i64>,
    pub updated_at: i64,
}

/// CRUD operations on OAuth tokens.
#[derive(Clone)]
pub struct TokenStore {
    db: Database,
}

impl TokenStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the token for (user, provider, account).
    #[instrument(skip(self, token), fields(provider = %token.provider))]
    pub async fn upsert(&self, token: &OAuthToken) -> StoreResult<()> {
        let mut t = token.clone();
        t.updated_at = Utc::now().timestamp();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO oauth_tokens (user_id, provider, account_email, access_token, refresh_token, expires_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(user_id, provider, account_email) DO UPDATE SET \
                       access_token = excluded.access_token, \
                       refresh_token = COALESCE(excluded.refresh_token, oauth_tokens.refresh_token), \
                       expires_at = excluded.expires_at, \
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        t.user_id,
                        t.provider,
                        t.account_email,
                        t.access_token,
                        t.refresh_token,
                        t.expires_at,
                        t.updated_at
                    ],
                )?;
                Ok(())
            })
            .await?;
        debug!("oauth token stored");
        Ok(())
    }

    /// Fetch the token for (user, provider, account).
    pub async fn get(
        &self,
        user_id: &str,
        provider: &str,
        account_email: &str,
    ) -> StoreResult<OAuthToken> {
        let key = format!("{user_id}/{provider}/{account_email}");
        let user_id = user_id.to_string();
        let provider = provider.to_string();
        let account_email = account_email.to_string();
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT user_id, provider, account_email, access_token, refresh_token, expires_at, updated_at \
                     FROM oauth_tokens WHERE user_id = ?1 AND provider = ?2 AND account_email = ?3",
                    rusqlite::params![user_id, provider, account_email],
                    row_to_token,
                )
                .map_err(StoreError::from)
            })
            .await
            .map_err(|e| match e {
                StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => StoreError::NotFound {
                    entity: "oauth_token",
                    id: key,
                },
                other => other,
            })
    }

    /// Fetch the first stored token for (user, provider), any account.
    ///
    /// Used when a provider call does not name a specific account.
    pub async fn get_any_account(
        &self,
        user_id: &str,
        provider: &str,
    ) -> StoreResult<OAuthToken> {
        let key = format!("{user_id}/{provider}");
        let user_id = user_id.to_string();
        let provider = provider.to_string();
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT user_id, provider, account_email, access_token, refresh_token, expires_at, updated_at \
                     FROM oauth_tokens WHERE user_id = ?1 AND provider = ?2 \
                     ORDER BY account_email LIMIT 1",
                    rusqlite::params![user_id, provider],
                    row_to_token,
                )
                .map_err(StoreError::from)
            })
            .await
            .map_err(|e| match e {
                StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => StoreError::NotFound {
                    entity: "oauth_token",
                    id: key,
                },
                other => other,
            })
    }

    /// List the account emails a user has connected, across all providers.
    pub async fn list_accounts(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let user_id = user_id.to_string();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT account_email FROM oauth_tokens WHERE user_id = ?1 \
                     ORDER BY account_email",
                )?;
                let accounts = stmt
                    .query_map(rusqlite::params![user_id], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(accounts)
            })
            .await
    }

    /// Delete the token for (user, provider, account).
    pub async fn delete(
        &self,
        user_id: &str,
        provider: &str,
        account_email: &str,
    ) -> StoreResult<()> {
        let user_id = user_id.to_string();
        let provider = provider.to_string();
        let account_email = account_email.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM oauth_tokens WHERE user_id = ?1 AND provider = ?2 AND account_email = ?3",
                    rusqlite::params![user_id, provider, account_email],
                )?;
                Ok(())
            })
            .await
    }
}

fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<OAuthToken> {
    Ok(OAuthToken {
        user_id: row.get(0)?,
        provider: row.get(1)?,
        account_email: row.get(2)?,
        access_token: row.get(3)?,
        refresh_token: row.get(4)?,
        expires_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seeded_db;

    fn sample(user: &str, provider: &str, email: &str) -> OAuthToken {
        OAuthToken {
            user_id: user.into(),
            provider: provider.into(),
            account_email: email.into(),
            access_token: "at-1".into(),
            refresh_token: Some("rt-1".into()),
            expires_at: Some(Utc::now().timestamp() + 3600),
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let db = seeded_db().await;
        let store = TokenStore::new(db);

        store
            .upsert(&sample("u1", "gmail", "a@example.com"))
            .await
            .unwrap();

        let token = store.get("u1", "gmail", "a@example.com").await.unwrap();
        assert_eq!(token.access_token, "at-1");
    }

    #[tokio::test]
    async fn upsert_replaces_access_but_keeps_refresh() {
        let db = seeded_db().await;
        let store = TokenStore::new(db);

        store
            .upsert(&sample("u1", "gmail", "a@example.com"))
            .await
            .unwrap();

        // Refresh responses often omit the refresh token; the stored one
        // must survive.
        let mut updated = sample("u1", "gmail", "a@example.com");
        updated.access_token = "at-2".into();
        updated.refresh_token = None;
        store.upsert(&updated).await.unwrap();

        let token = store.get("u1", "gmail", "a@example.com").await.unwrap();
        assert_eq!(token.access_token, "at-2");
        assert_eq!(token.refresh_token.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn list_accounts_is_distinct_and_sorted() {
        let db = seeded_db().await;
        let store = TokenStore::new(db);

        store
            .upsert(&sample("u1", "gmail", "b@example.com"))
            .await
            .unwrap();
        store
            .upsert(&sample("u1", "gdrive", "b@example.com"))
            .await
            .unwrap();
        store
            .upsert(&sample("u1", "gmail", "a@example.com"))
            .await
            .unwrap();

        let accounts = store.list_accounts("u1").await.unwrap();
        assert_eq!(accounts, vec!["a@example.com", "b@example.com"]);
    }

    #[tokio::test]
    async fn missing_token_is_not_found() {
        let db = seeded_db().await;
        let store = TokenStore::new(db);
        let result = store.get("u1", "gmail", "nobody@example.com").await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }
}
