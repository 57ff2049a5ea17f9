//! OAuth token refresh.
//!
//! [`TokenService`] is the runtime's single entry point for access tokens:
//! it reads the stored token, refreshes it through a [`TokenRefresher`]
//! when it is inside the expiry buffer, persists the refreshed token, and
//! only then hands it to the caller. Adapter calls therefore always see a
//! token with `expires_at > now`.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use tandem_store::{OAuthToken, StoreError, TokenStore};

use crate::error::{AuthError, Result};

/// Tokens within this many seconds of expiry are refreshed before use.
pub const REFRESH_BUFFER_SECS: i64 = 5 * 60;

/// Whether a stored token needs a refresh before it can back an adapter
/// call at instant `now`.
pub fn needs_refresh(token: &OAuthToken, now: i64) -> bool {
    match token.expires_at {
        Some(expires_at) => expires_at <= now + REFRESH_BUFFER_SECS,
        // No recorded expiry: assume long-lived.
        None => false,
    }
}

/// A freshly minted access token from the token endpoint.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Some endpoints rotate the refresh token; most omit it.
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, provider: &str, refresh_token: &str) -> Result<RefreshedToken>;
}

// ── HTTP refresher ───────────────────────────────────────────────────

/// Raw token-endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Raw token-endpoint error response.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Refreshes tokens against a real OAuth token endpoint
/// (`grant_type=refresh_token`).
pub struct HttpRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpRefresher {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// The Google token endpoint, the common case for Tandem providers.
    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self::new("https://oauth2.googleapis.com/token", client_id, client_secret)
    }
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
    #[instrument(skip(self, refresh_token))]
    async fn refresh(&self, provider: &str, refresh_token: &str) -> Result<RefreshedToken> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => format!(
                    "{} ({})",
                    err.error,
                    err.error_description.unwrap_or_default()
                ),
                Err(_) => format!("http {status}"),
            };
            return Err(AuthError::RefreshFailed {
                provider: provider.to_string(),
                reason,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)?;
        debug!(provider, "token refreshed at endpoint");
        Ok(RefreshedToken {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expires_at: parsed.expires_in.map(|secs| Utc::now().timestamp() + secs),
        })
    }
}

// ── token service ────────────────────────────────────────────────────

/// Stored-token reader with refresh-before-use semantics.
pub struct TokenService {
    tokens: TokenStore,
    refresher: Box<dyn TokenRefresher>,
}

impl TokenService {
    pub fn new(tokens: TokenStore, refresher: Box<dyn TokenRefresher>) -> Self {
        Self { tokens, refresher }
    }

    /// Return a usable token for (user, provider, account), refreshing and
    /// persisting first when the stored one is inside the expiry buffer.
    ///
    /// `account_email = None` selects the user's first connected account
    /// for the provider.
    #[instrument(skip(self))]
    pub async fn fresh_token(
        &self,
        user_id: &str,
        provider: &str,
        account_email: Option<&str>,
    ) -> Result<OAuthToken> {
        let stored = match account_email {
            Some(email) => self.tokens.get(user_id, provider, email).await,
            None => self.tokens.get_any_account(user_id, provider).await,
        };

        let token = match stored {
            Ok(token) => token,
            Err(StoreError::NotFound { .. }) => {
                return Err(AuthError::Missing {
                    provider: provider.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now().timestamp();
        if !needs_refresh(&token, now) {
            return Ok(token);
        }

        let Some(refresh_token) = token.refresh_token.clone() else {
            return Err(AuthError::Expired {
                provider: provider.to_string(),
            });
        };

        info!(provider, account = %token.account_email, "refreshing oauth token");
        let refreshed = self.refresher.refresh(provider, &refresh_token).await?;

        let updated = OAuthToken {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.or(token.refresh_token.clone()),
            expires_at: refreshed.expires_at,
            ..token
        };
        // Persist before use so a crash cannot leave a minted-but-unknown
        // token at the provider.
        self.tokens.upsert(&updated).await?;
        Ok(updated)
    }

    /// Account emails the user has connected, for the system prompt.
    pub async fn connected_accounts(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self.tokens.list_accounts(user_id).await?)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tandem_store::{Database, UserStore};

    struct FakeRefresher {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, provider: &str, _refresh_token: &str) -> Result<RefreshedToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthError::RefreshFailed {
                    provider: provider.to_string(),
                    reason: "invalid_grant".into(),
                });
            }
            Ok(RefreshedToken {
                access_token: "fresh-token".into(),
                refresh_token: None,
                expires_at: Some(Utc::now().timestamp() + 3600),
            })
        }
    }

    async fn service(fail: bool) -> (TokenService, TokenStore, Arc<AtomicU32>) {
        let db = Database::metadata_in_memory().await.unwrap();
        UserStore::new(db.clone()).ensure("u1", "u1").await.unwrap();
        let tokens = TokenStore::new(db);
        let calls = Arc::new(AtomicU32::new(0));
        let service = TokenService::new(
            tokens.clone(),
            Box::new(FakeRefresher {
                calls: Arc::clone(&calls),
                fail,
            }),
        );
        (service, tokens, calls)
    }

    fn token(expires_in: i64, refresh: Option<&str>) -> OAuthToken {
        OAuthToken {
            user_id: "u1".into(),
            provider: "gmail".into(),
            account_email: "a@example.com".into(),
            access_token: "stale".into(),
            refresh_token: refresh.map(str::to_string),
            expires_at: Some(Utc::now().timestamp() + expires_in),
            updated_at: 0,
        }
    }

    #[test]
    fn buffer_boundaries() {
        let now = Utc::now().timestamp();
        assert!(needs_refresh(&token(60, None), now));
        assert!(needs_refresh(&token(REFRESH_BUFFER_SECS - 1, None), now));
        assert!(!needs_refresh(&token(REFRESH_BUFFER_SECS + 60, None), now));

        let mut no_expiry = token(0, None);
        no_expiry.expires_at = None;
        assert!(!needs_refresh(&no_expiry, now));
    }

    #[tokio::test]
    async fn fresh_token_passthrough_when_valid() {
        let (service, tokens, calls) = service(false).await;
        tokens.upsert(&token(3600, Some("rt"))).await.unwrap();

        let got = service
            .fresh_token("u1", "gmail", Some("a@example.com"))
            .await
            .unwrap();
        assert_eq!(got.access_token, "stale");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fresh_token_refreshes_and_persists() {
        let (service, tokens, calls) = service(false).await;
        tokens.upsert(&token(60, Some("rt"))).await.unwrap();

        let got = service
            .fresh_token("u1", "gmail", Some("a@example.com"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(got.access_token, "fresh-token");
        assert!(got.expires_at.unwrap() > Utc::now().timestamp());

        // The refreshed token was persisted before being returned.
        let stored = tokens.get("u1", "gmail", "a@example.com").await.unwrap();
        assert_eq!(stored.access_token, "fresh-token");
        // Refresh token survives endpoints that omit it.
        assert_eq!(stored.refresh_token.as_deref(), Some("rt"));
    }

    #[tokio::test]
    async fn expired_without_refresh_token_is_terminal() {
        let (service, tokens, _) = service(false).await;
        tokens.upsert(&token(-10, None)).await.unwrap();

        let result = service
            .fresh_token("u1", "gmail", Some("a@example.com"))
            .await;
        assert!(matches!(result, Err(AuthError::Expired { .. })));
    }

    #[tokio::test]
    async fn missing_token_is_terminal() {
        let (service, _, _) = service(false).await;
        let result = service.fresh_token("u1", "gmail", None).await;
        assert!(matches!(result, Err(AuthError::Missing { .. })));
    }

    #[tokio::test]
    async fn refresh_failure_propagates() {
        let (service, tokens, _) = service(true).await;
        tokens.upsert(&token(60, Some("rt"))).await.unwrap();

        let result = service
            .fresh_token("u1", "gmail", Some("a@example.com"))
            .await;
        assert!(matches!(result, Err(AuthError::RefreshFailed { .. })));
    }
}
