//! Auth error types.

use thiserror::Error;

/// Alias for `Result<T, AuthError>`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors surfaced by credential handling.
///
/// `Missing` and `Expired` are terminal for the caller (the user has to
/// reconnect the account); everything else is an infrastructure failure.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential is stored for this provider.
    #[error("no credential stored for provider `{provider}`")]
    Missing { provider: String },

    /// The stored token is expired and cannot be refreshed.
    #[error("credential for provider `{provider}` is expired and has no refresh token")]
    Expired { provider: String },

    /// The token endpoint rejected the refresh request.
    #[error("token refresh failed for provider `{provider}`: {reason}")]
    RefreshFailed { provider: String, reason: String },

    /// HTTP transport failure talking to the token endpoint.
    #[error("auth http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Token persistence failed.
    #[error("auth store error: {0}")]
    Store(#[from] tandem_store::StoreError),

    /// Credential file could not be written.
    #[error("credential file error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON shape mismatch in a token response.
    #[error("auth json error: {0}")]
    Json(#[from] serde_json::Error),
}
