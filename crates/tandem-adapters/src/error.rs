//! Adapter error types.
//!
//! A tool that runs but reports failure is *not* an error here — that comes
//! back as an error-tagged [`crate::traits::ToolOutcome`] so the model can
//! react. [`AdapterError`] covers everything the adapter machinery itself
//! can get wrong.

use thiserror::Error;

/// Alias for `Result<T, AdapterError>`.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors raised by adapter construction, transport, and dispatch.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The named tool does not exist on this provider (caller fault).
    #[error("unknown tool `{tool_name}` on provider `{provider}`")]
    UnknownTool { provider: String, tool_name: String },

    /// Tool arguments failed schema validation (caller fault, never retried).
    #[error("invalid arguments for `{tool_name}`: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    /// Transport-level failure that a single reconnect may fix.
    #[error("transient adapter failure on `{provider}`: {reason}")]
    Transient { provider: String, reason: String },

    /// The adapter cannot be used again without outside intervention.
    #[error("fatal adapter failure on `{provider}`: {reason}")]
    Fatal { provider: String, reason: String },

    /// The provider key is not registered.
    #[error("unknown provider `{provider}`")]
    UnknownProvider { provider: String },

    /// A resource URI could not be served.
    #[error("resource `{uri}` not available on `{provider}`: {reason}")]
    Resource {
        provider: String,
        uri: String,
        reason: String,
    },

    /// JSON (de)serialization failed on the wire.
    #[error("adapter protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// Backing-store failure inside an in-process adapter.
    #[error("adapter store error: {0}")]
    Store(#[from] tandem_store::StoreError),
}

impl AdapterError {
    /// Whether a reconnect-and-retry is worth attempting.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Escalate a transient error after a failed retry.
    pub fn into_fatal(self) -> Self {
        match self {
            Self::Transient { provider, reason } => Self::Fatal {
                provider,
                reason: format!("retry failed: {reason}"),
            },
            other => other,
        }
    }
}
