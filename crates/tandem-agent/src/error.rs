//! Agent error types.
//!
//! All runtime subsystems surface errors through [`AgentError`]. The
//! orchestrator recovers locally wherever the model might productively
//! react (tool errors, loop blocks, per-call timeouts) and only propagates
//! what the model cannot fix: auth, validation, and fatal failures.

use thiserror::Error;

/// Alias for `Result<T, AgentError>`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Unified error type for the agent runtime.
#[derive(Debug, Error)]
pub enum AgentError {
    // -- LLM errors ----------------------------------------------------------
    /// An HTTP request to the LLM provider failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The LLM response could not be parsed into the expected format.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The streaming SSE connection was interrupted or produced invalid data.
    #[error("llm stream error: {reason}")]
    LlmStreamError { reason: String },

    /// The API key is missing for the model provider.
    #[error("missing api key for model provider")]
    MissingModelKey,

    // -- Credential errors ---------------------------------------------------
    /// No usable credential for a tool provider; carries the provider key so
    /// the client can start a connect flow.
    #[error("authentication required for provider `{provider}`")]
    AuthRequired { provider: String },

    // -- Dispatch errors -----------------------------------------------------
    /// No provider exposes the requested tool.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// Adapter construction or connection failed for a provider.
    #[error("adapter for `{provider}` failed: {reason}")]
    AdapterFailed { provider: String, reason: String },

    /// Caller-side input was malformed.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the store.
    #[error("store error: {0}")]
    Store(#[from] tandem_store::StoreError),

    /// An error propagated from the adapter layer.
    #[error("adapter error: {0}")]
    Adapter(#[from] tandem_adapters::AdapterError),

    // -- Generic -------------------------------------------------------------
    /// Corrupt state or a programming error. The turn aborts with an error
    /// frame; the process keeps running.
    #[error("internal agent error: {0}")]
    Internal(String),
}

impl From<tandem_auth::AuthError> for AgentError {
    fn from(err: tandem_auth::AuthError) -> Self {
        match err {
            tandem_auth::AuthError::Missing { provider }
            | tandem_auth::AuthError::Expired { provider } => Self::AuthRequired { provider },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}
