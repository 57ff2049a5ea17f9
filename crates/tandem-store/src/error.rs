//! Storage error type.
//!
//! Every store in this crate reports failures through [`StoreError`]. The
//! variants split along what the caller can do about them: `NotFound` and
//! `Rejected` are caller-addressable, `InvalidCacheId` marks an untrusted
//! identifier that must not touch the filesystem, and the rest are
//! infrastructure faults to log and surface.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures raised by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite call failed.
    #[error("database failure: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored JSON blob (settings value, provider config) would not
    /// round-trip.
    #[error("malformed stored json: {0}")]
    Json(#[from] serde_json::Error),

    /// A pending schema migration could not be applied; the database is
    /// left at the last good version.
    #[error("schema migration {version} did not apply: {message}")]
    Migration { version: u32, message: String },

    /// No row for the requested key.
    #[error("no {entity} with id `{id}`")]
    NotFound { entity: &'static str, id: String },

    /// The caller passed a value a store refuses to persist or interpret
    /// (unknown status string, compound file extension, and the like).
    #[error("rejected value: {0}")]
    Rejected(String),

    /// A candidate failed the `[A-Za-z0-9_-]+` cache-id grammar, or a
    /// derived path tried to leave the cache root.
    #[error("unsafe cache reference: {0}")]
    InvalidCacheId(String),

    /// Filesystem I/O under the cache root failed.
    #[error("cache filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking-pool task was cancelled or panicked before finishing.
    #[error("storage task died: {0}")]
    Background(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Background(err.to_string())
    }
}
