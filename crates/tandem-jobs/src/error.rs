//! Job runner error types.

use thiserror::Error;

/// Alias for `Result<T, JobError>`.
pub type Result<T> = std::result::Result<T, JobError>;

/// Errors raised by the scheduler subsystem.
#[derive(Debug, Error)]
pub enum JobError {
    /// A cron expression failed to parse or has no future occurrences.
    #[error("invalid schedule `{expression}`: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// Job persistence failed.
    #[error("job store error: {0}")]
    Store(#[from] tandem_store::StoreError),

    /// The runner was started twice or stopped while not running.
    #[error("runner lifecycle error: {0}")]
    Lifecycle(String),
}
