//! Scheduled job runner for Tandem.
//!
//! Jobs persist a prompt (and, for recurring jobs, a cron expression
//! validated at creation); the [`runner`] polls for due rows, claims them
//! atomically, and replays each through the orchestrator.

pub mod error;
pub mod runner;
pub mod schedule;
pub mod scheduler_adapter;

pub use error::{JobError, Result};
pub use runner::{JobRunner, RunnerConfig, TurnExecutor};
pub use schedule::{next_run_timestamp, parse_schedule};
pub use scheduler_adapter::scheduler_adapter;
