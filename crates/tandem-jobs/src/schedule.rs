//! Cron schedule parsing.
//!
//! Recurring jobs persist a cron expression validated at creation time and
//! re-parsed only on explicit edit. Expressions are parsed via the `cron`
//! crate, which expects 6/7-field format; standard 5-field user input is
//! normalized by prepending a `0` seconds field.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{JobError, Result};

/// Normalize a cron expression to the 6/7-field format expected by the
/// `cron` crate.
fn normalize_cron_expr(expr: &str) -> String {
    let field_count = expr.split_whitespace().count();
    if field_count == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Parse a cron expression string into a [`cron::Schedule`].
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule> {
    let normalized = normalize_cron_expr(expr);
    cron::Schedule::from_str(&normalized).map_err(|e| JobError::InvalidSchedule {
        expression: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Compute the next fire instant strictly after `after`.
pub fn next_run_after(schedule: &cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Validate `expr` and return the next fire instant after the unix
/// timestamp `after`, as a unix timestamp.
pub fn next_run_timestamp(expr: &str, after: i64) -> Result<i64> {
    let schedule = parse_schedule(expr)?;
    let after = Utc
        .timestamp_opt(after, 0)
        .single()
        .ok_or_else(|| JobError::InvalidSchedule {
            expression: expr.to_string(),
            reason: format!("timestamp {after} out of range"),
        })?;
    next_run_after(&schedule, after)
        .map(|instant| instant.timestamp())
        .ok_or_else(|| JobError::InvalidSchedule {
            expression: expr.to_string(),
            reason: "schedule has no future occurrences".to_string(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_6_field_cron() {
        assert!(parse_schedule("0 30 9 * * 1-5").is_ok());
    }

    #[test]
    fn parse_valid_5_field_cron_normalized() {
        assert!(parse_schedule("30 9 * * 1-5").is_ok());
        assert!(parse_schedule("*/5 * * * *").is_ok());
    }

    #[test]
    fn reject_invalid_cron() {
        assert!(parse_schedule("not a cron").is_err());
        assert!(parse_schedule("").is_err());
    }

    #[test]
    fn next_run_is_in_the_future() {
        let now = Utc::now().timestamp();
        let next = next_run_timestamp("* * * * *", now).unwrap();
        assert!(next > now);
        assert!(next <= now + 61);
    }

    #[test]
    fn next_run_respects_after() {
        // Every hour on the hour; asking from an on-the-hour instant must
        // move strictly forward.
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let next = next_run_timestamp("0 * * * *", base.timestamp()).unwrap();
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2026, 7, 1, 13, 0, 0).unwrap().timestamp()
        );
    }
}
