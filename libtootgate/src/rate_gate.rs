//! Minimum-interval gate between posts
//!
//! Prevents over-posting by measuring the time since the account's most
//! recent post, in the account's local timezone.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;

use crate::audit::AuditLog;
use crate::types::HistoricalPost;

/// Audit task carrying the computed hours since the last post
pub const TASK_HOURS_SINCE: &str = "hours_since_last_post";

/// Longest minimum interval the gate accepts, a century of hours
pub const MAX_INTERVAL_HOURS: f64 = 24.0 * 366.0 * 100.0;

/// The account has never posted; any interval is satisfied
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("account has no posts yet")]
pub struct NoHistory;

/// Outcome of one gate evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateGateResult {
    pub hours_since_last_post: f64,
    pub minimum_interval_hours: f64,
    pub eligible: bool,
    /// Never earlier than the evaluation time
    pub next_eligible_at: DateTime<Tz>,
}

impl RateGateResult {
    /// Time left until posting is allowed, zero when already eligible
    pub fn wait(&self) -> std::time::Duration {
        let hours = (self.minimum_interval_hours - self.hours_since_last_post)
            .max(0.0)
            .min(MAX_INTERVAL_HOURS);
        std::time::Duration::from_secs_f64(hours * 3600.0)
    }
}

/// Rate gate for one account
#[derive(Debug, Clone, Copy)]
pub struct RateGate {
    minimum_interval_hours: f64,
    tz: Tz,
}

impl RateGate {
    /// `minimum_interval_hours` must be positive; config validation enforces it.
    /// Waits longer than [`MAX_INTERVAL_HOURS`] are reported as that maximum.
    pub fn new(minimum_interval_hours: f64, tz: Tz) -> Self {
        Self {
            minimum_interval_hours,
            tz,
        }
    }

    pub fn minimum_interval_hours(&self) -> f64 {
        self.minimum_interval_hours
    }

    /// Evaluate against the wall clock
    pub fn evaluate_now(
        &self,
        history: &[HistoricalPost],
        audit: &mut AuditLog,
    ) -> Result<RateGateResult, NoHistory> {
        self.evaluate(history, Utc::now(), audit)
    }

    /// Evaluate at `now`
    ///
    /// Uses the newest `created_at` in `history`. A post dated after `now`
    /// (clock skew) counts as zero hours ago.
    pub fn evaluate(
        &self,
        history: &[HistoricalPost],
        now: DateTime<Utc>,
        audit: &mut AuditLog,
    ) -> Result<RateGateResult, NoHistory> {
        let last = history
            .iter()
            .map(|post| post.created_at)
            .max()
            .ok_or(NoHistory)?;

        let now_local = now.with_timezone(&self.tz);
        let last_local = last.with_timezone(&self.tz);
        let elapsed = now_local.signed_duration_since(last_local);
        let hours_since = (elapsed.num_milliseconds() as f64 / 3_600_000.0).max(0.0);

        let eligible = hours_since >= self.minimum_interval_hours;
        let next_eligible_at = if eligible {
            now_local
        } else {
            let remaining_hours = (self.minimum_interval_hours - hours_since).min(MAX_INTERVAL_HOURS);
            let remaining_ms = (remaining_hours * 3_600_000.0).ceil() as i64;
            now_local
                .checked_add_signed(Duration::milliseconds(remaining_ms))
                .unwrap_or(now_local)
        };

        audit.append(
            TASK_HOURS_SINCE,
            format!(
                "{:.2} hours since the post at {} (minimum {})",
                hours_since,
                last_local.to_rfc3339(),
                self.minimum_interval_hours
            ),
        );

        Ok(RateGateResult {
            hours_since_last_post: hours_since,
            minimum_interval_hours: self.minimum_interval_hours,
            eligible,
            next_eligible_at,
        })
    }
}
