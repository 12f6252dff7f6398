//! Per-source scheduling state.
//!
//! A [`SourceState`] moves between idle, running and cooling down:
//!
//! ```text
//! idle --due--> running --ok--> idle (next_run = now + interval)
//!                       --err-> idle (next_run = now + max(floor, backoff))
//!                       --err, failures >= threshold--> cooling down
//! cooling down --cooldown elapsed--> idle, due immediately
//! ```
//!
//! Only the scheduler mutates these; the health board gets copies.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::health::SourceHealth;
use crate::sources::FetchError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_BACKOFF_FLOOR: Duration = Duration::from_secs(5);
pub const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(300);
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 4;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(600);
pub const DEFAULT_PARSE_FAILURE_THRESHOLD: u32 = 3;

/// Backoff and cooldown tuning shared by every source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Minimum delay before any retry.
    pub floor: Duration,
    /// Largest backoff a source can accumulate.
    pub ceiling: Duration,
    /// Consecutive failures that trigger a cooldown.
    pub failure_threshold: u32,
    pub cooldown: Duration,
    /// Consecutive parse failures that count as one normal failure.
    pub parse_failure_threshold: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor: DEFAULT_BACKOFF_FLOOR,
            ceiling: DEFAULT_BACKOFF_CEILING,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            parse_failure_threshold: DEFAULT_PARSE_FAILURE_THRESHOLD,
        }
    }
}

/// What a recorded failure did to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Retry after the given delay.
    Backoff(Duration),
    /// Threshold reached; paused until the given instant.
    Cooldown(DateTime<Utc>),
    /// Malformed content below the parse threshold; regular cadence kept.
    ParseTolerated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceState {
    pub name: String,
    pub enabled: bool,
    pub interval: Duration,
    pub backoff: Duration,
    pub next_run: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub consecutive_parse_failures: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
}

/// `now + delay`, pinned to the far end of the calendar instead of
/// overflowing.
pub(crate) fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl SourceState {
    /// A fresh source, due immediately.
    pub fn new(
        name: impl Into<String>,
        enabled: bool,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            enabled,
            interval,
            backoff: Duration::ZERO,
            next_run: now,
            consecutive_failures: 0,
            consecutive_parse_failures: 0,
            cooldown_until: None,
            last_success: None,
            last_error: None,
            last_error_message: None,
        }
    }

    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Leave an elapsed cooldown: failures and backoff reset, due now.
    /// Returns `true` when a cooldown was released.
    pub fn release_cooldown(&mut self, now: DateTime<Utc>) -> bool {
        match self.cooldown_until {
            Some(until) if now >= until => {
                self.cooldown_until = None;
                self.consecutive_failures = 0;
                self.consecutive_parse_failures = 0;
                self.backoff = Duration::ZERO;
                self.next_run = now;
                true
            }
            _ => false,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && !self.is_cooling_down(now) && now >= self.next_run
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.backoff = Duration::ZERO;
        self.consecutive_failures = 0;
        self.consecutive_parse_failures = 0;
        self.cooldown_until = None;
        self.last_success = Some(now);
        self.next_run = after(now, self.interval);
    }

    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        error: &FetchError,
        policy: &BackoffPolicy,
    ) -> FailureOutcome {
        self.last_error = Some(now);
        self.last_error_message = Some(error.to_string());

        if error.is_parse() {
            self.consecutive_parse_failures += 1;
            if self.consecutive_parse_failures < policy.parse_failure_threshold {
                self.next_run = after(now, self.interval);
                return FailureOutcome::ParseTolerated;
            }
            self.consecutive_parse_failures = 0;
        }

        let base = self.interval;
        let seed = if error.is_rate_limited() {
            base.saturating_mul(2)
        } else {
            base
        };
        let grown = if self.backoff.is_zero() {
            seed
        } else {
            self.backoff.saturating_mul(2)
        };
        self.backoff = grown.max(base).min(policy.ceiling);
        self.consecutive_failures += 1;

        if self.consecutive_failures >= policy.failure_threshold {
            let until = after(now, policy.cooldown);
            self.cooldown_until = Some(until);
            self.next_run = until;
            return FailureOutcome::Cooldown(until);
        }

        let delay = self.backoff.max(policy.floor);
        self.next_run = after(now, delay);
        FailureOutcome::Backoff(delay)
    }

    pub fn health(&self, now: DateTime<Utc>, policy: &BackoffPolicy) -> SourceHealth {
        SourceHealth {
            name: self.name.clone(),
            enabled: self.enabled,
            active: self.enabled && !self.is_cooling_down(now),
            paused: self.is_cooling_down(now),
            last_success: self.last_success,
            last_error: self.last_error,
            last_error_message: self.last_error_message.clone(),
            consecutive_failures: self.consecutive_failures,
            failure_threshold: policy.failure_threshold,
            backoff_seconds: self.backoff.as_secs(),
            interval_seconds: self.interval.as_secs(),
            next_run: self.enabled.then_some(self.next_run),
            cooldown_until: self.cooldown_until,
        }
    }
}
