use std::time::Duration;

use chrono::{DateTime, Utc};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Capped exponential backoff for failed deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Build a policy; each zero or nonsensical value falls back to its
    /// default (5 attempts, 1s initial, 5min cap, 2.0 multiplier).
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts: if max_attempts == 0 {
                DEFAULT_MAX_ATTEMPTS
            } else {
                max_attempts
            },
            initial_delay: if initial_delay.is_zero() {
                DEFAULT_INITIAL_DELAY
            } else {
                initial_delay
            },
            max_delay: if max_delay.is_zero() {
                DEFAULT_MAX_DELAY
            } else {
                max_delay
            },
            backoff_multiplier: if backoff_multiplier.is_finite() && backoff_multiplier > 0.0 {
                backoff_multiplier
            } else {
                DEFAULT_BACKOFF_MULTIPLIER
            },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a delivery that has failed `attempts` times gets another
    /// try.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// The wait before attempt `attempts + 1`: the initial delay for the
    /// first failure, then multiplied per failure, capped at `max_delay`.
    /// Non-decreasing in `attempts`.
    pub fn next_retry_delay(&self, attempts: u32) -> Duration {
        if attempts <= 1 {
            return self.initial_delay.min(self.max_delay);
        }
        let factor = self.backoff_multiplier.powi((attempts - 1) as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Absolute due time of the next attempt.
    pub fn next_retry_time(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.next_retry_delay(attempts))
            .unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
