use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tuning knobs for the delivery pipeline.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Token-bucket capacity per subscriber.
    pub max_tokens: u64,
    /// One token refills per period.
    pub refill_period: Duration,
    /// Delivery-log bound; the oldest tenth is evicted at capacity.
    pub max_logs: usize,
    /// Per-attempt timeout on the outbound POST.
    pub request_timeout: Duration,
    /// How often the retry worker looks for due deliveries.
    pub check_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10,
            refill_period: Duration::from_secs(1),
            max_logs: 1000,
            request_timeout: Duration::from_secs(10),
            check_interval: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl WebhookConfig {
    /// Replace zeroed values with their defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_tokens == 0 {
            self.max_tokens = defaults.max_tokens;
        }
        if self.refill_period.is_zero() {
            self.refill_period = defaults.refill_period;
        }
        if self.max_logs == 0 {
            self.max_logs = defaults.max_logs;
        }
        if self.request_timeout.is_zero() {
            self.request_timeout = defaults.request_timeout;
        }
        if self.check_interval.is_zero() {
            self.check_interval = defaults.check_interval;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_values_fall_back() {
        let config = WebhookConfig {
            max_tokens: 0,
            refill_period: Duration::ZERO,
            max_logs: 0,
            request_timeout: Duration::ZERO,
            check_interval: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
        .sanitized();

        let defaults = WebhookConfig::default();
        assert_eq!(config.max_tokens, defaults.max_tokens);
        assert_eq!(config.refill_period, defaults.refill_period);
        assert_eq!(config.max_logs, defaults.max_logs);
        assert_eq!(config.request_timeout, defaults.request_timeout);
        assert_eq!(config.check_interval, defaults.check_interval);
    }
}
