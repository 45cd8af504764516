use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use spoke_core::Clock;

struct TokenBucket {
    tokens: u64,
    last_refill: DateTime<Utc>,
}

/// Per-subscriber token bucket with lazy whole-period refill.
///
/// Refill credits `floor(elapsed / refill_period)` tokens and advances
/// `last_refill` by exactly that many periods — never to `now` — so
/// partial periods are carried instead of lost to drift.
///
/// Mutation of a single bucket is serialized by the map's entry guard;
/// the bucket index itself is a sharded read-mostly map.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<DashMap<Uuid, TokenBucket>>,
    max_tokens: u64,
    refill_period: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// A limiter allowing `max_tokens` deliveries per subscriber, refilled
    /// one token per `refill_period`.
    pub fn new(max_tokens: u64, refill_period: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            max_tokens,
            refill_period,
            clock,
        }
    }

    /// Try to consume one token for the subscriber.
    ///
    /// Returns `true` if the delivery is admitted, `false` if rate-limited.
    pub fn allow(&self, subscriber: Uuid) -> bool {
        let now = self.clock.now();
        let mut entry = self.buckets.entry(subscriber).or_insert_with(|| TokenBucket {
            tokens: self.max_tokens,
            last_refill: now,
        });

        let bucket = entry.value_mut();
        self.refill(bucket, now);
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut TokenBucket, now: DateTime<Utc>) {
        let period_nanos = self.refill_period.as_nanos();
        if period_nanos == 0 {
            return;
        }
        let elapsed_nanos = (now - bucket.last_refill)
            .num_nanoseconds()
            .unwrap_or(i64::MAX)
            .max(0) as u128;
        let periods = elapsed_nanos / period_nanos;
        if periods == 0 {
            return;
        }
        bucket.tokens = bucket
            .tokens
            .saturating_add(periods.min(u64::MAX as u128) as u64)
            .min(self.max_tokens);
        let advance = (periods * period_nanos).min(i64::MAX as u128) as i64;
        bucket.last_refill += chrono::Duration::nanoseconds(advance);
    }
}
