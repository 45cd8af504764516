use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use spoke_core::{Event, EventType};

/// Lifecycle of one delivery. `Success` and `Failed` are terminal; a
/// record never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Success | DeliveryStatus::Failed)
    }
}

/// One tracked delivery of an event to a subscriber.
///
/// The originating event rides along so a retry can re-marshal the exact
/// payload without a second copy of it elsewhere.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event: Event,
    pub url: String,
    pub status: DeliveryStatus,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
}

impl DeliveryRecord {
    /// A fresh `Pending` record with zero attempts.
    pub fn pending(webhook_id: Uuid, url: String, event: Event, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            webhook_id,
            event,
            url,
            status: DeliveryStatus::Pending,
            status_code: None,
            error_message: None,
            attempts: 0,
            next_retry_at: None,
            created_at,
            completed_at: None,
            duration: None,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event.id
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type
    }
}

/// Aggregate delivery numbers for one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
    pub retrying: usize,
    /// Fraction of terminal deliveries that succeeded; zero when nothing
    /// has completed yet.
    pub success_rate: f64,
    /// Mean duration over successful deliveries with a recorded duration.
    pub average_duration: Option<Duration>,
}

/// Bounded in-memory delivery log.
///
/// Inserting at capacity evicts the oldest tenth of the log (at least one
/// record) by `created_at`. All queries return fresh clones.
#[derive(Clone)]
pub struct DeliveryLog {
    records: Arc<DashMap<Uuid, DeliveryRecord>>,
    max_logs: usize,
}

impl DeliveryLog {
    pub const DEFAULT_MAX_LOGS: usize = 1000;

    /// A log bounded at `max_logs` records; zero falls back to the
    /// default of 1000.
    pub fn new(max_logs: usize) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            max_logs: if max_logs == 0 {
                Self::DEFAULT_MAX_LOGS
            } else {
                max_logs
            },
        }
    }

    pub fn insert(&self, record: DeliveryRecord) {
        if self.records.len() >= self.max_logs {
            self.evict_oldest();
        }
        self.records.insert(record.id, record);
    }

    fn evict_oldest(&self) {
        let mut by_age: Vec<(Uuid, DateTime<Utc>)> = self
            .records
            .iter()
            .map(|r| (r.value().id, r.value().created_at))
            .collect();
        by_age.sort_by_key(|(_, created_at)| *created_at);

        let count = (self.max_logs / 10).max(1);
        for (id, _) in by_age.into_iter().take(count) {
            self.records.remove(&id);
        }
        tracing::debug!(evicted = count, "delivery log at capacity, evicted oldest");
    }

    pub fn get(&self, id: Uuid) -> Option<DeliveryRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// Apply `mutate` to the record unless it is already terminal.
    ///
    /// Returns whether the record was found and still mutable. Terminal
    /// records are immutable: a late or duplicate attempt cannot resurrect
    /// a completed delivery.
    pub fn update<F>(&self, id: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut DeliveryRecord),
    {
        match self.records.get_mut(&id) {
            Some(mut record) if !record.status.is_terminal() => {
                mutate(&mut record);
                true
            }
            _ => false,
        }
    }

    /// Deliveries to a subscriber, newest first, capped at `limit`.
    pub fn by_webhook(&self, webhook_id: Uuid, limit: usize) -> Vec<DeliveryRecord> {
        let mut records: Vec<DeliveryRecord> = self
            .records
            .iter()
            .filter(|r| r.webhook_id == webhook_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        records
    }

    /// Every delivery of the given event.
    pub fn by_event(&self, event_id: Uuid) -> Vec<DeliveryRecord> {
        self.records
            .iter()
            .filter(|r| r.event_id() == event_id)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Retrying deliveries whose `next_retry_at` has come due.
    pub fn pending_retries(&self, now: DateTime<Utc>) -> Vec<DeliveryRecord> {
        self.records
            .iter()
            .filter(|r| {
                r.status == DeliveryStatus::Retrying
                    && r.next_retry_at.map_or(false, |due| due <= now)
            })
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn stats(&self, webhook_id: Uuid) -> DeliveryStats {
        let mut stats = DeliveryStats {
            total: 0,
            succeeded: 0,
            failed: 0,
            pending: 0,
            retrying: 0,
            success_rate: 0.0,
            average_duration: None,
        };
        let mut total_duration = Duration::ZERO;
        let mut timed = 0u32;

        for record in self.records.iter().filter(|r| r.webhook_id == webhook_id) {
            stats.total += 1;
            match record.status {
                DeliveryStatus::Success => {
                    stats.succeeded += 1;
                    if let Some(duration) = record.duration {
                        total_duration += duration;
                        timed += 1;
                    }
                }
                DeliveryStatus::Failed => stats.failed += 1,
                DeliveryStatus::Pending => stats.pending += 1,
                DeliveryStatus::Retrying => stats.retrying += 1,
            }
        }

        let completed = stats.succeeded + stats.failed;
        if completed > 0 {
            stats.success_rate = stats.succeeded as f64 / completed as f64;
        }
        if timed > 0 {
            stats.average_duration = Some(total_duration / timed);
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
