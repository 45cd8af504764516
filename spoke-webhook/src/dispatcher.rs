use std::sync::Arc;
use std::time::Instant;

use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use spoke_core::{Clock, Event};

use crate::config::WebhookConfig;
use crate::limiter::RateLimiter;
use crate::log::{DeliveryLog, DeliveryRecord, DeliveryStatus};
use crate::registry::{Webhook, WebhookRegistry};
use crate::retry::RetryPolicy;
use crate::sign::sign_payload;

pub(crate) const HEADER_EVENT: &str = "X-Spoke-Event";
pub(crate) const HEADER_EVENT_ID: &str = "X-Spoke-Event-ID";
pub(crate) const HEADER_SIGNATURE: &str = "X-Spoke-Signature";

/// Fans events out to subscribers as signed HTTP POSTs.
///
/// [`dispatch`](Self::dispatch) is non-blocking: each admitted delivery
/// runs in its own task and the call returns once all tasks are spawned.
/// Rate-limited subscribers are skipped silently, with no log entry and
/// no retry. Per-subscriber failures land in the delivery log, never in
/// the caller.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<WebhookRegistry>,
    log: Arc<DeliveryLog>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    config: WebhookConfig,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<WebhookRegistry>,
        log: Arc<DeliveryLog>,
        clock: Arc<dyn Clock>,
        config: WebhookConfig,
    ) -> Self {
        let config = config.sanitized();
        let limiter = RateLimiter::new(config.max_tokens, config.refill_period, clock.clone());
        Self {
            registry,
            log,
            limiter,
            policy: config.retry.clone(),
            client: reqwest::Client::new(),
            clock,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<WebhookRegistry> {
        &self.registry
    }

    pub fn log(&self) -> &Arc<DeliveryLog> {
        &self.log
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort in-flight deliveries. Their log entries stay `pending` or
    /// `retrying`; the retry worker picks the latter back up.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Deliver `event` to every active subscriber of its type.
    ///
    /// Returns the delivery-log ids created by this call, in the order the
    /// subscribers were visited.
    pub async fn dispatch(&self, event: &Event) -> Vec<Uuid> {
        let mut created = Vec::new();
        for webhook in self.registry.subscribers_of(event.event_type) {
            if !self.limiter.allow(webhook.id) {
                tracing::debug!(
                    webhook = %webhook.id,
                    event = %event.id,
                    "rate limited, skipping delivery"
                );
                continue;
            }

            let record = DeliveryRecord::pending(
                webhook.id,
                webhook.url.clone(),
                event.clone(),
                self.clock.now(),
            );
            let record_id = record.id;
            self.log.insert(record);
            created.push(record_id);

            let dispatcher = self.clone();
            let event = event.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(delivery = %record_id, "delivery cancelled mid-flight");
                    }
                    _ = dispatcher.attempt_delivery(record_id, &webhook, &event) => {}
                }
            });
        }
        created
    }

    /// Run one delivery attempt and record the outcome.
    ///
    /// Used for both first attempts (from [`dispatch`](Self::dispatch))
    /// and retries (from the worker). Every attempt bumps `attempts`;
    /// the policy decides between `retrying` and terminal `failed`.
    pub async fn attempt_delivery(&self, record_id: Uuid, webhook: &Webhook, event: &Event) {
        let body = match serde_json::to_vec(event) {
            Ok(body) => body,
            Err(err) => {
                let now = self.clock.now();
                self.log.update(record_id, |record| {
                    record.attempts += 1;
                    record.status = DeliveryStatus::Failed;
                    record.error_message = Some(format!("failed to encode event: {err}"));
                    record.completed_at = Some(now);
                    record.next_retry_at = None;
                });
                return;
            }
        };

        let started = Instant::now();
        let mut request = self
            .client
            .post(&webhook.url)
            .timeout(self.config.request_timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(HEADER_EVENT, event.event_type.as_str())
            .header(HEADER_EVENT_ID, event.id.to_string());
        if !webhook.secret.is_empty() {
            request = request.header(HEADER_SIGNATURE, sign_payload(&webhook.secret, &body));
        }

        let response = request.body(body).send().await;
        let elapsed = started.elapsed();
        let now = self.clock.now();

        match response {
            Ok(response) if response.status().is_success() => {
                let code = response.status().as_u16();
                tracing::debug!(delivery = %record_id, status = code, "delivery succeeded");
                self.log.update(record_id, |record| {
                    record.attempts += 1;
                    record.status = DeliveryStatus::Success;
                    record.status_code = Some(code);
                    record.error_message = None;
                    record.completed_at = Some(now);
                    record.duration = Some(elapsed);
                    record.next_retry_at = None;
                });
            }
            Ok(response) => {
                let code = response.status().as_u16();
                self.record_failure(
                    record_id,
                    Some(code),
                    format!("endpoint returned HTTP {code}"),
                );
            }
            Err(err) => {
                self.record_failure(record_id, None, format!("request failed: {err}"));
            }
        }
    }

    /// Mark a delivery attempt permanently failed, bypassing the retry
    /// policy (used when the subscriber is gone or inactive at retry
    /// time).
    pub(crate) fn fail_permanently(&self, record_id: Uuid, message: String) {
        let now = self.clock.now();
        self.log.update(record_id, |record| {
            record.status = DeliveryStatus::Failed;
            record.error_message = Some(message);
            record.completed_at = Some(now);
            record.next_retry_at = None;
        });
    }

    fn record_failure(&self, record_id: Uuid, status_code: Option<u16>, message: String) {
        let now = self.clock.now();
        self.log.update(record_id, |record| {
            record.attempts += 1;
            record.status_code = status_code;
            record.error_message = Some(message.clone());
            if self.policy.should_retry(record.attempts) {
                record.status = DeliveryStatus::Retrying;
                record.next_retry_at = Some(self.policy.next_retry_time(now, record.attempts));
                tracing::debug!(
                    delivery = %record_id,
                    attempts = record.attempts,
                    "delivery failed, retry scheduled"
                );
            } else {
                record.status = DeliveryStatus::Failed;
                record.completed_at = Some(now);
                record.next_retry_at = None;
                tracing::warn!(
                    delivery = %record_id,
                    attempts = record.attempts,
                    "delivery failed permanently: {message}"
                );
            }
        });
    }
}
