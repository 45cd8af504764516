//! Webhook delivery for the Spoke schema registry.
//!
//! Domain events fan out to subscribers as signed HTTP POSTs. Each
//! subscriber has a token-bucket rate limit; every admitted delivery is
//! tracked in a bounded in-memory log; failed deliveries are retried by a
//! background worker with capped exponential backoff until the retry
//! budget runs out. Delivery is at-least-once: the caller of
//! [`Dispatcher::dispatch`] never observes per-subscriber failures.

pub mod config;
pub mod dispatcher;
pub mod limiter;
pub mod log;
pub mod registry;
pub mod retry;
pub mod sign;
pub mod worker;

mod error;

pub use config::WebhookConfig;
pub use dispatcher::Dispatcher;
pub use error::WebhookError;
pub use limiter::RateLimiter;
pub use log::{DeliveryLog, DeliveryRecord, DeliveryStats, DeliveryStatus};
pub use registry::{NewWebhook, Webhook, WebhookRegistry};
pub use retry::RetryPolicy;
pub use sign::sign_payload;
pub use worker::{RetryWorker, RetryWorkerHandle};
