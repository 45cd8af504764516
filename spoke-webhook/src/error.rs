use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by webhook registration and lifecycle operations.
///
/// Delivery failures never appear here: transient ones feed the retry
/// scheduler through the delivery log, permanent ones are recorded as
/// terminal log entries, and rate-limit drops are silent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("webhook not found: {0}")]
    NotFound(Uuid),

    #[error("validation error: {0}")]
    Validation(String),
}
