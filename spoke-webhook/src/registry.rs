use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use spoke_core::EventType;

use crate::error::WebhookError;

/// A registered subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Uuid,
    pub url: String,
    /// HMAC key for delivery signatures. Empty disables signing.
    pub secret: String,
    pub subscribed_events: BTreeSet<EventType>,
    pub active: bool,
}

/// Input for registering a subscriber.
#[derive(Debug, Clone)]
pub struct NewWebhook {
    pub url: String,
    pub secret: String,
    pub subscribed_events: BTreeSet<EventType>,
}

/// Subscribers indexed by id, shared across dispatcher and retry worker.
#[derive(Clone, Default)]
pub struct WebhookRegistry {
    webhooks: Arc<DashMap<Uuid, Webhook>>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. The URL and the subscribed-event set must be
    /// non-empty; the webhook starts out active with a fresh id.
    pub fn register(&self, new: NewWebhook) -> Result<Webhook, WebhookError> {
        if new.url.is_empty() {
            return Err(WebhookError::Validation("webhook URL must not be empty".into()));
        }
        if new.subscribed_events.is_empty() {
            return Err(WebhookError::Validation(
                "webhook must subscribe to at least one event type".into(),
            ));
        }
        let webhook = Webhook {
            id: Uuid::new_v4(),
            url: new.url,
            secret: new.secret,
            subscribed_events: new.subscribed_events,
            active: true,
        };
        tracing::info!(webhook = %webhook.id, url = %webhook.url, "webhook registered");
        self.webhooks.insert(webhook.id, webhook.clone());
        Ok(webhook)
    }

    pub fn get(&self, id: Uuid) -> Option<Webhook> {
        self.webhooks.get(&id).map(|w| w.value().clone())
    }

    /// Replace a webhook's definition, keyed by its id.
    pub fn update(&self, webhook: Webhook) -> Result<(), WebhookError> {
        if webhook.url.is_empty() {
            return Err(WebhookError::Validation("webhook URL must not be empty".into()));
        }
        if webhook.subscribed_events.is_empty() {
            return Err(WebhookError::Validation(
                "webhook must subscribe to at least one event type".into(),
            ));
        }
        match self.webhooks.get_mut(&webhook.id) {
            Some(mut entry) => {
                *entry = webhook;
                Ok(())
            }
            None => Err(WebhookError::NotFound(webhook.id)),
        }
    }

    pub fn activate(&self, id: Uuid) -> Result<(), WebhookError> {
        self.set_active(id, true)
    }

    pub fn deactivate(&self, id: Uuid) -> Result<(), WebhookError> {
        self.set_active(id, false)
    }

    fn set_active(&self, id: Uuid, active: bool) -> Result<(), WebhookError> {
        match self.webhooks.get_mut(&id) {
            Some(mut entry) => {
                entry.active = active;
                Ok(())
            }
            None => Err(WebhookError::NotFound(id)),
        }
    }

    pub fn unregister(&self, id: Uuid) -> Result<(), WebhookError> {
        self.webhooks
            .remove(&id)
            .map(|_| ())
            .ok_or(WebhookError::NotFound(id))
    }

    pub fn list(&self) -> Vec<Webhook> {
        self.webhooks.iter().map(|w| w.value().clone()).collect()
    }

    /// Active subscribers of the given event type, in map iteration order
    /// (unspecified, stable within one call).
    pub fn subscribers_of(&self, event_type: EventType) -> Vec<Webhook> {
        self.webhooks
            .iter()
            .filter(|w| w.active && w.subscribed_events.contains(&event_type))
            .map(|w| w.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.webhooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.webhooks.is_empty()
    }
}
