use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;

/// The closed set of domain events the registry emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "module.created")]
    ModuleCreated,
    #[serde(rename = "module.updated")]
    ModuleUpdated,
    #[serde(rename = "module.deleted")]
    ModuleDeleted,
    #[serde(rename = "version.published")]
    VersionPublished,
    #[serde(rename = "version.deprecated")]
    VersionDeprecated,
    #[serde(rename = "compilation.started")]
    CompilationStarted,
    #[serde(rename = "compilation.completed")]
    CompilationCompleted,
    #[serde(rename = "compilation.failed")]
    CompilationFailed,
    #[serde(rename = "validation.failed")]
    ValidationFailed,
    #[serde(rename = "breaking.change")]
    BreakingChange,
}

impl EventType {
    /// The wire name, e.g. `module.created`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ModuleCreated => "module.created",
            EventType::ModuleUpdated => "module.updated",
            EventType::ModuleDeleted => "module.deleted",
            EventType::VersionPublished => "version.published",
            EventType::VersionDeprecated => "version.deprecated",
            EventType::CompilationStarted => "compilation.started",
            EventType::CompilationCompleted => "compilation.completed",
            EventType::CompilationFailed => "compilation.failed",
            EventType::ValidationFailed => "validation.failed",
            EventType::BreakingChange => "breaking.change",
        }
    }

    /// Every known event type, in wire-name order.
    pub fn all() -> &'static [EventType] {
        &[
            EventType::BreakingChange,
            EventType::CompilationCompleted,
            EventType::CompilationFailed,
            EventType::CompilationStarted,
            EventType::ModuleCreated,
            EventType::ModuleDeleted,
            EventType::ModuleUpdated,
            EventType::ValidationFailed,
            EventType::VersionDeprecated,
            EventType::VersionPublished,
        ]
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown event-type name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type: {0}")]
pub struct ParseEventTypeError(pub String);

impl FromStr for EventType {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module.created" => Ok(EventType::ModuleCreated),
            "module.updated" => Ok(EventType::ModuleUpdated),
            "module.deleted" => Ok(EventType::ModuleDeleted),
            "version.published" => Ok(EventType::VersionPublished),
            "version.deprecated" => Ok(EventType::VersionDeprecated),
            "compilation.started" => Ok(EventType::CompilationStarted),
            "compilation.completed" => Ok(EventType::CompilationCompleted),
            "compilation.failed" => Ok(EventType::CompilationFailed),
            "validation.failed" => Ok(EventType::ValidationFailed),
            "breaking.change" => Ok(EventType::BreakingChange),
            other => Err(ParseEventTypeError(other.to_string())),
        }
    }
}

/// A domain event as delivered to webhook subscribers.
///
/// `data` is a `BTreeMap` so the serialized JSON is byte-stable; the
/// delivery signature is computed over the encoded body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: BTreeMap<String, Value>,
}

impl Event {
    /// Create an event stamped with a fresh id and the clock's current time.
    pub fn new(event_type: EventType, data: BTreeMap<String, Value>, clock: &dyn Clock) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            timestamp: clock.now(),
            data,
        }
    }

    /// Create an event with no payload.
    pub fn empty(event_type: EventType, clock: &dyn Clock) -> Self {
        Self::new(event_type, BTreeMap::new(), clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn event_type_round_trips_through_wire_names() {
        for ty in EventType::all() {
            let parsed: EventType = ty.as_str().parse().unwrap();
            assert_eq!(parsed, *ty);
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let err = "module.frobnicated".parse::<EventType>().unwrap_err();
        assert_eq!(err.0, "module.frobnicated");
    }

    #[test]
    fn event_serializes_with_wire_field_names() {
        let mut data = BTreeMap::new();
        data.insert("module".to_string(), Value::String("common".to_string()));
        let event = Event::new(EventType::ModuleCreated, data, &SystemClock);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "module.created");
        assert_eq!(json["data"]["module"], "common");
        assert!(json["id"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn event_type_serde_matches_display() {
        let json = serde_json::to_string(&EventType::BreakingChange).unwrap();
        assert_eq!(json, "\"breaking.change\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), "breaking.change");
    }
}
