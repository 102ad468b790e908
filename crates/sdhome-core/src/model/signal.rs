//! `SignalEvent`, `SensorReading`, `TriggerEvent` and the pipeline snapshot
//! carried alongside them (§3, §4.2, §4.3).

use crate::ids::{DeviceId, SignalEventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Coarse device classification carried on every `SignalEvent`, inferred by
/// the mapper from payload shape — not the same enum as `Device::device_type`,
/// which is operator-assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Unknown,
    Button,
    Motion,
    Contact,
    Thermometer,
    Light,
    Switch,
    Outlet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCategory {
    Telemetry,
    Command,
    State,
}

/// Immutable inbound-message record — the causal anchor for everything
/// derived from a broker message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub id: SignalEventId,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub device_id: DeviceId,
    pub capability: String,
    pub event_type: String,
    pub event_sub_type: Option<String>,
    pub value: Option<Json>,
    pub raw_topic: String,
    /// Always a JSON object; enforced at construction (`SignalEvent::new`)
    /// and by the mapper, which discards non-object payloads before this
    /// type exists.
    pub raw_payload: Json,
    pub device_kind: DeviceKind,
    pub event_category: EventCategory,
}

impl SignalEvent {
    /// Build a `SignalEvent`, rejecting payloads that are not a JSON object
    /// per the invariant in §3.
    pub fn new(
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
        device_id: DeviceId,
        capability: impl Into<String>,
        event_type: impl Into<String>,
        event_sub_type: Option<String>,
        value: Option<Json>,
        raw_topic: impl Into<String>,
        raw_payload: Json,
        device_kind: DeviceKind,
        event_category: EventCategory,
    ) -> Option<Self> {
        if !raw_payload.is_object() {
            return None;
        }
        Some(Self {
            id: SignalEventId::new(),
            timestamp,
            source: source.into(),
            device_id,
            capability: capability.into(),
            event_type: event_type.into(),
            event_sub_type,
            value,
            raw_topic: raw_topic.into(),
            raw_payload,
            device_kind,
            event_category,
        })
    }
}

/// A single numeric metric derived from a `SignalEvent` by the Projection
/// Service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: uuid::Uuid,
    pub signal_event_id: SignalEventId,
    pub timestamp: DateTime<Utc>,
    pub device_id: DeviceId,
    pub metric: String,
    pub value: f64,
    pub unit: Option<String>,
}

/// A discrete event (motion, button press, contact, state) derived from a
/// `SignalEvent` by the Projection Service; at most one per signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: uuid::Uuid,
    pub signal_event_id: SignalEventId,
    pub timestamp: DateTime<Utc>,
    pub device_id: DeviceId,
    pub capability: String,
    pub trigger_type: String,
    pub trigger_sub_type: Option<String>,
    pub value: Option<bool>,
}

/// Elapsed times for the parse/persist/broadcast stages of one signal,
/// carried through to the automation engine and E2E tracker for end-to-end
/// accounting (§9 glossary).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub parse_ms: Option<u64>,
    pub db_ms: Option<u64>,
    pub broadcast_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_event_rejects_non_object_payload() {
        let result = SignalEvent::new(
            Utc::now(),
            "mqtt",
            DeviceId::new("x"),
            "motion",
            "motion",
            None,
            None,
            "sdhome/x",
            Json::Array(vec![]),
            DeviceKind::Motion,
            EventCategory::Telemetry,
        );
        assert!(result.is_none());
    }

    #[test]
    fn signal_event_accepts_object_payload() {
        let result = SignalEvent::new(
            Utc::now(),
            "mqtt",
            DeviceId::new("x"),
            "motion",
            "motion",
            None,
            None,
            "sdhome/x",
            serde_json::json!({"occupancy": true}),
            DeviceKind::Motion,
            EventCategory::Telemetry,
        );
        assert!(result.is_some());
    }
}
