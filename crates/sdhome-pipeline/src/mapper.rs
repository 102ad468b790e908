//! Topic/payload → `SignalEvent` normalization (§4.2 Mapper contract).
//!
//! Pure function over `(topic, payload)`; no I/O, no clock dependency beyond
//! the timestamp the caller supplies. Capability inference follows the
//! decision table in §4.3: the shape of the payload, not the topic, decides
//! what kind of signal this is.

use chrono::{DateTime, Utc};
use sdhome_core::ids::DeviceId;
use sdhome_core::model::{DeviceKind, EventCategory, SignalEvent};
use serde_json::Value as Json;

/// Derives the device id from a topic of the form `<base>/<deviceId>`.
/// Any other shape (bridge topics, `/set`, `/get`, `/availability`
/// sub-topics) is not a primary signal topic and yields `None`.
fn device_id_from_topic(topic: &str, base_topic: &str) -> Option<DeviceId> {
    let mut segments = topic.split('/');
    if segments.next()? != base_topic {
        return None;
    }
    let device = segments.next()?;
    if segments.next().is_some() || device.is_empty() {
        return None;
    }
    Some(DeviceId::new(device))
}

struct Classified {
    capability: &'static str,
    event_type: &'static str,
    event_sub_type: Option<String>,
    value: Option<Json>,
    device_kind: DeviceKind,
    event_category: EventCategory,
}

/// Classifies a JSON object payload per §4.3's decision table. Capability is
/// inferred from which recognized fields the payload carries, checked in an
/// order that prefers the most specific signal a device can report.
fn classify(payload: &Json) -> Classified {
    let obj = payload.as_object().expect("caller already checked is_object");

    if let Some(occupancy) = obj.get("occupancy") {
        let value = occupancy
            .as_bool()
            .unwrap_or_else(|| obj.get("action").and_then(Json::as_str) == Some("active"));
        return Classified {
            capability: "motion",
            event_type: "motion",
            event_sub_type: obj.get("action").and_then(Json::as_str).map(str::to_string),
            value: Some(Json::Bool(value)),
            device_kind: DeviceKind::Motion,
            event_category: EventCategory::Telemetry,
        };
    }

    if let Some(action) = obj.get("action").and_then(Json::as_str) {
        return Classified {
            capability: "button",
            event_type: "button",
            event_sub_type: Some(action.to_string()),
            value: Some(Json::Bool(true)),
            device_kind: DeviceKind::Button,
            event_category: EventCategory::Telemetry,
        };
    }

    if let Some(contact) = obj.get("contact").and_then(Json::as_bool) {
        return Classified {
            capability: "contact",
            event_type: "contact",
            event_sub_type: Some(if contact { "closed" } else { "open" }.to_string()),
            value: Some(Json::Bool(contact)),
            device_kind: DeviceKind::Contact,
            event_category: EventCategory::Telemetry,
        };
    }

    if let Some(state) = obj.get("state").and_then(Json::as_str) {
        let on = state.eq_ignore_ascii_case("ON");
        let kind = if obj.contains_key("brightness") || obj.contains_key("color_temp") {
            DeviceKind::Light
        } else {
            DeviceKind::Switch
        };
        return Classified {
            capability: "state",
            event_type: "state",
            event_sub_type: Some(state.to_ascii_lowercase()),
            value: Some(Json::Bool(on)),
            device_kind: kind,
            event_category: EventCategory::State,
        };
    }

    if let Some(temperature) = obj.get("temperature").and_then(Json::as_f64) {
        return Classified {
            capability: "temperature",
            event_type: "measurement",
            event_sub_type: None,
            value: Some(Json::from(temperature)),
            device_kind: DeviceKind::Thermometer,
            event_category: EventCategory::Telemetry,
        };
    }

    Classified {
        capability: "generic",
        event_type: "unknown",
        event_sub_type: None,
        value: None,
        device_kind: DeviceKind::Unknown,
        event_category: EventCategory::Telemetry,
    }
}

/// Maps a raw `(topic, payload)` pair into a `SignalEvent`. Returns `None`
/// when the payload is not a JSON object, or the topic is not a primary
/// per-device signal topic (bridge/management/sub-topics are the ingestion
/// worker's concern, routed separately per §4.1).
pub fn map(
    timestamp: DateTime<Utc>,
    topic: &str,
    base_topic: &str,
    payload: &[u8],
) -> Option<SignalEvent> {
    let device_id = device_id_from_topic(topic, base_topic)?;
    let parsed: Json = serde_json::from_slice(payload).ok()?;
    if !parsed.is_object() {
        return None;
    }

    let classified = classify(&parsed);
    SignalEvent::new(
        timestamp,
        "mqtt",
        device_id,
        classified.capability,
        classified.event_type,
        classified.event_sub_type,
        classified.value,
        topic,
        parsed,
        classified.device_kind,
        classified.event_category,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_object_payload() {
        assert!(map(Utc::now(), "sdhome/hallway", "sdhome", b"[1,2,3]").is_none());
    }

    #[test]
    fn rejects_bridge_and_subtopics() {
        let payload = br#"{"occupancy":true}"#;
        assert!(map(Utc::now(), "sdhome/bridge/event", "sdhome", payload).is_none());
        assert!(map(Utc::now(), "sdhome/hallway_light/set", "sdhome", payload).is_none());
    }

    #[test]
    fn classifies_motion_payload() {
        let payload = br#"{"occupancy":true,"battery":78,"linkquality":200}"#;
        let event = map(Utc::now(), "sdhome/hallway_motion", "sdhome", payload).unwrap();
        assert_eq!(event.capability, "motion");
        assert_eq!(event.event_type, "motion");
        assert_eq!(event.value, Some(Json::Bool(true)));
    }

    #[test]
    fn classifies_button_press() {
        let payload = br#"{"action":"double","battery":90}"#;
        let event = map(Utc::now(), "sdhome/kitchen_button", "sdhome", payload).unwrap();
        assert_eq!(event.capability, "button");
        assert_eq!(event.event_sub_type.as_deref(), Some("double"));
    }

    #[test]
    fn classifies_contact_sensor() {
        let payload = br#"{"contact":false,"battery":50}"#;
        let event = map(Utc::now(), "sdhome/frontdoor", "sdhome", payload).unwrap();
        assert_eq!(event.capability, "contact");
        assert_eq!(event.event_sub_type.as_deref(), Some("open"));
    }

    #[test]
    fn classifies_state_change() {
        let payload = br#"{"state":"ON","brightness":120}"#;
        let event = map(Utc::now(), "sdhome/hallway_light", "sdhome", payload).unwrap();
        assert_eq!(event.capability, "state");
        assert_eq!(event.device_kind, DeviceKind::Light);
        assert_eq!(event.event_category, EventCategory::State);
    }

    #[test]
    fn classifies_plain_temperature_sensor() {
        let payload = br#"{"temperature":21.4,"humidity":48}"#;
        let event = map(Utc::now(), "sdhome/sensor1", "sdhome", payload).unwrap();
        assert_eq!(event.capability, "temperature");
        assert_eq!(event.event_type, "measurement");
    }

    #[test]
    fn falls_back_to_generic() {
        let payload = br#"{"linkquality":180}"#;
        let event = map(Utc::now(), "sdhome/unknown_thing", "sdhome", payload).unwrap();
        assert_eq!(event.capability, "generic");
        assert_eq!(event.device_kind, DeviceKind::Unknown);
    }
}
