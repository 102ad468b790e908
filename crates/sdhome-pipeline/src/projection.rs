//! Projection Service (§4.3): derives zero or more `SensorReading`s and at
//! most one `TriggerEvent` from an accepted `SignalEvent`, by capability.
//!
//! Numeric parsing is lenient per §4.3: a missing field is skipped, a field
//! present with the wrong shape is skipped silently — this never fails.

use sdhome_core::model::{SensorReading, SignalEvent, TriggerEvent};
use serde_json::Value as Json;
use uuid::Uuid;

fn reading(signal: &SignalEvent, metric: &str, unit: Option<&str>, value: f64) -> SensorReading {
    SensorReading {
        id: Uuid::new_v4(),
        signal_event_id: signal.id,
        timestamp: signal.timestamp,
        device_id: signal.device_id.clone(),
        metric: metric.to_string(),
        value,
        unit: unit.map(str::to_string),
    }
}

fn push_numeric(out: &mut Vec<SensorReading>, signal: &SignalEvent, obj: &serde_json::Map<String, Json>, field: &str, metric: &str, unit: Option<&str>) {
    if let Some(v) = obj.get(field).and_then(Json::as_f64) {
        out.push(reading(signal, metric, unit, v));
    }
}

/// Readings common to nearly every capability: battery, link quality, and
/// voltage (stored as volts after dividing the raw millivolt reading).
fn common_readings(signal: &SignalEvent, obj: &serde_json::Map<String, Json>) -> Vec<SensorReading> {
    let mut out = Vec::new();
    push_numeric(&mut out, signal, obj, "battery", "battery", Some("%"));
    push_numeric(&mut out, signal, obj, "linkquality", "linkquality", None);
    if let Some(mv) = obj.get("voltage").and_then(Json::as_f64) {
        out.push(reading(signal, "voltage", Some("V"), mv / 1000.0));
    }
    out
}

fn trigger(signal: &SignalEvent, trigger_type: &str, sub_type: Option<String>, value: Option<bool>) -> TriggerEvent {
    TriggerEvent {
        id: Uuid::new_v4(),
        signal_event_id: signal.id,
        timestamp: signal.timestamp,
        device_id: signal.device_id.clone(),
        capability: signal.capability.clone(),
        trigger_type: trigger_type.to_string(),
        trigger_sub_type: sub_type,
        value,
    }
}

/// Projects a `SignalEvent` into its derived readings and (at most one)
/// trigger event, following §4.3's decision table exactly.
pub fn project(signal: &SignalEvent) -> (Vec<SensorReading>, Option<TriggerEvent>) {
    let obj = match signal.raw_payload.as_object() {
        Some(obj) => obj,
        None => return (Vec::new(), None),
    };

    match signal.capability.as_str() {
        "motion" => {
            let mut readings = common_readings(signal, obj);
            push_numeric(&mut readings, signal, obj, "device_temperature", "temperature", Some("°C"));
            push_numeric(&mut readings, signal, obj, "illuminance", "illuminance", Some("lx"));

            let value = obj
                .get("occupancy")
                .and_then(Json::as_bool)
                .unwrap_or_else(|| signal.event_sub_type.as_deref() == Some("active"));
            let trig = trigger(signal, "motion", signal.event_sub_type.clone(), Some(value));
            (readings, Some(trig))
        }
        "button" => {
            let readings = common_readings(signal, obj);
            let trig = trigger(signal, "button", signal.event_sub_type.clone(), Some(true));
            (readings, Some(trig))
        }
        "temperature" => {
            let mut readings = common_readings(signal, obj);
            push_numeric(&mut readings, signal, obj, "temperature", "temperature", Some("°C"));
            push_numeric(&mut readings, signal, obj, "humidity", "humidity", Some("%"));
            push_numeric(&mut readings, signal, obj, "pressure", "pressure", Some("hPa"));
            (readings, None)
        }
        "contact" => {
            let readings = common_readings(signal, obj);
            let contact = obj.get("contact").and_then(Json::as_bool);
            let sub_type = contact.map(|c| if c { "closed" } else { "open" }.to_string());
            let trig = trigger(signal, "contact", sub_type, contact);
            (readings, Some(trig))
        }
        "state" => {
            let mut readings = Vec::new();
            push_numeric(&mut readings, signal, obj, "brightness", "brightness", None);
            push_numeric(&mut readings, signal, obj, "power", "power", Some("W"));
            push_numeric(&mut readings, signal, obj, "energy", "energy", Some("kWh"));

            let on = obj.get("state").and_then(Json::as_str).map(|s| s.eq_ignore_ascii_case("ON"));
            let sub_type = obj.get("state").and_then(Json::as_str).map(|s| s.to_ascii_lowercase());
            let trig = trigger(signal, "state", sub_type, on);
            (readings, Some(trig))
        }
        _ => (common_readings(signal, obj), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sdhome_core::ids::DeviceId;
    use sdhome_core::model::{DeviceKind, EventCategory};

    fn signal(capability: &str, event_sub_type: Option<&str>, payload: Json) -> SignalEvent {
        SignalEvent::new(
            Utc::now(),
            "mqtt",
            DeviceId::new("d1"),
            capability,
            capability,
            event_sub_type.map(str::to_string),
            None,
            "sdhome/d1",
            payload,
            DeviceKind::Unknown,
            EventCategory::Telemetry,
        )
        .unwrap()
    }

    #[test]
    fn motion_projects_trigger_and_common_readings() {
        let signal = signal(
            "motion",
            None,
            serde_json::json!({"occupancy": true, "battery": 78, "linkquality": 200}),
        );
        let (readings, trig) = project(&signal);
        assert_eq!(readings.len(), 2);
        let trig = trig.unwrap();
        assert_eq!(trig.trigger_type, "motion");
        assert_eq!(trig.value, Some(true));
    }

    #[test]
    fn temperature_projects_no_trigger() {
        let signal = signal("temperature", None, serde_json::json!({"temperature": 21.4, "humidity": 48.0}));
        let (readings, trig) = project(&signal);
        assert_eq!(readings.len(), 2);
        assert!(trig.is_none());
    }

    #[test]
    fn voltage_is_normalized_from_millivolts() {
        let signal = signal("button", Some("single"), serde_json::json!({"action": "single", "voltage": 3000}));
        let (readings, _) = project(&signal);
        let voltage = readings.iter().find(|r| r.metric == "voltage").unwrap();
        assert_eq!(voltage.value, 3.0);
    }

    #[test]
    fn contact_trigger_subtype_reflects_open_closed() {
        let signal = signal("contact", None, serde_json::json!({"contact": false}));
        let (_, trig) = project(&signal);
        assert_eq!(trig.unwrap().trigger_sub_type.as_deref(), Some("open"));
    }

    #[test]
    fn malformed_numeric_fields_are_skipped_not_fatal() {
        let signal = signal("temperature", None, serde_json::json!({"temperature": "not-a-number"}));
        let (readings, _) = project(&signal);
        assert!(readings.is_empty());
    }
}
