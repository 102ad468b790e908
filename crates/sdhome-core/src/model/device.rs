//! `Device` and `Zone` (§3).

use crate::ids::{DeviceId, ZoneId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::{HashMap, HashSet};

/// Operator-assigned device category, distinct from `DeviceKind` (which is
/// inferred per-message by the mapper).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Light,
    Switch,
    Sensor,
    Climate,
    Lock,
    Cover,
    Fan,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub friendly_name: String,
    pub display_name: Option<String>,
    pub ieee_address: Option<String>,
    pub model_id: Option<String>,
    pub manufacturer: Option<String>,
    pub description: Option<String>,
    pub power_source: bool,
    pub device_type: Option<DeviceType>,
    pub zone_id: Option<ZoneId>,
    pub capabilities: HashSet<String>,
    pub attributes: HashMap<String, Json>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_available: bool,
    pub link_quality: Option<i32>,
}

impl Device {
    pub fn new(device_id: DeviceId, friendly_name: impl Into<String>) -> Self {
        let friendly_name = friendly_name.into();
        Self {
            device_id,
            friendly_name,
            display_name: None,
            ieee_address: None,
            model_id: None,
            manufacturer: None,
            description: None,
            power_source: false,
            device_type: None,
            zone_id: None,
            capabilities: HashSet::new(),
            attributes: HashMap::new(),
            last_seen: None,
            is_available: false,
            link_quality: None,
        }
    }

    /// `displayName` falls back to `friendlyName` per the data-model invariant.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.friendly_name)
    }

    /// Merge a set of raw attributes into `attributes`, last-writer-wins per
    /// key, returning the keys whose value actually changed (§4.4).
    pub fn merge_attributes(&mut self, incoming: &HashMap<String, Json>) -> Vec<String> {
        let mut changed = Vec::new();
        for (key, value) in incoming {
            let differs = match self.attributes.get(key) {
                Some(existing) => existing != value,
                None => true,
            };
            if differs {
                changed.push(key.clone());
                self.attributes.insert(key.clone(), value.clone());
            }
        }
        changed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub parent_zone_id: Option<ZoneId>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub sort_order: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_friendly_name() {
        let device = Device::new(DeviceId::new("hallway_light"), "hallway_light");
        assert_eq!(device.display_name(), "hallway_light");
    }

    #[test]
    fn merge_attributes_is_last_writer_wins_and_reports_changes() {
        let mut device = Device::new(DeviceId::new("d1"), "d1");
        let mut first = HashMap::new();
        first.insert("state".to_string(), Json::String("ON".to_string()));
        let changed = device.merge_attributes(&first);
        assert_eq!(changed, vec!["state".to_string()]);

        let mut second = HashMap::new();
        second.insert("state".to_string(), Json::String("ON".to_string()));
        let changed_again = device.merge_attributes(&second);
        assert!(changed_again.is_empty(), "unchanged values should not be reported");

        let mut third = HashMap::new();
        third.insert("state".to_string(), Json::String("OFF".to_string()));
        let changed_third = device.merge_attributes(&third);
        assert_eq!(changed_third, vec!["state".to_string()]);
        assert_eq!(device.attributes.get("state"), Some(&Json::String("OFF".to_string())));
    }
}
