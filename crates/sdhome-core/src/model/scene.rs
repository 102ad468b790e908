//! `Scene` (§3).

use crate::ids::{DeviceId, SceneId};
use serde_json::Value as Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub name: String,
    /// `deviceId -> (property -> value)`, serialized as a JSON object.
    pub device_states: HashMap<DeviceId, HashMap<String, Json>>,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: SceneId::new(),
            name: name.into(),
            device_states: HashMap::new(),
        }
    }

    /// Every `(deviceId, property)` pair this scene would set, in a stable
    /// order — used by `ActivateScene` to attempt each pair exactly once
    /// (§8 invariant 7).
    pub fn device_property_pairs(&self) -> Vec<(&DeviceId, &str, &Json)> {
        let mut pairs: Vec<(&DeviceId, &str, &Json)> = self
            .device_states
            .iter()
            .flat_map(|(device_id, props)| {
                props
                    .iter()
                    .map(move |(prop, value)| (device_id, prop.as_str(), value))
            })
            .collect();
        pairs.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()).then(a.1.cmp(b.1)));
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_property_pairs_covers_every_pair_once() {
        let mut scene = Scene::new("Morning");
        let mut light_props = HashMap::new();
        light_props.insert("state".to_string(), Json::String("ON".to_string()));
        light_props.insert("brightness".to_string(), Json::from(80));
        scene.device_states.insert(DeviceId::new("hallway_light"), light_props);

        let pairs = scene.device_property_pairs();
        assert_eq!(pairs.len(), 2);
    }
}
