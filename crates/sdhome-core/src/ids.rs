//! Identifier newtypes.
//!
//! Most entities key on an opaque uuid; `DeviceId` is the one exception the
//! data model calls out — it is the user-visible friendly name, not a uuid.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn parse_str(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(SignalEventId);
uuid_id!(RuleId);
uuid_id!(TriggerId);
uuid_id!(ConditionId);
uuid_id!(ActionId);
uuid_id!(ExecutionLogId);
uuid_id!(SceneId);

/// The device's friendly name. User-visible, stable for the device's
/// lifetime, used as the primary key in persistence and as the last segment
/// of its MQTT topics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(friendly_name: impl Into<String>) -> Self {
        Self(friendly_name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Zone ids are small integers assigned by the operator-facing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub i64);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        assert_ne!(RuleId::new(), RuleId::new());
    }

    #[test]
    fn device_id_from_str() {
        let id: DeviceId = "hallway_motion".into();
        assert_eq!(id.as_str(), "hallway_motion");
    }

    #[test]
    fn rule_id_roundtrips_through_string() {
        let id = RuleId::new();
        let parsed = RuleId::parse_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }
}
