//! redb-backed persistence for every entity in the data model (§3), plus the
//! logical layout §6 describes: one physical database, one table per entity
//! (or per entity + its secondary indexes).

pub mod db;
pub mod devices;
pub mod error;
pub mod rules;
pub mod scenes;
pub mod sensor_readings;
pub mod signal_events;
mod sort_key;
pub mod trigger_events;
pub mod zones;

pub use db::Db;
pub use error::{Error, Result};

use std::path::Path;
use std::sync::Arc;

use devices::DeviceRepo;
use rules::RuleRepo;
use scenes::SceneRepo;
use sensor_readings::SensorReadingRepo;
use signal_events::SignalEventRepo;
use trigger_events::TriggerEventRepo;
use zones::ZoneRepo;

/// Opens every repository against one database file. This is the handle
/// `sdhome-app`'s composition root wires into the pipeline and automation
/// crates.
pub struct Store {
    pub signal_events: SignalEventRepo,
    pub sensor_readings: SensorReadingRepo,
    pub trigger_events: TriggerEventRepo,
    pub devices: DeviceRepo,
    pub zones: ZoneRepo,
    pub rules: RuleRepo,
    pub scenes: SceneRepo,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Db::open(path)?;
        Ok(Self {
            signal_events: SignalEventRepo::new(db.clone()),
            sensor_readings: SensorReadingRepo::new(db.clone()),
            trigger_events: TriggerEventRepo::new(db.clone()),
            devices: DeviceRepo::new(db.clone()),
            zones: ZoneRepo::new(db.clone())?,
            rules: RuleRepo::new(db.clone()),
            scenes: SceneRepo::new(db),
        })
    }

    #[cfg(test)]
    pub fn open_temp() -> (Self, tempfile::TempDir) {
        let (db, dir) = Db::open_temp();
        let store = Self {
            signal_events: SignalEventRepo::new(db.clone()),
            sensor_readings: SensorReadingRepo::new(db.clone()),
            trigger_events: TriggerEventRepo::new(db.clone()),
            devices: DeviceRepo::new(db.clone()),
            zones: ZoneRepo::new(db.clone()).unwrap(),
            rules: RuleRepo::new(db.clone()),
            scenes: SceneRepo::new(db),
        };
        (store, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdhome_core::ids::DeviceId;
    use sdhome_core::model::Device;

    #[test]
    fn store_opens_all_repositories_against_one_file() {
        let (store, _dir) = Store::open_temp();
        store.devices.save(&Device::new(DeviceId::new("d1"), "d1")).unwrap();
        assert_eq!(store.devices.list().unwrap().len(), 1);
        assert!(store.zones.list().unwrap().is_empty());
    }
}
