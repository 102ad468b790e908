//! `SignalEvent` storage (§3, §6): append-only, with a timestamp-descending
//! secondary index by `deviceId`.

use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};
use sdhome_core::ids::{DeviceId, SignalEventId};
use sdhome_core::model::SignalEvent;

use crate::db::{map_not_found, Db};
use crate::error::Result;
use crate::sort_key::descending_key;

const SIGNAL_EVENTS: TableDefinition<&str, &str> = TableDefinition::new("signal_events");
const BY_DEVICE: TableDefinition<(&str, &str), &str> = TableDefinition::new("signal_events_by_device");

pub struct SignalEventRepo {
    db: Arc<Db>,
}

impl SignalEventRepo {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Persist an event. Events are immutable once written (§3); this always
    /// inserts, it never updates an existing id.
    pub fn save(&self, event: &SignalEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let id = event.id.to_string();
        let sort_key = descending_key(event.timestamp, &id);

        let write_txn = self.db.inner.begin_write()?;
        {
            let mut table = write_txn.open_table(SIGNAL_EVENTS)?;
            table.insert(id.as_str(), json.as_str())?;

            let mut index = write_txn.open_table(BY_DEVICE)?;
            index.insert((event.device_id.as_str(), sort_key.as_str()), id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &SignalEventId) -> Result<SignalEvent> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(SIGNAL_EVENTS)?;
        let raw = table.get(id.to_string().as_str())?.map(|v| v.value().to_string());
        let json = map_not_found(raw, "SignalEvent")?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Most recent events for a device, newest first.
    pub fn list_by_device(&self, device_id: &DeviceId, limit: usize) -> Result<Vec<SignalEvent>> {
        let read_txn = self.db.inner.begin_read()?;
        let index = read_txn.open_table(BY_DEVICE)?;
        let events_table = read_txn.open_table(SIGNAL_EVENTS)?;

        let start = (device_id.as_str(), "");
        let end = (device_id.as_str(), "\x7F");
        let mut out = Vec::new();
        for entry in index.range(start..=end)? {
            if out.len() >= limit {
                break;
            }
            let (_, id_value) = entry?;
            if let Some(raw) = events_table.get(id_value.value())? {
                out.push(serde_json::from_str(raw.value())?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdhome_core::model::{DeviceKind, EventCategory};

    fn sample(device: &str, ts: chrono::DateTime<chrono::Utc>) -> SignalEvent {
        SignalEvent::new(
            ts,
            "mqtt",
            DeviceId::new(device),
            "motion",
            "motion",
            None,
            None,
            format!("sdhome/{device}"),
            serde_json::json!({"occupancy": true}),
            DeviceKind::Motion,
            EventCategory::Telemetry,
        )
        .unwrap()
    }

    #[test]
    fn save_and_get_roundtrip() {
        let (db, _dir) = Db::open_temp();
        let repo = SignalEventRepo::new(db);
        let event = sample("hallway", chrono::Utc::now());
        repo.save(&event).unwrap();
        let loaded = repo.get(&event.id).unwrap();
        assert_eq!(loaded.device_id, event.device_id);
    }

    #[test]
    fn list_by_device_is_newest_first() {
        let (db, _dir) = Db::open_temp();
        let repo = SignalEventRepo::new(db);
        let now = chrono::Utc::now();
        let older = sample("hallway", now - chrono::Duration::seconds(10));
        let newer = sample("hallway", now);
        repo.save(&older).unwrap();
        repo.save(&newer).unwrap();

        let list = repo.list_by_device(&DeviceId::new("hallway"), 10).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, newer.id);
        assert_eq!(list[1].id, older.id);
    }

    #[test]
    fn list_by_device_respects_limit() {
        let (db, _dir) = Db::open_temp();
        let repo = SignalEventRepo::new(db);
        let now = chrono::Utc::now();
        for i in 0..5 {
            repo.save(&sample("hallway", now + chrono::Duration::seconds(i))).unwrap();
        }
        let list = repo.list_by_device(&DeviceId::new("hallway"), 2).unwrap();
        assert_eq!(list.len(), 2);
    }
}
