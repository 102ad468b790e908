//! `TriggerEvent` storage (§3, §6): append-only, indexed by `deviceId` and by
//! `triggerType`, both timestamp-descending. This is the table the
//! automation engine reads to match triggers (§4.5.1).

use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};
use sdhome_core::ids::DeviceId;
use sdhome_core::model::TriggerEvent;
use uuid::Uuid;

use crate::db::{map_not_found, Db};
use crate::error::Result;
use crate::sort_key::descending_key;

const EVENTS: TableDefinition<&str, &str> = TableDefinition::new("trigger_events");
const BY_DEVICE: TableDefinition<(&str, &str), &str> = TableDefinition::new("trigger_events_by_device");
const BY_TYPE: TableDefinition<(&str, &str), &str> = TableDefinition::new("trigger_events_by_type");

pub struct TriggerEventRepo {
    db: Arc<Db>,
}

impl TriggerEventRepo {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn save(&self, event: &TriggerEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let id = event.id.to_string();
        let sort_key = descending_key(event.timestamp, &id);

        let write_txn = self.db.inner.begin_write()?;
        {
            let mut table = write_txn.open_table(EVENTS)?;
            table.insert(id.as_str(), json.as_str())?;

            let mut by_device = write_txn.open_table(BY_DEVICE)?;
            by_device.insert((event.device_id.as_str(), sort_key.as_str()), id.as_str())?;

            let mut by_type = write_txn.open_table(BY_TYPE)?;
            by_type.insert((event.trigger_type.as_str(), sort_key.as_str()), id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Result<TriggerEvent> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(EVENTS)?;
        let raw = table.get(id.to_string().as_str())?.map(|v| v.value().to_string());
        let json = map_not_found(raw, "TriggerEvent")?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn list_by_device(&self, device_id: &DeviceId, limit: usize) -> Result<Vec<TriggerEvent>> {
        self.list_by_index(BY_DEVICE, device_id.as_str(), limit)
    }

    pub fn list_by_type(&self, trigger_type: &str, limit: usize) -> Result<Vec<TriggerEvent>> {
        self.list_by_index(BY_TYPE, trigger_type, limit)
    }

    fn list_by_index(
        &self,
        index_table: TableDefinition<(&str, &str), &str>,
        key: &str,
        limit: usize,
    ) -> Result<Vec<TriggerEvent>> {
        let read_txn = self.db.inner.begin_read()?;
        let index = read_txn.open_table(index_table)?;
        let events = read_txn.open_table(EVENTS)?;

        let start = (key, "");
        let end = (key, "\x7F");
        let mut out = Vec::new();
        for entry in index.range(start..=end)? {
            if out.len() >= limit {
                break;
            }
            let (_, id_value) = entry?;
            if let Some(raw) = events.get(id_value.value())? {
                out.push(serde_json::from_str(raw.value())?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(device: &str, trigger_type: &str) -> TriggerEvent {
        TriggerEvent {
            id: Uuid::new_v4(),
            signal_event_id: sdhome_core::ids::SignalEventId::new(),
            timestamp: Utc::now(),
            device_id: DeviceId::new(device),
            capability: "motion".to_string(),
            trigger_type: trigger_type.to_string(),
            trigger_sub_type: None,
            value: Some(true),
        }
    }

    #[test]
    fn fingerprint_lookup_by_type() {
        let (db, _dir) = Db::open_temp();
        let repo = TriggerEventRepo::new(db);
        repo.save(&sample("motion1", "motion")).unwrap();
        repo.save(&sample("button1", "button")).unwrap();

        let motions = repo.list_by_type("motion", 10).unwrap();
        assert_eq!(motions.len(), 1);
        assert_eq!(motions[0].device_id, DeviceId::new("motion1"));
    }
}
