//! `SensorReading` storage (§3, §6): append-only, indexed by `deviceId` and
//! by `metric`, both timestamp-descending.

use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};
use sdhome_core::ids::DeviceId;
use sdhome_core::model::SensorReading;
use uuid::Uuid;

use crate::db::{map_not_found, Db};
use crate::error::Result;
use crate::sort_key::descending_key;

const READINGS: TableDefinition<&str, &str> = TableDefinition::new("sensor_readings");
const BY_DEVICE: TableDefinition<(&str, &str), &str> = TableDefinition::new("sensor_readings_by_device");
const BY_METRIC: TableDefinition<(&str, &str), &str> = TableDefinition::new("sensor_readings_by_metric");

pub struct SensorReadingRepo {
    db: Arc<Db>,
}

impl SensorReadingRepo {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn save(&self, reading: &SensorReading) -> Result<()> {
        let json = serde_json::to_string(reading)?;
        let id = reading.id.to_string();
        let sort_key = descending_key(reading.timestamp, &id);

        let write_txn = self.db.inner.begin_write()?;
        {
            let mut table = write_txn.open_table(READINGS)?;
            table.insert(id.as_str(), json.as_str())?;

            let mut by_device = write_txn.open_table(BY_DEVICE)?;
            by_device.insert((reading.device_id.as_str(), sort_key.as_str()), id.as_str())?;

            let mut by_metric = write_txn.open_table(BY_METRIC)?;
            by_metric.insert((reading.metric.as_str(), sort_key.as_str()), id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Result<SensorReading> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(READINGS)?;
        let raw = table.get(id.to_string().as_str())?.map(|v| v.value().to_string());
        let json = map_not_found(raw, "SensorReading")?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn list_by_device(&self, device_id: &DeviceId, limit: usize) -> Result<Vec<SensorReading>> {
        self.list_by_index(BY_DEVICE, device_id.as_str(), limit)
    }

    pub fn list_by_metric(&self, metric: &str, limit: usize) -> Result<Vec<SensorReading>> {
        self.list_by_index(BY_METRIC, metric, limit)
    }

    fn list_by_index(
        &self,
        index_table: TableDefinition<(&str, &str), &str>,
        key: &str,
        limit: usize,
    ) -> Result<Vec<SensorReading>> {
        let read_txn = self.db.inner.begin_read()?;
        let index = read_txn.open_table(index_table)?;
        let readings = read_txn.open_table(READINGS)?;

        let start = (key, "");
        let end = (key, "\x7F");
        let mut out = Vec::new();
        for entry in index.range(start..=end)? {
            if out.len() >= limit {
                break;
            }
            let (_, id_value) = entry?;
            if let Some(raw) = readings.get(id_value.value())? {
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

    fn sample(device: &str, metric: &str, value: f64) -> SensorReading {
        SensorReading {
            id: Uuid::new_v4(),
            signal_event_id: sdhome_core::ids::SignalEventId::new(),
            timestamp: Utc::now(),
            device_id: DeviceId::new(device),
            metric: metric.to_string(),
            value,
            unit: None,
        }
    }

    #[test]
    fn indexes_by_device_and_metric() {
        let (db, _dir) = Db::open_temp();
        let repo = SensorReadingRepo::new(db);
        repo.save(&sample("sensor1", "temperature", 21.5)).unwrap();
        repo.save(&sample("sensor1", "humidity", 40.0)).unwrap();
        repo.save(&sample("sensor2", "temperature", 19.0)).unwrap();

        let by_device = repo.list_by_device(&DeviceId::new("sensor1"), 10).unwrap();
        assert_eq!(by_device.len(), 2);

        let by_metric = repo.list_by_metric("temperature", 10).unwrap();
        assert_eq!(by_metric.len(), 2);
    }
}
