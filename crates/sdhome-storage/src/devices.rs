//! `Device` storage (§3): keyed by `deviceId`, created on first sight and
//! never auto-deleted.

use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};
use sdhome_core::ids::DeviceId;
use sdhome_core::model::Device;

use crate::db::{map_not_found, Db};
use crate::error::Result;

const DEVICES: TableDefinition<&str, &str> = TableDefinition::new("devices");

pub struct DeviceRepo {
    db: Arc<Db>,
}

impl DeviceRepo {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn save(&self, device: &Device) -> Result<()> {
        let json = serde_json::to_string(device)?;
        let write_txn = self.db.inner.begin_write()?;
        {
            let mut table = write_txn.open_table(DEVICES)?;
            table.insert(device.device_id.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, device_id: &DeviceId) -> Result<Device> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(DEVICES)?;
        let raw = table.get(device_id.as_str())?.map(|v| v.value().to_string());
        let json = map_not_found(raw, "Device")?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn try_get(&self, device_id: &DeviceId) -> Result<Option<Device>> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(DEVICES)?;
        match table.get(device_id.as_str())? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<Device>> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(DEVICES)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            out.push(serde_json::from_str(value.value())?);
        }
        Ok(out)
    }

    pub fn delete(&self, device_id: &DeviceId) -> Result<bool> {
        let write_txn = self.db.inner.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(DEVICES)?;
            table.remove(device_id.as_str())?.is_some()
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    /// Apply last-writer-wins attribute merge and bump `lastSeen`/availability
    /// in one transaction, returning the updated device. Created on first
    /// sight if it doesn't yet exist (§3 lifecycle).
    pub fn upsert_seen(
        &self,
        device_id: &DeviceId,
        friendly_name: &str,
        incoming_attributes: &std::collections::HashMap<String, serde_json::Value>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Device> {
        let mut device = self
            .try_get(device_id)?
            .unwrap_or_else(|| Device::new(device_id.clone(), friendly_name));
        device.merge_attributes(incoming_attributes);
        device.last_seen = Some(now);
        device.is_available = true;
        self.save(&device)?;
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sight_creates_device() {
        let (db, _dir) = Db::open_temp();
        let repo = DeviceRepo::new(db);
        let mut attrs = std::collections::HashMap::new();
        attrs.insert("state".to_string(), serde_json::json!("ON"));
        let device = repo
            .upsert_seen(&DeviceId::new("lamp1"), "Lamp 1", &attrs, chrono::Utc::now())
            .unwrap();
        assert!(device.is_available);
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn delete_removes_device() {
        let (db, _dir) = Db::open_temp();
        let repo = DeviceRepo::new(db);
        let device = Device::new(DeviceId::new("lamp1"), "Lamp 1");
        repo.save(&device).unwrap();
        assert!(repo.delete(&device.device_id).unwrap());
        assert!(repo.try_get(&device.device_id).unwrap().is_none());
    }
}
