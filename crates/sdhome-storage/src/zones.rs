//! `Zone` storage (§3): a tree of rooms/areas, keyed by an auto-incrementing
//! integer id.

use std::sync::{atomic::{AtomicI64, Ordering}, Arc};

use redb::{ReadableTable, TableDefinition};
use sdhome_core::ids::ZoneId;
use sdhome_core::model::Zone;

use crate::db::{map_not_found, Db};
use crate::error::{Error, Result};

const ZONES: TableDefinition<i64, &str> = TableDefinition::new("zones");

pub struct ZoneRepo {
    db: Arc<Db>,
    next_id: AtomicI64,
}

impl ZoneRepo {
    pub fn new(db: Arc<Db>) -> Result<Self> {
        let max_id = {
            let read_txn = db.inner.begin_read()?;
            let table = read_txn.open_table(ZONES)?;
            table.iter()?.filter_map(|e| e.ok()).map(|(k, _)| k.value()).max().unwrap_or(0)
        };
        Ok(Self {
            db,
            next_id: AtomicI64::new(max_id + 1),
        })
    }

    /// Creates a zone, assigning it the next free id. Rejects a `parentZoneId`
    /// that would create a cycle (§3 invariant: "a zone cannot have itself as
    /// ancestor").
    pub fn create(&self, mut zone: Zone) -> Result<Zone> {
        if let Some(parent) = zone.parent_zone_id {
            self.assert_no_cycle(parent, None)?;
        }
        zone.id = ZoneId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.save(&zone)?;
        Ok(zone)
    }

    pub fn save(&self, zone: &Zone) -> Result<()> {
        if let Some(parent) = zone.parent_zone_id {
            self.assert_no_cycle(parent, Some(zone.id))?;
        }
        let json = serde_json::to_string(zone)?;
        let write_txn = self.db.inner.begin_write()?;
        {
            let mut table = write_txn.open_table(ZONES)?;
            table.insert(zone.id.0, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: ZoneId) -> Result<Zone> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(ZONES)?;
        let raw = table.get(id.0)?.map(|v| v.value().to_string());
        let json = map_not_found(raw, "Zone")?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn try_get(&self, id: ZoneId) -> Result<Option<Zone>> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(ZONES)?;
        match table.get(id.0)? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<Zone>> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(ZONES)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            out.push(serde_json::from_str(value.value())?);
        }
        out.sort_by_key(|z: &Zone| z.id.0);
        Ok(out)
    }

    /// Deletes a zone. `reparent_to_grandparent` selects between §3's two
    /// delete behaviors: descendants either re-parent to this zone's parent,
    /// or become roots.
    pub fn delete(&self, id: ZoneId, reparent_to_grandparent: bool) -> Result<()> {
        let zone = self.get(id)?;
        let new_parent = if reparent_to_grandparent {
            zone.parent_zone_id
        } else {
            None
        };

        let mut all = self.list()?;
        for child in all.iter_mut().filter(|z| z.parent_zone_id == Some(id)) {
            child.parent_zone_id = new_parent;
        }

        let write_txn = self.db.inner.begin_write()?;
        {
            let mut table = write_txn.open_table(ZONES)?;
            for child in all.iter().filter(|z| z.id != id) {
                let json = serde_json::to_string(child)?;
                table.insert(child.id.0, json.as_str())?;
            }
            table.remove(id.0)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn assert_no_cycle(&self, parent: ZoneId, self_id: Option<ZoneId>) -> Result<()> {
        let mut current = Some(parent);
        let mut hops = 0;
        while let Some(id) = current {
            if Some(id) == self_id {
                return Err(Error::InvalidInput(
                    "zone parent chain would cycle back to itself".to_string(),
                ));
            }
            hops += 1;
            if hops > 10_000 {
                return Err(Error::InvalidInput("zone parent chain too deep".to_string()));
            }
            current = self.try_get(id)?.and_then(|z| z.parent_zone_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(name: &str) -> Zone {
        Zone {
            id: ZoneId(0),
            name: name.to_string(),
            parent_zone_id: None,
            icon: None,
            color: None,
            sort_order: 0,
        }
    }

    #[test]
    fn create_assigns_incrementing_ids() {
        let (db, _dir) = Db::open_temp();
        let repo = ZoneRepo::new(db).unwrap();
        let a = repo.create(zone("Home")).unwrap();
        let b = repo.create(zone("Upstairs")).unwrap();
        assert!(b.id.0 > a.id.0);
    }

    #[test]
    fn self_parent_is_rejected() {
        let (db, _dir) = Db::open_temp();
        let repo = ZoneRepo::new(db).unwrap();
        let root = repo.create(zone("Home")).unwrap();
        let mut cyclic = root.clone();
        cyclic.parent_zone_id = Some(root.id);
        assert!(repo.save(&cyclic).is_err());
    }

    #[test]
    fn delete_reparents_descendants_to_grandparent() {
        let (db, _dir) = Db::open_temp();
        let repo = ZoneRepo::new(db).unwrap();
        let root = repo.create(zone("Home")).unwrap();
        let mut mid = zone("Floor1");
        mid.parent_zone_id = Some(root.id);
        let mid = repo.create(mid).unwrap();
        let mut leaf = zone("Kitchen");
        leaf.parent_zone_id = Some(mid.id);
        let leaf = repo.create(leaf).unwrap();

        repo.delete(mid.id, true).unwrap();

        let reloaded = repo.get(leaf.id).unwrap();
        assert_eq!(reloaded.parent_zone_id, Some(root.id));
    }

    #[test]
    fn delete_can_make_descendants_roots() {
        let (db, _dir) = Db::open_temp();
        let repo = ZoneRepo::new(db).unwrap();
        let root = repo.create(zone("Home")).unwrap();
        let mut leaf = zone("Kitchen");
        leaf.parent_zone_id = Some(root.id);
        let leaf = repo.create(leaf).unwrap();

        repo.delete(root.id, false).unwrap();

        let reloaded = repo.get(leaf.id).unwrap();
        assert_eq!(reloaded.parent_zone_id, None);
    }
}
