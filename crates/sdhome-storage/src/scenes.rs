//! `Scene` storage (§3): CRUD by operator.

use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};
use sdhome_core::ids::SceneId;
use sdhome_core::model::Scene;

use crate::db::{map_not_found, Db};
use crate::error::Result;

const SCENES: TableDefinition<&str, &str> = TableDefinition::new("scenes");

pub struct SceneRepo {
    db: Arc<Db>,
}

impl SceneRepo {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn save(&self, scene: &Scene) -> Result<()> {
        let json = serde_json::to_string(scene)?;
        let write_txn = self.db.inner.begin_write()?;
        {
            let mut table = write_txn.open_table(SCENES)?;
            table.insert(scene.id.to_string().as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &SceneId) -> Result<Scene> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(SCENES)?;
        let raw = table.get(id.to_string().as_str())?.map(|v| v.value().to_string());
        let json = map_not_found(raw, "Scene")?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn list(&self) -> Result<Vec<Scene>> {
        let read_txn = self.db.inner.begin_read()?;
        let table = read_txn.open_table(SCENES)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            out.push(serde_json::from_str(value.value())?);
        }
        Ok(out)
    }

    pub fn delete(&self, id: &SceneId) -> Result<bool> {
        let write_txn = self.db.inner.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(SCENES)?;
            table.remove(id.to_string().as_str())?.is_some()
        };
        write_txn.commit()?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_get_delete_roundtrip() {
        let (db, _dir) = Db::open_temp();
        let repo = SceneRepo::new(db);
        let scene = Scene::new("Movie night");
        repo.save(&scene).unwrap();
        assert_eq!(repo.get(&scene.id).unwrap().name, "Movie night");
        assert!(repo.delete(&scene.id).unwrap());
        assert!(repo.get(&scene.id).is_err());
    }
}
