//! Shared redb handle used by every repository in this crate.
//!
//! One physical database file backs all entity tables (§6: "Persistence
//! layout (logical, not tied to any engine)") — repositories are thin views
//! over the same handle, not separate files.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use redb::Database;

use crate::error::{Error, Result};

static DB_SINGLETON: StdMutex<Option<Arc<Db>>> = StdMutex::new(None);

pub struct Db {
    pub(crate) inner: Database,
    path: String,
}

impl Db {
    /// Open (or create) the database at `path`. Repeated calls with the same
    /// path return the same handle rather than reopening the file, mirroring
    /// how `redb::Database` refuses concurrent opens of one file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        {
            let singleton = DB_SINGLETON.lock().unwrap();
            if let Some(db) = singleton.as_ref() {
                if db.path == path_str {
                    return Ok(db.clone());
                }
            }
        }

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let inner = if path.as_ref().exists() {
            Database::open(path.as_ref())?
        } else {
            Database::create(path.as_ref())?
        };

        let db = Arc::new(Db {
            inner,
            path: path_str,
        });
        *DB_SINGLETON.lock().unwrap() = Some(db.clone());
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_temp() -> (Arc<Self>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sdhome-test.redb");
        // Tests each want an isolated database, so bypass the process-wide
        // singleton entirely.
        let inner = Database::create(&path).unwrap();
        (
            Arc::new(Db {
                inner,
                path: path.to_string_lossy().to_string(),
            }),
            dir,
        )
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").field("path", &self.path).finish()
    }
}

pub(crate) fn map_not_found<T>(v: Option<T>, what: &str) -> Result<T> {
    v.ok_or_else(|| Error::NotFound(what.to_string()))
}
