//! SQLite file holding both local record stores

use parking_lot::Mutex;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared handle to the local SQLite database.
///
/// Cloning is cheap; every clone talks to the same connection. Each queue or
/// cache mutation is a single statement, so concurrent callers are serialized
/// by the connection lock and SQLite's own atomicity.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        // WAL + FULL sync: a write that returned is on disk
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Store that lives only as long as the process
    pub fn open_in_memory() -> crate::Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> crate::Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;

        match &path {
            Some(p) => tracing::info!("Local store opened at {:?}", p),
            None => tracing::debug!("In-memory local store opened"),
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> crate::Result<T> {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp = assert_fs::TempDir::new().unwrap();
        let db = temp.child("nested/dir/ledger.db");

        let store = LocalStore::open(db.path()).unwrap();
        assert!(db.path().exists());
        assert_eq!(store.path(), Some(db.path()));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let temp = assert_fs::TempDir::new().unwrap();
        let db = temp.child("ledger.db");

        LocalStore::open(db.path()).unwrap();
        let reopened = LocalStore::open(db.path()).unwrap();

        let tables: i64 = reopened
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('queue', 'cache')",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_garbage_file_is_storage_failure() {
        let temp = assert_fs::TempDir::new().unwrap();
        let db = temp.child("ledger.db");
        db.write_binary(&[0xde; 4096]).unwrap();

        let err = LocalStore::open(db.path()).err().unwrap();
        assert!(err.is_storage_failure());
    }
}
