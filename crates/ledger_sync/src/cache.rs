//! Local cache of the last-known value per collection
//!
//! Backs instant UI rendering before any network round trip completes. It is
//! a cache, not the source of truth: the remote document wins on the next
//! successful sync.

use crate::store::LocalStore;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

/// Last observed value of one collection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub collection: String,
    pub value: Value,
    pub fetched_at: DateTime<Utc>,
}

/// SQLite-backed cache scoped to one user
#[derive(Clone)]
pub struct LocalCache {
    store: LocalStore,
    user_id: String,
}

impl LocalCache {
    pub fn new(store: LocalStore, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
        }
    }

    /// Primary key: `{userId}-{collectionName}`
    fn key(&self, collection: &str) -> String {
        format!("{}-{}", self.user_id, collection)
    }

    pub fn read(&self, collection: &str) -> crate::Result<Option<CacheEntry>> {
        let row: Option<(String, i64)> = self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT data, timestamp FROM cache WHERE key = ?1",
                params![self.key(collection)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })?;

        let Some((data, timestamp)) = row else {
            tracing::trace!("Cache MISS: {}", collection);
            return Ok(None);
        };

        let value = serde_json::from_str(&data).map_err(|e| crate::SyncError::CorruptRecord {
            id: self.key(collection),
            reason: format!("cached data is not JSON: {}", e),
        })?;
        let fetched_at = Utc
            .timestamp_millis_opt(timestamp)
            .single()
            .unwrap_or_else(Utc::now);

        tracing::trace!("Cache HIT: {}", collection);
        Ok(Some(CacheEntry {
            collection: collection.to_string(),
            value,
            fetched_at,
        }))
    }

    /// Overwrite unconditionally; the row is replaced in one statement
    pub fn write(&self, collection: &str, value: &Value) -> crate::Result<CacheEntry> {
        let fetched_at = Utc::now();
        let data = serde_json::to_string(value)?;

        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cache (key, user_id, collection, data, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    self.key(collection),
                    self.user_id,
                    collection,
                    data,
                    fetched_at.timestamp_millis()
                ],
            )
        })?;

        Ok(CacheEntry {
            collection: collection.to_string(),
            value: value.clone(),
            fetched_at,
        })
    }

    pub fn clear(&self, collection: &str) -> crate::Result<()> {
        self.store.with_conn(|conn| {
            conn.execute("DELETE FROM cache WHERE key = ?1", params![self.key(collection)])
        })?;
        tracing::debug!("Invalidated cache for {}", collection);
        Ok(())
    }

    /// Remove every entry of this user (logout)
    pub fn clear_all(&self) -> crate::Result<usize> {
        let removed = self.store.with_conn(|conn| {
            conn.execute("DELETE FROM cache WHERE user_id = ?1", params![self.user_id])
        })?;
        tracing::info!("Cache cleared ({} collections)", removed);
        Ok(removed)
    }

    /// Names of cached collections
    pub fn collections(&self) -> crate::Result<Vec<String>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT collection FROM cache WHERE user_id = ?1 ORDER BY collection",
            )?;
            let names = stmt
                .query_map(params![self.user_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use serde_json::json;

    fn cache() -> LocalCache {
        LocalCache::new(LocalStore::open_in_memory().unwrap(), "user-1")
    }

    #[test]
    fn test_read_absent() {
        assert!(cache().read("deliveryLogs").unwrap().is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let cache = cache();
        cache.write("settings", &json!({"currency": "USD"})).unwrap();
        cache.write("settings", &json!({"currency": "EUR"})).unwrap();

        let entry = cache.read("settings").unwrap().unwrap();
        assert_eq!(entry.value, json!({"currency": "EUR"}));
        assert_eq!(entry.collection, "settings");
    }

    #[test]
    fn test_clear_single_and_all() {
        let cache = cache();
        cache.write("settings", &json!({})).unwrap();
        cache.write("expenses", &json!([])).unwrap();

        cache.clear("settings").unwrap();
        cache.clear("settings").unwrap();
        assert!(cache.read("settings").unwrap().is_none());
        assert_eq!(cache.collections().unwrap(), vec!["expenses"]);

        assert_eq!(cache.clear_all().unwrap(), 1);
        assert!(cache.collections().unwrap().is_empty());
    }

    #[test]
    fn test_users_do_not_share_entries() {
        let store = LocalStore::open_in_memory().unwrap();
        let alice = LocalCache::new(store.clone(), "alice");
        let bob = LocalCache::new(store, "bob");

        alice.write("settings", &json!({"owner": "alice"})).unwrap();
        assert!(bob.read("settings").unwrap().is_none());
        bob.clear_all().unwrap();
        assert!(alice.read("settings").unwrap().is_some());
    }

    #[test]
    fn test_persists_across_sessions() {
        let temp = assert_fs::TempDir::new().unwrap();
        let db = temp.child("ledger.db");

        {
            let cache = LocalCache::new(LocalStore::open(db.path()).unwrap(), "user-1");
            cache.write("deliveryLogs", &json!([{"id": "a"}])).unwrap();
        }

        let cache = LocalCache::new(LocalStore::open(db.path()).unwrap(), "user-1");
        let entry = cache.read("deliveryLogs").unwrap().unwrap();
        assert_eq!(entry.value, json!([{"id": "a"}]));
    }
}
