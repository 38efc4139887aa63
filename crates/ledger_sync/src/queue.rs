//! Local durable queue of pending mutations

use crate::store::LocalStore;
use crate::SyncError;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kind of mutation a queue entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

/// A single pending mutation.
///
/// `payload` is the full intended state of the collection document, never a
/// delta. Applying an entry replaces the remote document with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,
    /// Creation time, epoch milliseconds
    pub timestamp: i64,
    pub operation: Operation,
    pub collection: String,
    pub payload: Value,
    pub retry_count: u32,
}

impl QueueEntry {
    /// Value written to the remote document when this entry is applied
    pub fn document_value(&self) -> Value {
        match self.operation {
            Operation::Delete => Value::Null,
            Operation::Create | Operation::Update => self.payload.clone(),
        }
    }
}

/// Persistent, crash-safe store of pending mutations.
///
/// Only the sync engine writes through this interface.
pub trait QueueStore: Send + Sync {
    /// Append a mutation. Fails only when the local store itself fails.
    fn enqueue(&self, operation: Operation, collection: &str, payload: Value)
        -> crate::Result<QueueEntry>;

    /// Every pending entry, oldest first
    fn list_pending(&self) -> crate::Result<Vec<QueueEntry>>;

    /// Pending entries of one collection, oldest first
    fn list_pending_for(&self, collection: &str) -> crate::Result<Vec<QueueEntry>>;

    /// Oldest pending entry of one collection
    fn head_for(&self, collection: &str) -> crate::Result<Option<QueueEntry>>;

    /// Remove an entry; returns false for unknown ids
    fn remove(&self, id: &str) -> crate::Result<bool>;

    /// Bump the retry counter; returns the new count, `None` for unknown ids
    fn increment_retry(&self, id: &str) -> crate::Result<Option<u32>>;

    fn count(&self) -> crate::Result<usize>;

    fn count_for(&self, collection: &str) -> crate::Result<usize>;

    /// Collections with at least one pending entry, by age of their oldest entry
    fn pending_collections(&self) -> crate::Result<Vec<String>>;

    /// Drop every pending entry; returns how many were removed
    fn clear(&self) -> crate::Result<usize>;
}

const SELECT_ENTRY: &str =
    "SELECT id, timestamp, operation, collection, payload, retry_count FROM queue";

/// Raw column values before decoding
struct EntryRow {
    id: String,
    timestamp: i64,
    operation: String,
    collection: String,
    payload: String,
    retry_count: i64,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            operation: row.get(2)?,
            collection: row.get(3)?,
            payload: row.get(4)?,
            retry_count: row.get(5)?,
        })
    }

    fn decode(self) -> crate::Result<QueueEntry> {
        let operation = self.operation.parse().map_err(|reason| SyncError::CorruptRecord {
            id: self.id.clone(),
            reason,
        })?;
        let payload = serde_json::from_str(&self.payload).map_err(|e| SyncError::CorruptRecord {
            id: self.id.clone(),
            reason: format!("payload is not JSON: {}", e),
        })?;

        Ok(QueueEntry {
            id: self.id,
            timestamp: self.timestamp,
            operation,
            collection: self.collection,
            payload,
            retry_count: self.retry_count.max(0) as u32,
        })
    }
}

/// SQLite-backed [`QueueStore`] scoped to one user
#[derive(Clone)]
pub struct DurableQueue {
    store: LocalStore,
    user_id: String,
}

impl DurableQueue {
    pub fn new(store: LocalStore, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn query_entries(&self, sql: &str, collection: Option<&str>) -> crate::Result<Vec<QueueEntry>> {
        let rows = self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = match collection {
                Some(c) => stmt
                    .query_map(params![self.user_id, c], EntryRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map(params![self.user_id], EntryRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })?;

        rows.into_iter().map(EntryRow::decode).collect()
    }
}

/// Sortable id: zero-padded timestamp plus a random suffix
fn new_entry_id(timestamp: i64) -> String {
    format!("{:013}-{:08x}", timestamp, rand::random::<u32>())
}

impl QueueStore for DurableQueue {
    fn enqueue(
        &self,
        operation: Operation,
        collection: &str,
        payload: Value,
    ) -> crate::Result<QueueEntry> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let id = new_entry_id(timestamp);
        let encoded = serde_json::to_string(&payload)?;

        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue (id, user_id, timestamp, operation, collection, payload, retry_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                params![id, self.user_id, timestamp, operation.as_str(), collection, encoded],
            )
        })?;

        tracing::debug!(collection, entry_id = %id, %operation, "Enqueued mutation");

        Ok(QueueEntry {
            id,
            timestamp,
            operation,
            collection: collection.to_string(),
            payload,
            retry_count: 0,
        })
    }

    fn list_pending(&self) -> crate::Result<Vec<QueueEntry>> {
        self.query_entries(
            &format!("{} WHERE user_id = ?1 ORDER BY timestamp ASC, seq ASC", SELECT_ENTRY),
            None,
        )
    }

    fn list_pending_for(&self, collection: &str) -> crate::Result<Vec<QueueEntry>> {
        self.query_entries(
            &format!(
                "{} WHERE user_id = ?1 AND collection = ?2 ORDER BY timestamp ASC, seq ASC",
                SELECT_ENTRY
            ),
            Some(collection),
        )
    }

    fn head_for(&self, collection: &str) -> crate::Result<Option<QueueEntry>> {
        let row = self.store.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "{} WHERE user_id = ?1 AND collection = ?2 ORDER BY timestamp ASC, seq ASC LIMIT 1",
                    SELECT_ENTRY
                ),
                params![self.user_id, collection],
                EntryRow::from_row,
            )
            .optional()
        })?;

        row.map(EntryRow::decode).transpose()
    }

    fn remove(&self, id: &str) -> crate::Result<bool> {
        let removed = self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM queue WHERE id = ?1 AND user_id = ?2",
                params![id, self.user_id],
            )
        })?;

        if removed == 0 {
            tracing::trace!(entry_id = id, "remove: entry already gone");
        }
        Ok(removed > 0)
    }

    fn increment_retry(&self, id: &str) -> crate::Result<Option<u32>> {
        let count: Option<i64> = self.store.with_conn(|conn| {
            conn.query_row(
                "UPDATE queue SET retry_count = retry_count + 1
                 WHERE id = ?1 AND user_id = ?2
                 RETURNING retry_count",
                params![id, self.user_id],
                |row| row.get(0),
            )
            .optional()
        })?;

        Ok(count.map(|c| c.max(0) as u32))
    }

    fn count(&self) -> crate::Result<usize> {
        let count: i64 = self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM queue WHERE user_id = ?1",
                params![self.user_id],
                |row| row.get(0),
            )
        })?;
        Ok(count as usize)
    }

    fn count_for(&self, collection: &str) -> crate::Result<usize> {
        let count: i64 = self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM queue WHERE user_id = ?1 AND collection = ?2",
                params![self.user_id, collection],
                |row| row.get(0),
            )
        })?;
        Ok(count as usize)
    }

    fn pending_collections(&self) -> crate::Result<Vec<String>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT collection FROM queue WHERE user_id = ?1
                 GROUP BY collection ORDER BY MIN(timestamp), MIN(seq)",
            )?;
            let names = stmt
                .query_map(params![self.user_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
    }

    fn clear(&self) -> crate::Result<usize> {
        let removed = self.store.with_conn(|conn| {
            conn.execute("DELETE FROM queue WHERE user_id = ?1", params![self.user_id])
        })?;
        tracing::info!("Cleared {} pending entries", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use serde_json::json;

    fn queue() -> DurableQueue {
        DurableQueue::new(LocalStore::open_in_memory().unwrap(), "user-1")
    }

    #[test]
    fn test_enqueue_and_list_in_insertion_order() {
        let queue = queue();
        let a = queue.enqueue(Operation::Create, "deliveryLogs", json!([1])).unwrap();
        let b = queue.enqueue(Operation::Update, "settings", json!({"currency": "EUR"})).unwrap();
        let c = queue.enqueue(Operation::Update, "deliveryLogs", json!([1, 2])).unwrap();

        let ids: Vec<_> = queue.list_pending().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id, c.id.clone()]);

        let logs: Vec<_> = queue
            .list_pending_for("deliveryLogs")
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(logs, vec![a.id.clone(), c.id]);
        assert_eq!(queue.head_for("deliveryLogs").unwrap().unwrap().id, a.id);
    }

    #[test]
    fn test_same_millisecond_entries_keep_fifo() {
        let queue = queue();
        let ids: Vec<_> = (0..50)
            .map(|i| queue.enqueue(Operation::Update, "deliveryLogs", json!(i)).unwrap().id)
            .collect();

        let listed: Vec<_> = queue.list_pending().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_entry_fields() {
        let queue = queue();
        let entry = queue.enqueue(Operation::Update, "expenses", json!([{"id": "e1"}])).unwrap();

        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.collection, "expenses");
        assert!(entry.id.starts_with(&format!("{:013}", entry.timestamp)));

        let stored = queue.head_for("expenses").unwrap().unwrap();
        assert_eq!(stored, entry);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let queue = queue();
        let entry = queue.enqueue(Operation::Update, "settings", json!({})).unwrap();

        assert!(queue.remove(&entry.id).unwrap());
        assert!(!queue.remove(&entry.id).unwrap());
        assert!(!queue.remove("never-existed").unwrap());
        assert_eq!(queue.count().unwrap(), 0);
    }

    #[test]
    fn test_increment_retry() {
        let queue = queue();
        let entry = queue.enqueue(Operation::Update, "settings", json!({})).unwrap();

        assert_eq!(queue.increment_retry(&entry.id).unwrap(), Some(1));
        assert_eq!(queue.increment_retry(&entry.id).unwrap(), Some(2));
        assert_eq!(queue.head_for("settings").unwrap().unwrap().retry_count, 2);

        queue.remove(&entry.id).unwrap();
        assert_eq!(queue.increment_retry(&entry.id).unwrap(), None);
        assert_eq!(queue.increment_retry("missing").unwrap(), None);
    }

    #[test]
    fn test_counts_and_pending_collections() {
        let queue = queue();
        queue.enqueue(Operation::Update, "settings", json!({})).unwrap();
        queue.enqueue(Operation::Update, "deliveryLogs", json!([])).unwrap();
        queue.enqueue(Operation::Update, "deliveryLogs", json!([1])).unwrap();

        assert_eq!(queue.count().unwrap(), 3);
        assert_eq!(queue.count_for("deliveryLogs").unwrap(), 2);
        assert_eq!(queue.count_for("expenses").unwrap(), 0);
        assert_eq!(queue.pending_collections().unwrap(), vec!["settings", "deliveryLogs"]);
    }

    #[test]
    fn test_queues_are_scoped_per_user() {
        let store = LocalStore::open_in_memory().unwrap();
        let alice = DurableQueue::new(store.clone(), "alice");
        let bob = DurableQueue::new(store, "bob");

        let entry = alice.enqueue(Operation::Update, "settings", json!({})).unwrap();
        bob.enqueue(Operation::Update, "settings", json!({})).unwrap();

        assert_eq!(alice.count().unwrap(), 1);
        assert!(!bob.remove(&entry.id).unwrap());
        assert_eq!(alice.count().unwrap(), 1);

        assert_eq!(alice.clear().unwrap(), 1);
        assert_eq!(bob.count().unwrap(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let temp = assert_fs::TempDir::new().unwrap();
        let db = temp.child("ledger.db");

        let kept = {
            let queue = DurableQueue::new(LocalStore::open(db.path()).unwrap(), "user-1");
            let first = queue.enqueue(Operation::Update, "deliveryLogs", json!([1])).unwrap();
            let second = queue.enqueue(Operation::Update, "deliveryLogs", json!([1, 2])).unwrap();
            queue.remove(&first.id).unwrap();
            second
        };

        let queue = DurableQueue::new(LocalStore::open(db.path()).unwrap(), "user-1");
        assert_eq!(queue.list_pending().unwrap(), vec![kept]);
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO queue (id, user_id, timestamp, operation, collection, payload)
                     VALUES ('bad', 'user-1', 1, 'upsert', 'settings', '{}')",
                    [],
                )
            })
            .unwrap();

        let queue = DurableQueue::new(store, "user-1");
        let err = queue.list_pending().unwrap_err();
        assert!(err.is_storage_failure());
        assert!(err.to_string().contains("bad"));
    }
}
