//! In-process remote store

use super::{DocumentPath, RemoteError, RemoteStore, Subscription};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One `set_document` call as seen by the store
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub path: DocumentPath,
    pub value: Value,
    pub at: Instant,
    pub succeeded: bool,
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<DocumentPath, Value>,
    subscribers: HashMap<DocumentPath, Vec<mpsc::UnboundedSender<Value>>>,
    failing_sets: usize,
    failing_gets: usize,
    writes: Vec<RecordedWrite>,
}

impl MemoryState {
    fn store(&mut self, path: &DocumentPath, value: Value) {
        if value.is_null() {
            self.documents.remove(path);
        } else {
            self.documents.insert(path.clone(), value.clone());
        }

        if let Some(subscribers) = self.subscribers.get_mut(path) {
            subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        }
    }
}

/// Remote store held in memory, with push subscriptions and failure injection.
///
/// Stands in for the managed backend in tests and local demos. A `null`
/// value deletes the document.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with [`RemoteError::Unavailable`]
    pub fn fail_next_sets(&self, n: usize) {
        self.state.lock().failing_sets = n;
    }

    /// Make the next `n` reads fail with [`RemoteError::Unavailable`]
    pub fn fail_next_gets(&self, n: usize) {
        self.state.lock().failing_gets = n;
    }

    /// Every write attempt so far, failed ones included
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.lock().writes.clone()
    }

    pub fn document(&self, path: &DocumentPath) -> Option<Value> {
        self.state.lock().documents.get(path).cloned()
    }

    /// Simulate another device writing the document
    pub fn write_from_other_device(&self, path: &DocumentPath, value: Value) {
        self.state.lock().store(path, value);
    }

    pub fn subscriber_count(&self, path: &DocumentPath) -> usize {
        let mut state = self.state.lock();
        match state.subscribers.get_mut(path) {
            Some(subscribers) => {
                subscribers.retain(|tx| !tx.is_closed());
                subscribers.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get_document(&self, path: &DocumentPath) -> Result<Option<Value>, RemoteError> {
        let mut state = self.state.lock();
        if state.failing_gets > 0 {
            state.failing_gets -= 1;
            return Err(RemoteError::Unavailable("injected read failure".to_string()));
        }
        Ok(state.documents.get(path).cloned())
    }

    async fn set_document(&self, path: &DocumentPath, value: &Value) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        let succeeded = state.failing_sets == 0;
        state.writes.push(RecordedWrite {
            path: path.clone(),
            value: value.clone(),
            at: Instant::now(),
            succeeded,
        });

        if !succeeded {
            state.failing_sets -= 1;
            return Err(RemoteError::Unavailable("injected write failure".to_string()));
        }

        state.store(path, value.clone());
        Ok(())
    }

    fn subscribe(&self, path: &DocumentPath) -> Result<Subscription, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if let Some(current) = state.documents.get(path) {
            let _ = tx.send(current.clone());
        }
        state.subscribers.entry(path.clone()).or_default().push(tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path() -> DocumentPath {
        DocumentPath::for_collection("user-1", "settings")
    }

    #[tokio::test]
    async fn test_get_set() {
        let remote = MemoryRemote::new();
        assert_eq!(remote.get_document(&path()).await.unwrap(), None);

        remote.set_document(&path(), &json!({"a": 1})).await.unwrap();
        assert_eq!(remote.get_document(&path()).await.unwrap(), Some(json!({"a": 1})));

        remote.set_document(&path(), &Value::Null).await.unwrap();
        assert_eq!(remote.document(&path()), None);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let remote = MemoryRemote::new();
        remote.fail_next_sets(2);

        assert!(remote.set_document(&path(), &json!(1)).await.is_err());
        assert!(remote.set_document(&path(), &json!(2)).await.is_err());
        remote.set_document(&path(), &json!(3)).await.unwrap();

        let outcomes: Vec<_> = remote.writes().iter().map(|w| w.succeeded).collect();
        assert_eq!(outcomes, vec![false, false, true]);
        assert_eq!(remote.document(&path()), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_subscribe_pushes_current_and_changes() {
        let remote = MemoryRemote::new();
        remote.write_from_other_device(&path(), json!({"v": 1}));

        let mut subscription = remote.subscribe(&path()).unwrap();
        assert_eq!(subscription.next().await, Some(json!({"v": 1})));

        remote.set_document(&path(), &json!({"v": 2})).await.unwrap();
        assert_eq!(subscription.next().await, Some(json!({"v": 2})));

        assert_eq!(remote.subscriber_count(&path()), 1);
        subscription.unsubscribe();
        assert_eq!(remote.subscriber_count(&path()), 0);
    }
}
