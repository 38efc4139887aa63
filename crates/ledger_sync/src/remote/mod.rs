//! Remote document store interface
//!
//! The backend is a key-value document database addressed by user-scoped
//! paths with last-write-wins semantics. The core consumes exactly three
//! primitives: get, set and subscribe.

mod memory;

pub use memory::{MemoryRemote, RecordedWrite};

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// `users/{userId}/data/{collectionName}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn for_collection(user_id: &str, collection: &str) -> Self {
        Self(format!("users/{}/data/{}", user_id, collection))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments: `users`, user id, `data`, collection
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn collection(&self) -> Option<&str> {
        self.segments().nth(3)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failures of a remote call. All of them are treated as transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Stream of full document values pushed on every remote change.
///
/// Dropping it unsubscribes.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Value>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            receiver,
            _guard: None,
        }
    }

    /// Keep `guard` (a file watcher, a socket) alive as long as the subscription
    pub fn with_guard(receiver: mpsc::UnboundedReceiver<Value>, guard: impl Any + Send) -> Self {
        Self {
            receiver,
            _guard: Some(Box::new(guard)),
        }
    }

    /// Next pushed value; `None` once the remote side closed the stream
    pub async fn next(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(self) {}
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current document, `None` when it does not exist
    async fn get_document(&self, path: &DocumentPath) -> Result<Option<Value>, RemoteError>;

    /// Replace the document (last write wins, no cross-path transactions)
    async fn set_document(&self, path: &DocumentPath, value: &Value) -> Result<(), RemoteError>;

    /// Push the full value on every change of `path`
    fn subscribe(&self, path: &DocumentPath) -> Result<Subscription, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_path_convention() {
        let path = DocumentPath::for_collection("uid-42", "deliveryLogs");
        assert_eq!(path.as_str(), "users/uid-42/data/deliveryLogs");
        assert_eq!(path.collection(), Some("deliveryLogs"));
        assert_eq!(path.to_string(), "users/uid-42/data/deliveryLogs");
    }
}
