//! Data-access facade
//!
//! The only surface the UI uses. Reads come from the local cache, writes are
//! accepted as soon as they are durable, and sync state is exposed as a
//! [`DataView`] snapshot per collection.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::engine::SyncEngine;
use crate::queue::Operation;
use crate::remote::RemoteStore;
use crate::status::SyncStatus;
use crate::store::LocalStore;
use crate::SyncError;
use chrono::{DateTime, Utc};
use ledger_common::Collection;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;

/// Point-in-time view of one collection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataView<T> {
    pub data: Option<T>,
    /// No cached value yet and nothing known about the server state
    pub loading: bool,
    pub error: Option<String>,
    pub sync_status: SyncStatus,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Entry point for a signed-in user
pub struct DataStore {
    engine: SyncEngine,
}

impl DataStore {
    /// Build and start the sync engine for `user_id`
    pub fn open(
        config: SyncConfig,
        user_id: impl Into<String>,
        store: &LocalStore,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityMonitor,
    ) -> crate::Result<Self> {
        let engine = SyncEngine::new(config, user_id, store, remote, connectivity)?;
        Ok(Self::from_engine(engine))
    }

    pub fn from_engine(engine: SyncEngine) -> Self {
        engine.start();
        Self { engine }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn collection<C: Collection>(&self) -> SyncedData<C::Value> {
        SyncedData::open(self.engine.clone(), C::NAME)
    }

    /// Untyped access for collections without a [`Collection`] marker
    pub fn collection_by_name(&self, name: &str) -> SyncedData<Value> {
        SyncedData::open(self.engine.clone(), name)
    }

    pub fn shutdown(&self) {
        self.engine.shutdown();
    }

    /// Push what can be pushed within one request timeout, then wipe this
    /// user's queue and cache.
    ///
    /// Entries that could not be flushed are lost.
    pub async fn logout(&self) -> crate::Result<()> {
        if self.engine.connectivity().is_online() {
            let bound = self.engine.config().request_timeout;
            match tokio::time::timeout(bound, self.engine.flush_all()).await {
                Ok(Ok(reports)) => {
                    let failed: usize = reports.iter().map(|(_, r)| r.failed).sum();
                    if failed > 0 {
                        tracing::warn!(failed, "Logout flush dropped entries");
                    }
                }
                Ok(Err(e)) => tracing::warn!("Logout flush failed: {}", e),
                Err(_) => tracing::warn!("Logout flush timed out"),
            }
        }

        let abandoned = self.engine.pending_entries().map(|e| e.len()).unwrap_or(0);
        if abandoned > 0 {
            tracing::warn!(abandoned, "Discarding unsynced changes on logout");
        }

        self.engine.shutdown();
        self.engine.clear_local_state()
    }
}

/// Synced handle on one collection, typed by its value
pub struct SyncedData<T> {
    engine: SyncEngine,
    collection: String,
    /// Failure of the last local write through this handle
    error: Arc<Mutex<Option<String>>>,
    revision: watch::Receiver<u64>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SyncedData<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            collection: self.collection.clone(),
            error: self.error.clone(),
            revision: self.revision.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> SyncedData<T>
where
    T: Serialize + DeserializeOwned,
{
    fn open(engine: SyncEngine, collection: &str) -> Self {
        engine.watch_collection(collection);
        let revision = engine.watch_revision(collection);
        Self {
            engine,
            collection: collection.to_string(),
            error: Arc::new(Mutex::new(None)),
            revision,
            _marker: PhantomData,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn snapshot(&self) -> DataView<T> {
        let sync_status = self.engine.status(&self.collection);

        let (data, read_error) = match self.engine.cached(&self.collection) {
            Ok(Some(entry)) => match serde_json::from_value::<T>(entry.value) {
                Ok(value) => (Some(value), None),
                Err(e) => (
                    None,
                    Some(format!("Cached {} is unreadable: {}", self.collection, e)),
                ),
            },
            Ok(None) => (None, None),
            Err(e) => (None, Some(e.to_string())),
        };

        let error = read_error
            .or_else(|| self.error.lock().clone())
            .or_else(|| self.engine.last_error(&self.collection));

        DataView {
            loading: data.is_none() && sync_status == SyncStatus::Loading,
            data,
            error,
            sync_status,
            last_sync_time: self.engine.last_sync_time(&self.collection),
        }
    }

    pub fn data(&self) -> Option<T> {
        self.snapshot().data
    }

    /// Replace the collection value. Succeeds offline once the write is durable.
    pub fn update_data(&self, value: T) -> crate::Result<()> {
        let value = serde_json::to_value(value)?;
        let operation = match self.engine.cached(&self.collection) {
            Ok(Some(_)) => Operation::Update,
            Ok(None) => Operation::Create,
            Err(e) => return Err(self.record_failure(e)),
        };
        self.submit(operation, value)
    }

    /// Remove the collection document
    pub fn delete(&self) -> crate::Result<()> {
        self.submit(Operation::Delete, Value::Null)
    }

    /// Flush pending writes then re-read from the server. False when offline
    /// or when the flush or read failed.
    pub async fn force_refresh(&self) -> bool {
        self.engine.force_refresh(&self.collection).await
    }

    /// Wait until the cached value or status changes. False once the engine is gone.
    pub async fn changed(&mut self) -> bool {
        self.revision.changed().await.is_ok()
    }

    fn submit(&self, operation: Operation, value: Value) -> crate::Result<()> {
        match self.engine.submit(&self.collection, operation, value) {
            Ok(_) => {
                *self.error.lock() = None;
                Ok(())
            }
            Err(e) => Err(self.record_failure(e)),
        }
    }

    fn record_failure(&self, error: SyncError) -> SyncError {
        tracing::error!(collection = %self.collection, "Local write failed: {}", error);
        *self.error.lock() = Some(error.to_string());
        error
    }
}
