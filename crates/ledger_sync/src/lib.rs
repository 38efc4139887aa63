//! # DriverLedger Sync Engine
//!
//! Offline-first synchronization between a device-local store and the
//! remote document store.
//!
//! ## Architecture
//!
//! - **Durable Queue**: pending mutations in SQLite, drained FIFO per collection
//! - **Local Cache**: last-known value per collection for instant reads
//! - **Connectivity**: single source of truth for online/offline edges
//! - **Engine**: drains the queue with exponential backoff, merges remote pushes,
//!   derives a per-collection [`SyncStatus`]
//! - **Facade**: [`DataStore`] / [`SyncedData`], the surface the UI talks to
//!
//! Remote writes are last-write-wins. Concurrent writers on other devices may
//! be silently overwritten; nothing here detects or merges conflicts.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ledger_common::DeliveryLogs;
//! use ledger_sync::{ConnectivityMonitor, DataStore, LocalStore, MemoryRemote, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> ledger_sync::Result<()> {
//!     let store = LocalStore::open(std::path::Path::new(".ledger/ledger.db"))?;
//!     let remote = Arc::new(MemoryRemote::new());
//!     let connectivity = ConnectivityMonitor::new(true);
//!
//!     let data = DataStore::open(SyncConfig::default(), "user-123", &store, remote, connectivity)?;
//!     let logs = data.collection::<DeliveryLogs>();
//!     logs.update_data(Vec::new())?;
//!     println!("{}", logs.snapshot().sync_status);
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod facade;
pub mod queue;
pub mod remote;
pub mod status;
pub mod store;

pub use backoff::BackoffPolicy;
pub use cache::{CacheEntry, LocalCache};
pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, ReachabilityProbe, TaskGuard};
pub use engine::{DrainOutcome, DrainReport, SyncEngine};
pub use facade::{DataStore, DataView, SyncedData};
pub use queue::{DurableQueue, Operation, QueueEntry, QueueStore};
pub use remote::{DocumentPath, MemoryRemote, RemoteError, RemoteStore, Subscription};
pub use status::{DrainPhase, SyncEvent, SyncStatus};
pub use store::LocalStore;

/// Common result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur during sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The local durable store is unavailable or corrupt. Not retried.
    #[error("Local storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Local storage failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt local record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Gave up on entry {entry_id} for {collection} after {attempts} attempts")]
    RemoteExhausted {
        collection: String,
        entry_id: String,
        attempts: u32,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Sync engine has been shut down")]
    ShutDown,
}

impl SyncError {
    /// True for failures of the device-local store
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Storage(_) | SyncError::Io(_) | SyncError::CorruptRecord { .. }
        )
    }
}
