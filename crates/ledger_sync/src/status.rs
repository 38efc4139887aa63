//! Sync status state machine and engine events

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Per-collection status shown to the UI. Continuously re-derived, no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "pending", rename_all = "lowercase")]
pub enum SyncStatus {
    Loading,
    Synced,
    Syncing,
    Pending(usize),
    Offline,
    Error,
}

impl SyncStatus {
    /// One of `loading`, `synced`, `syncing`, `pending`, `offline`, `error`
    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Loading => "loading",
            SyncStatus::Synced => "synced",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Pending(_) => "pending",
            SyncStatus::Offline => "offline",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Pending(n) => write!(f, "pending({})", n),
            other => f.write_str(other.label()),
        }
    }
}

/// Drain state of one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPhase {
    Idle,
    Draining,
    BackingOff { until: Instant },
    /// An entry was just dropped after exhausting its retries
    Failed,
}

/// Everything a status is derived from
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatusInputs {
    pub online: bool,
    pub phase: DrainPhase,
    pub pending: usize,
    pub has_error: bool,
    pub loaded: bool,
}

pub(crate) fn derive_status(inputs: &StatusInputs) -> SyncStatus {
    if !inputs.online {
        return SyncStatus::Offline;
    }
    match inputs.phase {
        DrainPhase::Draining => return SyncStatus::Syncing,
        DrainPhase::Failed => return SyncStatus::Error,
        DrainPhase::Idle | DrainPhase::BackingOff { .. } => {}
    }
    if inputs.pending > 0 {
        SyncStatus::Pending(inputs.pending)
    } else if inputs.has_error {
        SyncStatus::Error
    } else if inputs.loaded {
        SyncStatus::Synced
    } else {
        SyncStatus::Loading
    }
}

/// Observable engine activity
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StatusChanged {
        collection: String,
        status: SyncStatus,
    },
    EntryApplied {
        collection: String,
        entry_id: String,
    },
    EntryRetrying {
        collection: String,
        entry_id: String,
        retry_count: u32,
        delay: Duration,
    },
    /// Entry dropped after exhausting its retries
    EntryFailed {
        collection: String,
        entry_id: String,
        attempts: u32,
        error: String,
    },
    /// Remote state pulled or pushed into the cache
    RemoteApplied {
        collection: String,
    },
    Connectivity {
        online: bool,
    },
}
