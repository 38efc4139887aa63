//! Sync engine orchestration
//!
//! Owns all writes to the durable queue and the local cache. Per collection
//! it drains queued mutations strictly FIFO against the remote store, backs
//! off on failure, merges remote pushes into the cache and re-derives the
//! collection's [`SyncStatus`] after every change. Different collections
//! drain independently.

use crate::cache::{CacheEntry, LocalCache};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, TaskGuard};
use crate::queue::{DurableQueue, Operation, QueueEntry, QueueStore};
use crate::remote::{DocumentPath, RemoteError, RemoteStore, Subscription};
use crate::status::{derive_status, DrainPhase, StatusInputs, SyncEvent, SyncStatus};
use crate::store::LocalStore;
use crate::SyncError;
use chrono::{DateTime, Utc};
use ledger_common::sanitizer::LogSanitizer;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

const EVENT_CAPACITY: usize = 256;

/// Why a drain stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainOutcome {
    /// Queue for the collection is empty
    #[default]
    Completed,
    /// Device went offline; remaining entries stay queued
    Offline,
    ShutDown,
}

/// Result of draining one collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub applied: usize,
    /// Entries dropped after exhausting their retries
    pub failed: usize,
    pub outcome: DrainOutcome,
}

impl DrainReport {
    /// Queue emptied with no entry lost
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.outcome == DrainOutcome::Completed
    }
}

/// Where a remote value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Subscription push
    Push,
    /// Explicit read (refresh or reconciliation)
    Pull,
}

/// Remote value held back while local writes are still queued
struct DeferredPush {
    value: Value,
    received: Instant,
}

struct CollectionState {
    phase: DrainPhase,
    status: watch::Sender<SyncStatus>,
    /// Bumped on every cache or status change of the collection
    revision: watch::Sender<u64>,
    /// Serializes drains and refreshes of the collection
    drain_lock: Arc<AsyncMutex<()>>,
    deferred: Option<DeferredPush>,
    last_applied: Option<Instant>,
    last_sync: Option<DateTime<Utc>>,
    last_sync_at: Option<Instant>,
    last_error: Option<String>,
    loaded: bool,
    /// Remote pushes wanted; subscribed whenever online
    watched: bool,
    subscription: Option<TaskGuard>,
}

impl CollectionState {
    fn new() -> Self {
        let (status, _) = watch::channel(SyncStatus::Loading);
        let (revision, _) = watch::channel(0);
        Self {
            phase: DrainPhase::Idle,
            status,
            revision,
            drain_lock: Arc::new(AsyncMutex::new(())),
            deferred: None,
            last_applied: None,
            last_sync: None,
            last_sync_at: None,
            last_error: None,
            loaded: false,
            watched: false,
            subscription: None,
        }
    }

    fn mark_synced(&mut self) {
        self.last_sync = Some(Utc::now());
        self.last_sync_at = Some(Instant::now());
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

fn state_entry<'a>(
    map: &'a mut HashMap<String, CollectionState>,
    collection: &str,
) -> &'a mut CollectionState {
    map.entry(collection.to_string())
        .or_insert_with(CollectionState::new)
}

struct EngineInner {
    user_id: String,
    config: SyncConfig,
    queue: Arc<dyn QueueStore>,
    cache: LocalCache,
    remote: Arc<dyn RemoteStore>,
    connectivity: ConnectivityMonitor,
    collections: Mutex<HashMap<String, CollectionState>>,
    events: broadcast::Sender<SyncEvent>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    /// Connectivity listener and reconciliation timer
    background: Mutex<Vec<TaskGuard>>,
    drains: Mutex<Vec<TaskGuard>>,
    applied_total: AtomicUsize,
    dropped_total: AtomicUsize,
    sanitizer: LogSanitizer,
}

/// Main sync engine. Cloning shares the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine for `user_id` on top of the local store
    pub fn new(
        config: SyncConfig,
        user_id: impl Into<String>,
        store: &LocalStore,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityMonitor,
    ) -> crate::Result<Self> {
        let user_id = user_id.into();
        let queue = Arc::new(DurableQueue::new(store.clone(), user_id.clone()));
        let cache = LocalCache::new(store.clone(), user_id.clone());
        Self::with_parts(config, user_id, queue, cache, remote, connectivity)
    }

    /// Create an engine over an explicit queue implementation
    pub fn with_parts(
        config: SyncConfig,
        user_id: impl Into<String>,
        queue: Arc<dyn QueueStore>,
        cache: LocalCache,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityMonitor,
    ) -> crate::Result<Self> {
        config.validate()?;

        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(SyncError::ConfigError("user_id cannot be empty".to_string()));
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(EngineInner {
                user_id,
                config,
                queue,
                cache,
                remote,
                connectivity,
                collections: Mutex::new(HashMap::new()),
                events,
                shutdown,
                started: AtomicBool::new(false),
                background: Mutex::new(Vec::new()),
                drains: Mutex::new(Vec::new()),
                applied_total: AtomicUsize::new(0),
                dropped_total: AtomicUsize::new(0),
                sanitizer: LogSanitizer::new(),
            }),
        })
    }

    /// Start background work: connectivity reactions, periodic reconciliation
    /// and resumption of entries left over from a previous session.
    ///
    /// Must be called inside a tokio runtime. Calling it again is a no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let listener = self.inner.connectivity.on_transition(move |online| {
            if let Some(inner) = weak.upgrade() {
                (SyncEngine { inner }).handle_transition(online);
            }
        });
        let reconciler = self.spawn_reconciliation();
        {
            let mut background = self.inner.background.lock();
            background.push(listener);
            background.push(reconciler);
        }

        match self.inner.queue.pending_collections() {
            Ok(collections) => {
                if !collections.is_empty() {
                    tracing::info!(
                        "Resuming {} collections with pending changes",
                        collections.len()
                    );
                }
                let online = self.inner.connectivity.is_online();
                for collection in collections {
                    self.publish_status(&collection);
                    if online {
                        self.schedule_drain(&collection);
                    }
                }
            }
            Err(e) => tracing::error!("Failed to read pending queue: {}", e),
        }

        tracing::info!("Sync engine started");
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self, collection: &str) -> SyncStatus {
        let mut map = self.inner.collections.lock();
        let status = *state_entry(&mut map, collection).status.borrow();
        status
    }

    pub fn watch_status(&self, collection: &str) -> watch::Receiver<SyncStatus> {
        let mut map = self.inner.collections.lock();
        state_entry(&mut map, collection).status.subscribe()
    }

    /// Changes whenever the cached value or the status of `collection` changes
    pub fn watch_revision(&self, collection: &str) -> watch::Receiver<u64> {
        let mut map = self.inner.collections.lock();
        state_entry(&mut map, collection).revision.subscribe()
    }

    pub fn phase(&self, collection: &str) -> DrainPhase {
        let mut map = self.inner.collections.lock();
        state_entry(&mut map, collection).phase
    }

    pub fn last_sync_time(&self, collection: &str) -> Option<DateTime<Utc>> {
        let mut map = self.inner.collections.lock();
        state_entry(&mut map, collection).last_sync
    }

    pub fn last_error(&self, collection: &str) -> Option<String> {
        let mut map = self.inner.collections.lock();
        state_entry(&mut map, collection).last_error.clone()
    }

    /// Collections the engine has seen this session
    pub fn known_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.collections.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Re-derive the status of `collection` from local state only
    pub fn inspect(&self, collection: &str) -> SyncStatus {
        if let Ok(Some(_)) = self.inner.cache.read(collection) {
            let mut map = self.inner.collections.lock();
            state_entry(&mut map, collection).loaded = true;
        }
        self.publish_status(collection);
        self.status(collection)
    }

    /// Collections with a cached value for this user
    pub fn cached_collections(&self) -> crate::Result<Vec<String>> {
        self.inner.cache.collections()
    }

    /// Read-only view of the cache
    pub fn cached(&self, collection: &str) -> crate::Result<Option<CacheEntry>> {
        self.inner.cache.read(collection)
    }

    pub fn pending_count(&self, collection: &str) -> crate::Result<usize> {
        self.inner.queue.count_for(collection)
    }

    /// Read-only view of the queue, oldest first
    pub fn pending_entries(&self) -> crate::Result<Vec<QueueEntry>> {
        self.inner.queue.list_pending()
    }

    /// Accept a local mutation: queue it durably, write it through the cache
    /// and start draining when online.
    ///
    /// Returns once the mutation is durable; remote confirmation happens later.
    pub fn submit(
        &self,
        collection: &str,
        operation: Operation,
        value: Value,
    ) -> crate::Result<QueueEntry> {
        if *self.inner.shutdown.borrow() {
            return Err(SyncError::ShutDown);
        }

        let entry = {
            let mut map = self.inner.collections.lock();
            let state = state_entry(&mut map, collection);
            let entry = self.inner.queue.enqueue(operation, collection, value)?;
            self.write_cache(collection, &entry.document_value())?;
            state.loaded = true;
            state.bump();
            entry
        };

        tracing::debug!(collection, entry_id = %entry.id, "Accepted local write");
        self.publish_status(collection);

        if self.inner.connectivity.is_online() {
            self.schedule_drain(collection);
        }
        Ok(entry)
    }

    /// Follow remote pushes for `collection`. The subscription is opened
    /// now when online, otherwise on the next online transition.
    pub fn watch_collection(&self, collection: &str) {
        let has_cached = match self.inner.cache.read(collection) {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                tracing::warn!(collection, "Failed to read cache: {}", e);
                false
            }
        };

        {
            let mut map = self.inner.collections.lock();
            let state = state_entry(&mut map, collection);
            state.watched = true;
            if has_cached {
                state.loaded = true;
            }
        }

        if self.inner.connectivity.is_online() {
            self.subscribe(collection);
        }
        self.publish_status(collection);
    }

    /// Entries applied and dropped by this engine so far, all drains included
    pub fn drain_totals(&self) -> (usize, usize) {
        (
            self.inner.applied_total.load(Ordering::SeqCst),
            self.inner.dropped_total.load(Ordering::SeqCst),
        )
    }

    /// Drain `collection` in a background task
    pub fn schedule_drain(&self, collection: &str) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::debug!(collection, "No runtime, drain deferred to next start");
            return;
        }

        let engine = self.clone();
        let name = collection.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = engine.drain(&name).await {
                tracing::error!(collection = %name, "Drain aborted: {}", e);
            }
        });

        let mut drains = self.inner.drains.lock();
        drains.retain(|task| !task.is_finished());
        drains.push(TaskGuard::new(handle));
    }

    /// Apply queued entries of `collection` until the queue is empty, the
    /// device goes offline or the engine shuts down.
    pub async fn drain(&self, collection: &str) -> crate::Result<DrainReport> {
        let lock = self.drain_lock(collection);
        let _guard = lock.lock().await;
        self.drain_locked(collection).await
    }

    /// Drain every collection with pending entries, collections in parallel
    pub async fn flush_all(&self) -> crate::Result<Vec<(String, DrainReport)>> {
        let collections = self.inner.queue.pending_collections()?;

        // Dropping the set aborts drains still in flight
        let mut tasks = JoinSet::new();
        for (index, collection) in collections.into_iter().enumerate() {
            let engine = self.clone();
            tasks.spawn(async move {
                let report = engine.drain(&collection).await;
                (index, collection, report)
            });
        }

        let mut reports = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, collection, report) = joined.map_err(|_| SyncError::ShutDown)?;
            reports.push((index, collection, report?));
        }
        reports.sort_by_key(|(index, _, _)| *index);
        Ok(reports
            .into_iter()
            .map(|(_, collection, report)| (collection, report))
            .collect())
    }

    /// Drain pending writes for `collection`, then pull the server state
    /// bypassing the cache.
    ///
    /// Returns false when offline, when an entry was dropped during the
    /// drain, or when the pull failed.
    pub async fn force_refresh(&self, collection: &str) -> bool {
        if !self.inner.connectivity.is_online() {
            tracing::debug!(collection, "Refresh skipped: offline");
            return false;
        }

        let lock = self.drain_lock(collection);
        let _guard = lock.lock().await;

        match self.drain_locked(collection).await {
            Ok(report) if report.is_clean() => {}
            Ok(report) => {
                tracing::warn!(
                    collection,
                    failed = report.failed,
                    outcome = ?report.outcome,
                    "Refresh skipped: queue did not drain cleanly"
                );
                return false;
            }
            Err(e) => {
                tracing::error!(collection, "Refresh aborted: {}", e);
                return false;
            }
        }

        match self.pull_locked(collection).await {
            Ok(()) => {
                tracing::info!(collection, "Refreshed from server");
                true
            }
            Err(e) => {
                tracing::warn!(
                    collection,
                    "Refresh failed: {}",
                    self.inner.sanitizer.sanitize(&e.to_string())
                );
                false
            }
        }
    }

    /// One reconciliation pass: pull every known collection that has not
    /// synced within the refresh interval. Returns how many were refreshed.
    pub async fn reconcile(&self) -> usize {
        if !self.inner.connectivity.is_online() {
            return 0;
        }

        let interval = self.inner.config.refresh_interval;
        let stale: Vec<String> = {
            let map = self.inner.collections.lock();
            map.iter()
                .filter(|(_, state)| {
                    state
                        .last_sync_at
                        .map_or(true, |at| at.elapsed() >= interval)
                })
                .map(|(name, _)| name.clone())
                .collect()
        };

        let mut refreshed = 0;
        for collection in stale {
            match self.pull(&collection).await {
                Ok(()) => refreshed += 1,
                Err(e) => tracing::warn!(
                    collection = %collection,
                    "Background refresh failed: {}",
                    self.inner.sanitizer.sanitize(&e.to_string())
                ),
            }
        }

        if refreshed > 0 {
            tracing::debug!("Background refresh updated {} collections", refreshed);
        }
        refreshed
    }

    /// Stop timers, subscriptions and in-flight drains
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.background.lock().clear();
        self.inner.drains.lock().clear();
        for state in self.inner.collections.lock().values_mut() {
            state.subscription = None;
        }
        tracing::info!("Sync engine stopped");
    }

    /// Remove this user's queue and cache (logout)
    pub fn clear_local_state(&self) -> crate::Result<()> {
        let names = {
            let mut map = self.inner.collections.lock();
            let entries = self.inner.queue.clear()?;
            let cached = self.inner.cache.clear_all()?;
            for state in map.values_mut() {
                state.loaded = false;
                state.deferred = None;
                state.last_error = None;
                state.last_sync = None;
                state.last_sync_at = None;
                state.bump();
            }
            tracing::info!(entries, cached, "Cleared local state");
            map.keys().cloned().collect::<Vec<_>>()
        };

        for collection in names {
            self.publish_status(&collection);
        }
        Ok(())
    }

    //
    // Internals
    //

    fn drain_lock(&self, collection: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.collections.lock();
        state_entry(&mut map, collection).drain_lock.clone()
    }

    async fn drain_locked(&self, collection: &str) -> crate::Result<DrainReport> {
        let mut report = DrainReport::default();
        let mut shutdown = self.inner.shutdown.subscribe();
        let max_retries = self.inner.config.max_retries;

        loop {
            if *shutdown.borrow() {
                self.set_phase(collection, DrainPhase::Idle);
                report.outcome = DrainOutcome::ShutDown;
                return Ok(report);
            }
            if !self.inner.connectivity.is_online() {
                self.set_phase(collection, DrainPhase::Idle);
                tracing::debug!(collection, "Drain paused: offline");
                report.outcome = DrainOutcome::Offline;
                return Ok(report);
            }

            let entry = match self.inner.queue.head_for(collection) {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.finish_drain(collection, &report);
                    return Ok(report);
                }
                Err(e) => {
                    self.record_storage_failure(collection, &e);
                    return Err(e);
                }
            };

            self.set_phase(collection, DrainPhase::Draining);

            let failure = match self.apply(&entry).await {
                Ok(()) => {
                    if let Err(e) = self.complete_entry(&entry) {
                        self.record_storage_failure(collection, &e);
                        return Err(e);
                    }
                    report.applied += 1;
                    continue;
                }
                Err(failure) => failure,
            };

            let attempts = match self.inner.queue.increment_retry(&entry.id) {
                Ok(Some(attempts)) => attempts,
                // Entry vanished underneath us (logout); move on
                Ok(None) => continue,
                Err(e) => {
                    self.record_storage_failure(collection, &e);
                    return Err(e);
                }
            };

            let reason = self.inner.sanitizer.sanitize(&failure.to_string());
            tracing::warn!(
                collection,
                entry_id = %entry.id,
                retry_count = attempts,
                error = %reason,
                "Remote apply failed"
            );

            if attempts >= max_retries {
                if let Err(e) = self.inner.queue.remove(&entry.id) {
                    self.record_storage_failure(collection, &e);
                    return Err(e);
                }
                report.failed += 1;
                self.inner.dropped_total.fetch_add(1, Ordering::SeqCst);
                self.record_exhausted(&entry, attempts, reason);
                continue;
            }

            let delay = self.inner.config.backoff.delay(attempts - 1);
            self.set_phase(
                collection,
                DrainPhase::BackingOff {
                    until: Instant::now() + delay,
                },
            );
            let _ = self.inner.events.send(SyncEvent::EntryRetrying {
                collection: collection.to_string(),
                entry_id: entry.id.clone(),
                retry_count: attempts,
                delay,
            });
            self.wait_backoff(delay, &mut shutdown).await;
        }
    }

    /// Sleep for `delay`, cut short when the device goes offline or the engine stops
    async fn wait_backoff(&self, delay: Duration, shutdown: &mut watch::Receiver<bool>) {
        let mut online = self.inner.connectivity.subscribe();
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return,
                changed = online.changed() => {
                    if changed.is_err() || !*online.borrow_and_update() {
                        return;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        return;
                    }
                }
            }
        }
    }

    async fn apply(&self, entry: &QueueEntry) -> Result<(), RemoteError> {
        let path = DocumentPath::for_collection(&self.inner.user_id, &entry.collection);
        let timeout = self.inner.config.request_timeout;
        let value = entry.document_value();

        match tokio::time::timeout(timeout, self.inner.remote.set_document(&path, &value)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        }
    }

    fn complete_entry(&self, entry: &QueueEntry) -> crate::Result<()> {
        let collection = entry.collection.as_str();
        {
            let mut map = self.inner.collections.lock();
            if !self.inner.queue.remove(&entry.id)? {
                // Cleared underneath us (logout); nothing to confirm
                tracing::debug!(collection, entry_id = %entry.id, "Applied entry no longer queued");
                return Ok(());
            }
            self.inner.applied_total.fetch_add(1, Ordering::SeqCst);
            let state = state_entry(&mut map, collection);
            state.last_applied = Some(Instant::now());
            state.mark_synced();

            // The last queued write is now the server state
            if self.inner.queue.count_for(collection)? == 0 {
                self.write_cache(collection, &entry.document_value())?;
                state.bump();
            }
        }

        tracing::debug!(collection, entry_id = %entry.id, "Applied queued mutation");
        let _ = self.inner.events.send(SyncEvent::EntryApplied {
            collection: collection.to_string(),
            entry_id: entry.id.clone(),
        });
        self.publish_status(collection);
        Ok(())
    }

    fn finish_drain(&self, collection: &str, report: &DrainReport) {
        {
            let mut map = self.inner.collections.lock();
            let state = state_entry(&mut map, collection);
            state.phase = DrainPhase::Idle;
            if report.failed == 0 && report.applied > 0 {
                state.last_error = None;
                state.loaded = true;
            }

            if let Some(deferred) = state.deferred.take() {
                let superseded = state
                    .last_applied
                    .map_or(false, |applied| deferred.received <= applied);
                if superseded {
                    tracing::debug!(collection, "Dropping remote push superseded by local write");
                } else {
                    match self.write_cache(collection, &deferred.value) {
                        Ok(()) => {
                            state.loaded = true;
                            state.mark_synced();
                            state.bump();
                        }
                        Err(e) => tracing::error!(collection, "Failed to apply deferred push: {}", e),
                    }
                }
            }
        }

        if report.applied > 0 || report.failed > 0 {
            tracing::info!(
                collection,
                applied = report.applied,
                failed = report.failed,
                "Drain finished"
            );
        }
        self.publish_status(collection);
    }

    /// Store a value pulled or pushed from the server, unless local writes are
    /// still queued for the collection. Returns false when deferred.
    fn accept_remote(&self, collection: &str, value: Value, origin: Origin) -> crate::Result<bool> {
        {
            let mut map = self.inner.collections.lock();
            let pending = self.inner.queue.count_for(collection)?;
            let state = state_entry(&mut map, collection);

            if pending > 0 {
                tracing::debug!(collection, pending, "Deferring remote value until queue drains");
                state.deferred = Some(DeferredPush {
                    value,
                    received: Instant::now(),
                });
                return Ok(false);
            }

            // Echo of a value we already hold, usually our own write
            if origin == Origin::Push {
                let cached = self.inner.cache.read(collection)?.map(|entry| entry.value);
                if cached.unwrap_or(Value::Null) == value {
                    state.loaded = true;
                    state.mark_synced();
                    return Ok(true);
                }
            }

            self.write_cache(collection, &value)?;
            state.loaded = true;
            state.last_error = None;
            state.mark_synced();
            state.bump();
        }

        let _ = self.inner.events.send(SyncEvent::RemoteApplied {
            collection: collection.to_string(),
        });
        self.publish_status(collection);
        Ok(true)
    }

    async fn pull(&self, collection: &str) -> crate::Result<()> {
        let lock = self.drain_lock(collection);
        let _guard = lock.lock().await;
        self.pull_locked(collection).await
    }

    async fn pull_locked(&self, collection: &str) -> crate::Result<()> {
        let path = DocumentPath::for_collection(&self.inner.user_id, collection);
        let timeout = self.inner.config.request_timeout;

        let value = match tokio::time::timeout(timeout, self.inner.remote.get_document(&path)).await {
            Ok(result) => result?,
            Err(_) => return Err(RemoteError::Timeout(timeout).into()),
        };

        self.accept_remote(collection, value.unwrap_or(Value::Null), Origin::Pull)?;
        Ok(())
    }

    /// `null` means the document does not exist. Nothing is written once the
    /// engine has shut down.
    fn write_cache(&self, collection: &str, value: &Value) -> crate::Result<()> {
        if *self.inner.shutdown.borrow() {
            tracing::debug!(collection, "Engine stopped, cache write skipped");
            return Ok(());
        }
        if value.is_null() {
            self.inner.cache.clear(collection)
        } else {
            self.inner.cache.write(collection, value).map(|_| ())
        }
    }

    fn set_phase(&self, collection: &str, phase: DrainPhase) {
        let changed = {
            let mut map = self.inner.collections.lock();
            let state = state_entry(&mut map, collection);
            let changed = state.phase != phase;
            state.phase = phase;
            changed
        };
        if changed {
            self.publish_status(collection);
        }
    }

    fn record_exhausted(&self, entry: &QueueEntry, attempts: u32, reason: String) {
        let collection = entry.collection.as_str();
        let error = SyncError::RemoteExhausted {
            collection: collection.to_string(),
            entry_id: entry.id.clone(),
            attempts,
        };
        tracing::error!(collection, entry_id = %entry.id, attempts, "{}: {}", error, reason);

        {
            let mut map = self.inner.collections.lock();
            let state = state_entry(&mut map, collection);
            state.phase = DrainPhase::Failed;
            state.last_error = Some(error.to_string());
        }

        let _ = self.inner.events.send(SyncEvent::EntryFailed {
            collection: collection.to_string(),
            entry_id: entry.id.clone(),
            attempts,
            error: reason,
        });
        self.publish_status(collection);
    }

    fn record_storage_failure(&self, collection: &str, error: &SyncError) {
        tracing::error!(collection, "Local storage failure: {}", error);
        {
            let mut map = self.inner.collections.lock();
            let state = state_entry(&mut map, collection);
            state.phase = DrainPhase::Idle;
            state.last_error = Some(error.to_string());
        }
        self.publish_status(collection);
    }

    /// Re-derive the status of `collection` and publish it if it changed
    fn publish_status(&self, collection: &str) {
        let pending = match self.inner.queue.count_for(collection) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(collection, "Failed to count pending entries: {}", e);
                0
            }
        };
        let online = self.inner.connectivity.is_online();

        let mut map = self.inner.collections.lock();
        let state = state_entry(&mut map, collection);
        let status = derive_status(&StatusInputs {
            online,
            phase: state.phase,
            pending,
            has_error: state.last_error.is_some(),
            loaded: state.loaded,
        });

        let changed = state.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            state.bump();
            tracing::debug!(collection, %status, "Sync status changed");
            let _ = self.inner.events.send(SyncEvent::StatusChanged {
                collection: collection.to_string(),
                status,
            });
        }
    }

    fn handle_transition(&self, online: bool) {
        let _ = self.inner.events.send(SyncEvent::Connectivity { online });

        let pending = match self.inner.queue.pending_collections() {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("Failed to read pending queue: {}", e);
                Vec::new()
            }
        };

        let mut collections = self.known_collections();
        for collection in &pending {
            if !collections.contains(collection) {
                collections.push(collection.clone());
            }
        }

        if !online {
            {
                let mut map = self.inner.collections.lock();
                for state in map.values_mut() {
                    state.subscription = None;
                }
            }
            for collection in &collections {
                self.set_phase(collection, DrainPhase::Idle);
                self.publish_status(collection);
            }
            return;
        }

        for collection in &collections {
            self.publish_status(collection);
        }
        for collection in self.collections_to_subscribe() {
            self.subscribe(&collection);
        }
        if !pending.is_empty() {
            tracing::info!("Back online, draining {} collections", pending.len());
        }
        for collection in &pending {
            self.schedule_drain(collection);
        }
    }

    /// Watched collections without a live subscription
    fn collections_to_subscribe(&self) -> Vec<String> {
        let map = self.inner.collections.lock();
        map.iter()
            .filter(|(_, state)| {
                state.watched
                    && state
                        .subscription
                        .as_ref()
                        .map_or(true, |task| task.is_finished())
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn subscribe(&self, collection: &str) {
        if *self.inner.shutdown.borrow() {
            return;
        }
        let live = {
            let map = self.inner.collections.lock();
            map.get(collection)
                .and_then(|state| state.subscription.as_ref())
                .map_or(false, |task| !task.is_finished())
        };
        if live {
            return;
        }

        let path = DocumentPath::for_collection(&self.inner.user_id, collection);
        match self.inner.remote.subscribe(&path) {
            Ok(subscription) => {
                let guard = self.spawn_listener(collection.to_string(), subscription);
                let mut map = self.inner.collections.lock();
                state_entry(&mut map, collection).subscription = Some(guard);
                tracing::debug!(collection, "Subscribed to remote changes");
            }
            Err(e) => tracing::warn!(
                collection,
                "Subscribe failed, retrying when back online: {}",
                self.inner.sanitizer.sanitize(&e.to_string())
            ),
        }
    }

    fn spawn_listener(&self, collection: String, mut subscription: Subscription) -> TaskGuard {
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();

        TaskGuard::new(tokio::spawn(async move {
            loop {
                let value = tokio::select! {
                    value = subscription.next() => value,
                    _ = shutdown.changed() => break,
                };
                let Some(value) = value else {
                    tracing::debug!(collection = %collection, "Remote closed subscription");
                    break;
                };
                let Some(inner) = weak.upgrade() else { break };

                if let Err(e) = (SyncEngine { inner }).accept_remote(&collection, value, Origin::Push) {
                    tracing::error!(collection = %collection, "Failed to store remote push: {}", e);
                }
            }
        }))
    }

    fn spawn_reconciliation(&self) -> TaskGuard {
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let every = self.inner.config.refresh_interval;
        let mut shutdown = self.inner.shutdown.subscribe();

        TaskGuard::new(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let Some(inner) = weak.upgrade() else { break };
                (SyncEngine { inner }).reconcile().await;
            }
        }))
    }
}
