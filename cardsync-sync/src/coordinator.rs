//! Sync coordinator: owns per-path subscriptions, connectivity, the
//! offline queue and the last-known-remote cache.
//!
//! Writes flow `set_data` → stamp → (offline queue | diff short-circuit |
//! conflict check) → optimizer batch → remote store. Inbound snapshots flow
//! remote store → forwarding task → cache → subscriber callback.
//!
//! Nothing here holds a lock across remote I/O. Operations on different
//! paths interleave freely; same-path writes are last-writer-wins.

use crate::adapter::{lock, RemoteStore, SnapshotCallback, Unsubscribe};
use crate::config::SyncConfig;
use crate::conflict::{is_conflict, resolve_conflict, ConflictResolver};
use crate::error::{SyncError, SyncResult};
use crate::optimizer::{calculate_diff, flush_fn, FlushFn, SyncOptimizer};
use crate::status::{StatusBroadcaster, SyncStatus};
use cardsync_types::document::{last_modified, present, stamped, without_reserved};
use cardsync_types::{Clock, DocPath, Document, SystemClock};
use futures::future::join_all;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Per-call write options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Skip reading the remote document before writing.
    pub skip_conflict_check: bool,
    /// Skip the write when nothing but the timestamp changed since the last
    /// known remote snapshot.
    pub use_diff_sync: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            skip_conflict_check: false,
            use_diff_sync: true,
        }
    }
}

impl WriteOptions {
    /// Writes blindly: no conflict read, no diff short-circuit.
    pub const FORCE: Self = Self {
        skip_conflict_check: true,
        use_diff_sync: false,
    };
}

/// What `set_data` did with a write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The envelope was written to the remote store.
    Written(Document),
    /// A conflict was resolved; carries the document now authoritative.
    Resolved(Document),
    /// Offline: the envelope is waiting in the offline queue.
    Queued,
    /// Nothing changed relative to the last known remote snapshot.
    Unchanged,
    /// The remote store is not configured; nothing was done.
    Unavailable,
}

/// Result of flushing the offline queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfflineSyncReport {
    /// Paths written successfully.
    pub synced: Vec<DocPath>,
    /// Paths that failed and were put back in the queue.
    pub failed: Vec<DocPath>,
    /// Paths dropped without writing because the remote already held a
    /// newer snapshot.
    pub superseded: Vec<DocPath>,
}

impl OfflineSyncReport {
    /// True when every queued write went through.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// True when the queue held nothing.
    pub fn is_empty(&self) -> bool {
        self.synced.is_empty() && self.failed.is_empty() && self.superseded.is_empty()
    }
}

struct SubscriptionEntry {
    id: u64,
    on_conflict: Option<Arc<dyn ConflictResolver>>,
    teardown: Arc<Unsubscribe>,
}

struct CoordinatorInner {
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    optimizer: SyncOptimizer,
    online: AtomicBool,
    status: StatusBroadcaster,
    subscriptions: Mutex<HashMap<DocPath, SubscriptionEntry>>,
    offline_queue: RwLock<HashMap<DocPath, Document>>,
    last_known_remote: Arc<RwLock<HashMap<DocPath, Document>>>,
    connectivity: Mutex<Option<Unsubscribe>>,
    next_subscription_id: AtomicU64,
}

impl CoordinatorInner {
    fn set_status(&self, status: SyncStatus) {
        self.status.publish(status);
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn cache(&self, path: &DocPath, doc: Document) {
        self.last_known_remote.write().await.insert(path.clone(), doc);
    }

    fn resolver_for(&self, path: &DocPath) -> Option<Arc<dyn ConflictResolver>> {
        lock(&self.subscriptions)
            .get(path)
            .and_then(|entry| entry.on_conflict.clone())
    }

    /// Flush function handed to the optimizer: write, then cache on success.
    fn write_through(&self) -> FlushFn {
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.last_known_remote);
        flush_fn(move |path: DocPath, data: Document| {
            let store = Arc::clone(&store);
            let cache = Arc::clone(&cache);
            async move {
                store.set_data(&path, data.clone()).await?;
                cache.write().await.insert(path, data);
                Ok(())
            }
        })
    }

    /// Drops the queued offline write for `path` unless it is newer than
    /// `stamp`.
    async fn retire_queued(&self, path: &DocPath, stamp: u64) {
        let mut queue = self.offline_queue.write().await;
        let superseded = queue
            .get(path)
            .is_some_and(|queued| last_modified(queued).unwrap_or(0) <= stamp);
        if superseded {
            debug!("Write to {} supersedes its queued offline write", path);
            queue.remove(path);
        }
    }

    /// Records an inbound snapshot and returns what the subscriber sees.
    ///
    /// Returns `None` for a snapshot stamped older than the cached one; it
    /// is neither cached nor delivered.
    async fn absorb_snapshot(
        &self,
        path: &DocPath,
        snapshot: Option<Document>,
    ) -> Option<Option<Document>> {
        let Some(doc) = snapshot.filter(|d| !d.is_null()) else {
            self.last_known_remote.write().await.remove(path);
            return Some(None);
        };

        {
            let mut cache = self.last_known_remote.write().await;
            if cache.get(path).is_some_and(|cached| is_stale(&doc, cached)) {
                debug!("Ignoring stale push for {}", path);
                return None;
            }
            cache.insert(path.clone(), doc.clone());
        }

        // Unsent local edits are layered over the push so the UI keeps them.
        let delivered = match self.offline_queue.read().await.get(path) {
            Some(queued) => {
                debug!("Merging push for {} with queued offline write", path);
                self.optimizer.smart_merge(Some(queued), Some(&doc))
            }
            None => doc,
        };
        Some(Some(delivered))
    }

    /// Flips the online flag and publishes the matching status.
    /// Returns true when the transition is to online.
    fn apply_connectivity(&self, online: bool) -> bool {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online {
            if !was_online {
                info!("Connectivity restored");
                self.set_status(SyncStatus::Idle);
            }
        } else {
            if was_online {
                info!("Connectivity lost, queueing writes");
            }
            self.set_status(SyncStatus::Offline);
        }
        online
    }
}

/// Coordinates local edits with a remote document store.
///
/// Cheap to clone; clones share state. Subscriptions and batched writes
/// spawn onto the current tokio runtime, so the coordinator must be used
/// from within one.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SyncCoordinator {
    /// Creates a coordinator using the system clock.
    pub fn new(store: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    /// Creates a coordinator with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let initial = if config.start_online {
            SyncStatus::Idle
        } else {
            SyncStatus::Offline
        };
        let inner = Arc::new(CoordinatorInner {
            optimizer: SyncOptimizer::new(config.clone()),
            online: AtomicBool::new(config.start_online),
            status: StatusBroadcaster::new(initial),
            subscriptions: Mutex::new(HashMap::new()),
            offline_queue: RwLock::new(HashMap::new()),
            last_known_remote: Arc::new(RwLock::new(HashMap::new())),
            connectivity: Mutex::new(None),
            next_subscription_id: AtomicU64::new(1),
            store,
            clock,
            config,
        });

        let weak = Arc::downgrade(&inner);
        let registration = inner
            .store
            .on_connectivity_change(Arc::new(move |online| on_connectivity(&weak, online)));
        *lock(&inner.connectivity) = Some(registration);

        Self { inner }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the optimizer.
    pub fn optimizer(&self) -> &SyncOptimizer {
        &self.inner.optimizer
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        self.inner.status.current()
    }

    /// Returns whether the coordinator believes it is online.
    pub fn is_online(&self) -> bool {
        self.inner.is_online()
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Writes `value` to `path`.
    ///
    /// The value is stamped with `_lastModified`, then queued (offline),
    /// skipped (unchanged), resolved (conflict) or batched to the store.
    /// Store failures set the status to `error` and are returned.
    pub async fn set_data(
        &self,
        path: impl Into<DocPath>,
        value: Document,
        options: WriteOptions,
    ) -> SyncResult<WriteOutcome> {
        let path = path.into();
        let inner = &self.inner;
        let mut value = value;
        let mut skip_conflict_check = options.skip_conflict_check;
        let mut resolved = false;
        // A resolved write is never stamped older than the remote it replaces.
        let mut stamp_floor = 0;

        loop {
            inner.set_status(SyncStatus::Syncing);

            let stamp = inner.clock.now_millis().max(stamp_floor);
            let Some(envelope) = stamped(&value, stamp) else {
                inner.set_status(SyncStatus::Error);
                return Err(SyncError::InvalidDocument {
                    path: path.to_string(),
                });
            };

            if !inner.is_online() {
                inner.offline_queue.write().await.insert(path.clone(), envelope);
                debug!("Offline, queued write for {}", path);
                inner.set_status(SyncStatus::Offline);
                return Ok(WriteOutcome::Queued);
            }

            if !inner.store.is_configured() {
                warn!("Remote store not configured, dropping write for {}", path);
                inner.set_status(SyncStatus::Idle);
                return Ok(WriteOutcome::Unavailable);
            }

            if options.use_diff_sync {
                let baseline = inner.last_known_remote.read().await.get(&path).cloned();
                if let Some(baseline) = baseline {
                    let diff = calculate_diff(
                        Some(&without_reserved(&baseline)),
                        Some(&without_reserved(&envelope)),
                    );
                    if !diff.has_changes() {
                        debug!("No changes for {}, skipping write", path);
                        inner.retire_queued(&path, stamp).await;
                        inner.set_status(SyncStatus::Idle);
                        return Ok(if resolved {
                            WriteOutcome::Resolved(baseline)
                        } else {
                            WriteOutcome::Unchanged
                        });
                    }
                    debug!("{} field changes for {}", diff.change_count(), path);
                }
            }

            if !skip_conflict_check {
                let remote = match inner.store.get_data(&path).await {
                    Ok(remote) => remote,
                    Err(e) => {
                        warn!("Conflict read for {} failed: {}", path, e);
                        inner.set_status(SyncStatus::Error);
                        return Err(e);
                    }
                };
                if let Some(remote) = present(remote.as_ref()) {
                    inner.cache(&path, remote.clone()).await;
                    if is_conflict(&envelope, remote) {
                        let resolver = inner.resolver_for(&path);
                        value = resolve_conflict(resolver, &path, &envelope, remote).await;
                        stamp_floor = last_modified(remote).unwrap_or(0);
                        skip_conflict_check = true;
                        resolved = true;
                        continue;
                    }
                }
            }

            let ticket = inner
                .optimizer
                .batch_update(path.clone(), envelope.clone(), inner.write_through());
            return match ticket.await {
                Ok(()) => {
                    inner.retire_queued(&path, stamp).await;
                    inner.set_status(SyncStatus::Idle);
                    Ok(if resolved {
                        WriteOutcome::Resolved(envelope)
                    } else {
                        WriteOutcome::Written(envelope)
                    })
                }
                Err(e) => {
                    inner.set_status(SyncStatus::Error);
                    Err(e)
                }
            };
        }
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Reads `path` from the store, caching the result.
    ///
    /// Returns `None` without touching the network when the store is not
    /// configured.
    pub async fn get_data(&self, path: impl Into<DocPath>) -> SyncResult<Option<Document>> {
        let path = path.into();
        let inner = &self.inner;
        if !inner.store.is_configured() {
            return Ok(None);
        }

        match inner.store.get_data(&path).await {
            Ok(doc) => {
                if let Some(doc) = present(doc.as_ref()) {
                    inner.cache(&path, doc.clone()).await;
                }
                if inner.status.current() == SyncStatus::Error {
                    inner.set_status(SyncStatus::Idle);
                }
                Ok(doc)
            }
            Err(e) => {
                warn!("Read of {} failed: {}", path, e);
                inner.set_status(SyncStatus::Error);
                Err(e)
            }
        }
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Subscribes to remote snapshots of `path`.
    ///
    /// Replaces any earlier subscription for the same path. `on_conflict`,
    /// if given, resolves conflicts for writes to this path. Returns a no-op
    /// handle when the store is not configured.
    pub fn subscribe(
        &self,
        path: impl Into<DocPath>,
        on_data: impl Fn(Option<Document>) + Send + Sync + 'static,
        on_conflict: Option<Arc<dyn ConflictResolver>>,
    ) -> Unsubscribe {
        let path = path.into();
        let inner = &self.inner;
        if !inner.store.is_configured() {
            debug!("Remote store not configured, subscription to {} is a no-op", path);
            return Unsubscribe::noop();
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Subscribed to {} outside a tokio runtime, subscription is a no-op", path);
            return Unsubscribe::noop();
        };

        let id = inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel::<Option<Document>>();

        let weak = Arc::downgrade(&self.inner);
        let task_path = path.clone();
        let forwarder = runtime.spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                let delivered = inner.absorb_snapshot(&task_path, snapshot).await;
                drop(inner);
                let Some(delivered) = delivered else { continue };
                if catch_unwind(AssertUnwindSafe(|| on_data(delivered))).is_err() {
                    warn!("Subscriber callback for {} panicked", task_path);
                }
            }
        });

        let relay: SnapshotCallback = Arc::new(move |snapshot| {
            let _ = tx.send(snapshot);
        });
        let remote = inner.store.subscribe(&path, relay);

        let teardown = Arc::new(Unsubscribe::new(move || {
            forwarder.abort();
            remote.unsubscribe();
        }));

        let previous = lock(&inner.subscriptions).insert(
            path.clone(),
            SubscriptionEntry {
                id,
                on_conflict,
                teardown: Arc::clone(&teardown),
            },
        );
        if let Some(previous) = previous {
            debug!("Replacing subscription for {}", path);
            previous.teardown.unsubscribe();
        }

        let weak = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut subscriptions = lock(&inner.subscriptions);
                if subscriptions.get(&path).is_some_and(|entry| entry.id == id) {
                    subscriptions.remove(&path);
                }
            }
            teardown.unsubscribe();
        })
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        lock(&self.inner.subscriptions).len()
    }

    // ── Offline queue ────────────────────────────────────────────

    /// Writes every queued offline change to the store concurrently.
    ///
    /// Entries older than the last known remote snapshot are dropped unwritten.
    /// Failed entries go back into the queue unless a newer local write for
    /// the same path arrived meanwhile.
    pub async fn sync_offline_changes(&self) -> OfflineSyncReport {
        let inner = &self.inner;
        let mut report = OfflineSyncReport::default();
        if !inner.is_online() || !inner.store.is_configured() {
            return report;
        }

        let drained: Vec<(DocPath, Document)> = {
            let mut queue = inner.offline_queue.write().await;
            if queue.is_empty() {
                return report;
            }
            queue.drain().collect()
        };

        let drained: Vec<(DocPath, Document)> = {
            let cache = inner.last_known_remote.read().await;
            drained
                .into_iter()
                .filter(|(path, envelope)| {
                    let newer_remote = cache
                        .get(path)
                        .is_some_and(|known| is_stale(envelope, known));
                    if newer_remote {
                        debug!("Remote already newer than queued write for {}", path);
                        report.superseded.push(path.clone());
                    }
                    !newer_remote
                })
                .collect()
        };

        inner.set_status(SyncStatus::Syncing);
        info!("Syncing {} offline changes", drained.len());

        let writes = drained.into_iter().map(|(path, envelope)| {
            let store = Arc::clone(&inner.store);
            async move {
                let result = store.set_data(&path, envelope.clone()).await;
                (path, envelope, result)
            }
        });

        for (path, envelope, result) in join_all(writes).await {
            match result {
                Ok(()) => {
                    inner.cache(&path, envelope).await;
                    report.synced.push(path);
                }
                Err(e) => {
                    warn!("Offline change for {} failed to sync: {}", path, e);
                    inner
                        .offline_queue
                        .write()
                        .await
                        .entry(path.clone())
                        .or_insert(envelope);
                    report.failed.push(path);
                }
            }
        }

        report.synced.sort();
        report.failed.sort();
        report.superseded.sort();
        if !report.is_complete() {
            warn!(
                "Offline sync incomplete: {}/{} changes failed",
                report.failed.len(),
                report.failed.len() + report.synced.len()
            );
        }
        inner.set_status(SyncStatus::Idle);
        report
    }

    /// The envelope queued for `path`, if any.
    pub async fn queued_write(&self, path: &str) -> Option<Document> {
        self.inner.offline_queue.read().await.get(path).cloned()
    }

    /// Paths with a queued offline write.
    pub async fn queued_paths(&self) -> Vec<DocPath> {
        let mut paths: Vec<DocPath> =
            self.inner.offline_queue.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// The last snapshot seen from the store for `path`.
    pub async fn last_known_remote(&self, path: &str) -> Option<Document> {
        self.inner.last_known_remote.read().await.get(path).cloned()
    }

    // ── Connectivity & status ────────────────────────────────────

    /// Applies a connectivity transition.
    ///
    /// Going online flushes the offline queue and returns the report.
    pub async fn set_online(&self, online: bool) -> Option<OfflineSyncReport> {
        if self.inner.apply_connectivity(online) {
            Some(self.sync_offline_changes().await)
        } else {
            None
        }
    }

    /// Registers a status listener.
    pub fn on_status_change(
        &self,
        listener: impl Fn(SyncStatus) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.inner.status.subscribe(Arc::new(listener))
    }

    /// Publishes `status` to every listener.
    pub fn update_sync_status(&self, status: SyncStatus) {
        self.inner.set_status(status);
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Unsubscribes everything, clears all state and stops the optimizer.
    /// Idempotent.
    pub async fn cleanup(&self) {
        let inner = &self.inner;
        if let Some(registration) = lock(&inner.connectivity).take() {
            registration.unsubscribe();
        }

        let entries: Vec<SubscriptionEntry> =
            lock(&inner.subscriptions).drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.teardown.unsubscribe();
        }

        inner.offline_queue.write().await.clear();
        inner.last_known_remote.write().await.clear();
        inner.status.clear();
        inner.optimizer.teardown();
    }
}

/// Whether `doc` is stamped older than `known`. Unstamped documents are
/// never considered stale.
fn is_stale(doc: &Document, known: &Document) -> bool {
    matches!(
        (last_modified(doc), last_modified(known)),
        (Some(doc_ts), Some(known_ts)) if doc_ts < known_ts
    )
}

/// Connectivity callback: flips state now, flushes the queue in the background.
fn on_connectivity(inner: &Weak<CoordinatorInner>, online: bool) {
    let Some(inner) = inner.upgrade() else { return };
    if !inner.apply_connectivity(online) {
        return;
    }

    let coordinator = SyncCoordinator { inner };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                coordinator.sync_offline_changes().await;
            });
        }
        Err(_) => warn!("Back online outside a tokio runtime, offline queue not flushed"),
    }
}
