//! Remote store abstraction.
//!
//! The coordinator talks to the remote key-value store only through the
//! [`RemoteStore`] trait, so any backend (a hosted realtime database, a REST
//! API, an in-memory mock) can sit behind it.

use crate::error::SyncResult;
use async_trait::async_trait;
use cardsync_types::{DocPath, Document};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Invoked with every snapshot the store pushes for a subscribed path.
/// `None` means the document does not exist remotely.
pub type SnapshotCallback = Arc<dyn Fn(Option<Document>) + Send + Sync>;

/// Invoked with `true` when connectivity returns and `false` when it drops.
pub type ConnectivityCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle that tears down a registration exactly once.
///
/// Calling [`Unsubscribe::unsubscribe`] more than once is a no-op. Dropping
/// the handle does not unsubscribe.
pub struct Unsubscribe {
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Unsubscribe {
    /// Wraps a teardown closure.
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A handle with nothing to tear down.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    /// Runs the teardown if it has not run yet.
    pub fn unsubscribe(&self) {
        let teardown = lock(&self.teardown).take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Whether the teardown is still pending.
    pub fn is_active(&self) -> bool {
        lock(&self.teardown).is_some()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("active", &self.is_active())
            .finish()
    }
}

/// A remote document store the coordinator synchronizes against.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Whether the store has credentials/endpoint and can be used at all.
    fn is_configured(&self) -> bool;

    /// Reads the current document at `path`.
    async fn get_data(&self, path: &DocPath) -> SyncResult<Option<Document>>;

    /// Replaces the document at `path`.
    async fn set_data(&self, path: &DocPath, data: Document) -> SyncResult<()>;

    /// Registers for snapshots of `path`.
    fn subscribe(&self, path: &DocPath, on_change: SnapshotCallback) -> Unsubscribe;

    /// Registers for connectivity transitions.
    fn on_connectivity_change(&self, on_change: ConnectivityCallback) -> Unsubscribe;
}

/// An in-memory store for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    type Listeners<T> = Arc<Mutex<Vec<(u64, T)>>>;

    /// A mock remote store.
    ///
    /// Records every write, can be told to fail reads or writes for given
    /// paths, and lets tests push snapshots and flip connectivity.
    pub struct MockStore {
        configured: AtomicBool,
        docs: Mutex<HashMap<DocPath, Document>>,
        writes: Mutex<Vec<(DocPath, Document)>>,
        reads: AtomicUsize,
        failing_writes: Mutex<HashSet<DocPath>>,
        failing_reads: Mutex<HashSet<DocPath>>,
        subscribers: Arc<Mutex<HashMap<DocPath, Vec<(u64, SnapshotCallback)>>>>,
        connectivity: Listeners<ConnectivityCallback>,
        next_id: AtomicU64,
    }

    impl Default for MockStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockStore {
        /// Creates an empty, configured store.
        pub fn new() -> Self {
            Self {
                configured: AtomicBool::new(true),
                docs: Mutex::new(HashMap::new()),
                writes: Mutex::new(Vec::new()),
                reads: AtomicUsize::new(0),
                failing_writes: Mutex::new(HashSet::new()),
                failing_reads: Mutex::new(HashSet::new()),
                subscribers: Arc::new(Mutex::new(HashMap::new())),
                connectivity: Arc::new(Mutex::new(Vec::new())),
                next_id: AtomicU64::new(1),
            }
        }

        /// Creates a store that reports itself as not configured.
        pub fn unconfigured() -> Self {
            let store = Self::new();
            store.set_configured(false);
            store
        }

        /// Toggles the configured flag.
        pub fn set_configured(&self, configured: bool) {
            self.configured.store(configured, Ordering::SeqCst);
        }

        /// Places a document without recording it as a write.
        pub fn seed(&self, path: impl Into<DocPath>, doc: Document) {
            lock(&self.docs).insert(path.into(), doc);
        }

        /// The document currently stored at `path`.
        pub fn stored(&self, path: &str) -> Option<Document> {
            lock(&self.docs).get(path).cloned()
        }

        /// Every successful write, in order.
        pub fn writes(&self) -> Vec<(DocPath, Document)> {
            lock(&self.writes).clone()
        }

        /// Number of successful writes.
        pub fn write_count(&self) -> usize {
            lock(&self.writes).len()
        }

        /// Successful writes to one path, in order.
        pub fn writes_for(&self, path: &str) -> Vec<Document> {
            lock(&self.writes)
                .iter()
                .filter(|(p, _)| p.as_str() == path)
                .map(|(_, d)| d.clone())
                .collect()
        }

        /// Number of `get_data` calls served.
        pub fn read_count(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        /// Makes writes to `path` fail until healed.
        pub fn fail_writes(&self, path: impl Into<DocPath>) {
            lock(&self.failing_writes).insert(path.into());
        }

        /// Makes reads of `path` fail until healed.
        pub fn fail_reads(&self, path: impl Into<DocPath>) {
            lock(&self.failing_reads).insert(path.into());
        }

        /// Clears all injected failures.
        pub fn heal(&self) {
            lock(&self.failing_writes).clear();
            lock(&self.failing_reads).clear();
        }

        /// Stores `doc` remotely and delivers it to every subscriber of `path`.
        pub fn push(&self, path: impl Into<DocPath>, doc: Option<Document>) {
            let path = path.into();
            match &doc {
                Some(d) => {
                    lock(&self.docs).insert(path.clone(), d.clone());
                }
                None => {
                    lock(&self.docs).remove(&path);
                }
            }
            let callbacks: Vec<SnapshotCallback> = lock(&self.subscribers)
                .get(&path)
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default();
            for cb in callbacks {
                cb(doc.clone());
            }
        }

        /// Announces a connectivity transition to every listener.
        pub fn set_online(&self, online: bool) {
            let callbacks: Vec<ConnectivityCallback> = lock(&self.connectivity)
                .iter()
                .map(|(_, cb)| cb.clone())
                .collect();
            for cb in callbacks {
                cb(online);
            }
        }

        /// Active subscriptions for `path`.
        pub fn subscriber_count(&self, path: &str) -> usize {
            lock(&self.subscribers).get(path).map_or(0, Vec::len)
        }

        /// Active connectivity listeners.
        pub fn connectivity_listener_count(&self) -> usize {
            lock(&self.connectivity).len()
        }
    }

    #[async_trait]
    impl RemoteStore for MockStore {
        fn is_configured(&self) -> bool {
            self.configured.load(Ordering::SeqCst)
        }

        async fn get_data(&self, path: &DocPath) -> SyncResult<Option<Document>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if lock(&self.failing_reads).contains(path) {
                return Err(SyncError::Network(format!("read of {path} failed")));
            }
            Ok(lock(&self.docs).get(path).cloned())
        }

        async fn set_data(&self, path: &DocPath, data: Document) -> SyncResult<()> {
            if lock(&self.failing_writes).contains(path) {
                return Err(SyncError::Network(format!("write to {path} failed")));
            }
            lock(&self.docs).insert(path.clone(), data.clone());
            lock(&self.writes).push((path.clone(), data));
            Ok(())
        }

        fn subscribe(&self, path: &DocPath, on_change: SnapshotCallback) -> Unsubscribe {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            lock(&self.subscribers)
                .entry(path.clone())
                .or_default()
                .push((id, on_change));

            let subscribers = Arc::clone(&self.subscribers);
            let path = path.clone();
            Unsubscribe::new(move || {
                let mut subs = lock(&subscribers);
                if let Some(list) = subs.get_mut(&path) {
                    list.retain(|(sid, _)| *sid != id);
                    if list.is_empty() {
                        subs.remove(&path);
                    }
                }
            })
        }

        fn on_connectivity_change(&self, on_change: ConnectivityCallback) -> Unsubscribe {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            lock(&self.connectivity).push((id, on_change));

            let listeners = Arc::clone(&self.connectivity);
            Unsubscribe::new(move || {
                lock(&listeners).retain(|(lid, _)| *lid != id);
            })
        }
    }
}
