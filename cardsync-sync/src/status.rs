//! Sync status tracking and broadcast.
//!
//! The coordinator reports progress through a single status value that UI
//! code observes via [`StatusBroadcaster::subscribe`]. Listeners run
//! synchronously on every update; a listener that panics is logged and
//! skipped without affecting the others.

use crate::adapter::{lock, Unsubscribe};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Coarse sync state exposed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Nothing in flight and the last operation succeeded.
    #[default]
    Idle,
    /// A read, write or offline flush is in flight.
    Syncing,
    /// The last operation failed. Clears on the next success.
    Error,
    /// Connectivity is down; writes are being queued.
    Offline,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// A status listener.
pub type StatusListener = Arc<dyn Fn(SyncStatus) + Send + Sync>;

type ListenerList = Arc<Mutex<Vec<(u64, StatusListener)>>>;

/// Holds the current status and fans updates out to listeners.
pub struct StatusBroadcaster {
    current: Mutex<SyncStatus>,
    listeners: ListenerList,
    next_id: AtomicU64,
}

impl StatusBroadcaster {
    /// Creates a broadcaster starting at `initial`.
    pub fn new(initial: SyncStatus) -> Self {
        Self {
            current: Mutex::new(initial),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// The most recently published status.
    pub fn current(&self) -> SyncStatus {
        *lock(&self.current)
    }

    /// Records `status` and notifies every listener.
    pub fn publish(&self, status: SyncStatus) {
        *lock(&self.current) = status;

        // Snapshot so listeners may (un)subscribe from inside the callback.
        let listeners: Vec<(u64, StatusListener)> = lock(&self.listeners).clone();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(status))).is_err() {
                warn!("Status listener {} panicked on {}", id, status);
            }
        }
    }

    /// Registers a listener.
    pub fn subscribe(&self, listener: StatusListener) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.listeners).push((id, listener));

        let listeners = Arc::clone(&self.listeners);
        Unsubscribe::new(move || {
            lock(&listeners).retain(|(lid, _)| *lid != id);
        })
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Drops every listener.
    pub fn clear(&self) {
        lock(&self.listeners).clear();
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(SyncStatus::Idle)
    }
}
