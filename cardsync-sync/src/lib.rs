//! Offline-first document sync engine for CardSync.
//!
//! Keeps locally edited documents (cards, profiles) consistent with a remote
//! key-value store across devices and intermittent connectivity.
//!
//! # Architecture
//!
//! The engine is last-writer-wins with a pluggable conflict resolver and a
//! shallow structural merge. It is not a CRDT: there is no causal ordering
//! between arbitrary concurrent writers.
//!
//! ## Components
//!
//! - **Adapter**: the [`RemoteStore`] trait the engine talks to
//! - **Optimizer**: structural diff, smart merge and debounced write batching
//! - **Conflict**: detection, the default policy and resolvers, including an
//!   interactive prompt the UI answers asynchronously
//! - **Coordinator**: subscriptions, offline queue, last-known-remote cache
//!   and status broadcast
//!
//! ## Write Path
//!
//! 1. **Stamp**: inject `_lastModified` from the coordinator's clock
//! 2. **Queue**: while offline, park the latest envelope per path
//! 3. **Diff**: skip the write if nothing changed since the last snapshot
//! 4. **Check**: read the remote and resolve if it is newer
//! 5. **Batch**: hand the envelope to the optimizer, which flushes to the store
//!
//! # Example
//!
//! ```
//! use cardsync_sync::adapter::mock::MockStore;
//! use cardsync_sync::{SyncConfig, SyncCoordinator};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(MockStore::new());
//! let coordinator = SyncCoordinator::new(store, SyncConfig::default());
//! assert!(coordinator.is_online());
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod conflict;
mod coordinator;
mod error;
pub mod optimizer;
pub mod status;

pub use adapter::{ConnectivityCallback, RemoteStore, SnapshotCallback, Unsubscribe};
pub use config::{MergeConfig, SyncConfig};
pub use conflict::{
    is_conflict, resolve_by_timestamp, resolver_fn, ConflictChoice, ConflictPrompt,
    ConflictRequest, ConflictResolver, LastWriterWins, MergeResolver,
};
pub use coordinator::{OfflineSyncReport, SyncCoordinator, WriteOptions, WriteOutcome};
pub use error::{SyncError, SyncResult};
pub use optimizer::{
    apply_diff, calculate_diff, merge_objects, smart_merge, BatchReport, BatchScheduler,
    BatchTicket, SyncOptimizer,
};
pub use status::{StatusBroadcaster, SyncStatus};
