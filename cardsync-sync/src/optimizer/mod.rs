//! Sync optimizer: diffing, merging and write batching.
//!
//! The diff and merge halves are pure functions over JSON documents and are
//! exported for direct use. [`SyncOptimizer`] bundles them with a
//! [`BatchScheduler`] configured from [`SyncConfig`].

pub mod batch;
pub mod diff;
pub mod merge;

pub use batch::{flush_fn, BatchReport, BatchScheduler, BatchTicket, FlushFn};
pub use diff::{apply_diff, calculate_diff};
pub use merge::{merge_objects, smart_merge};

use crate::config::SyncConfig;
use cardsync_types::{DiffResult, DocPath, Document};

/// Diffing, merging and batching with one configuration.
#[derive(Clone)]
pub struct SyncOptimizer {
    config: SyncConfig,
    batches: BatchScheduler,
}

impl SyncOptimizer {
    /// Creates an optimizer.
    pub fn new(config: SyncConfig) -> Self {
        let batches = BatchScheduler::new(
            config.batch_delay(),
            config.max_batch_size,
            config.max_flush_retries,
        );
        Self { config, batches }
    }

    /// The configuration this optimizer was built with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn calculate_diff(&self, old: Option<&Document>, new: Option<&Document>) -> DiffResult {
        calculate_diff(old, new)
    }

    pub fn apply_diff(&self, base: Option<&Document>, diff: &DiffResult) -> Document {
        apply_diff(base, diff)
    }

    /// Smart merge using this optimizer's thresholds.
    pub fn smart_merge(&self, local: Option<&Document>, remote: Option<&Document>) -> Document {
        smart_merge(local, remote, &self.config.merge)
    }

    pub fn merge_objects(&self, target: &Document, source: &Document) -> Document {
        merge_objects(target, source)
    }

    /// Parks a write; see [`BatchScheduler::batch_update`].
    pub fn batch_update(&self, path: DocPath, data: Document, flush: FlushFn) -> BatchTicket {
        self.batches.batch_update(path, data, flush)
    }

    /// Flushes everything pending right now.
    pub async fn process_batch(&self) -> BatchReport {
        self.batches.process_batch().await
    }

    /// Read-only view of the pending batch.
    pub fn pending_paths(&self) -> Vec<DocPath> {
        self.batches.pending_paths()
    }

    pub fn pending_count(&self) -> usize {
        self.batches.pending_count()
    }

    /// Cancels the timer and fails parked writes.
    pub fn teardown(&self) {
        self.batches.teardown();
    }
}
