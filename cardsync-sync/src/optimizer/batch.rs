//! Debounced, size-bounded batching of outgoing writes.
//!
//! Writes are parked per path until either the shared debounce timer fires
//! or the number of distinct pending paths reaches the batch size. A newer
//! write for a path replaces the parked one, so rapid edits to the same
//! document collapse into a single network call.
//!
//! A flush drains the whole pending map and runs every entry concurrently.
//! Each entry settles on its own: a failure is reported to that entry's
//! callers and the entry alone is re-queued for a bounded number of retries.

use crate::adapter::lock;
use crate::error::{SyncError, SyncResult};
use cardsync_types::{DocPath, Document};
use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Performs the actual write for one batched path.
pub type FlushFn = Arc<dyn Fn(DocPath, Document) -> BoxFuture<'static, SyncResult<()>> + Send + Sync>;

/// Wraps an async closure as a [`FlushFn`].
pub fn flush_fn<F, Fut>(f: F) -> FlushFn
where
    F: Fn(DocPath, Document) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<()>> + Send + 'static,
{
    Arc::new(move |path, data| Box::pin(f(path, data)))
}

struct PendingEntry {
    data: Document,
    enqueued_at: Instant,
    flush: FlushFn,
    attempts: u32,
    waiters: Vec<oneshot::Sender<SyncResult<()>>>,
}

impl PendingEntry {
    fn settle(self, result: &SyncResult<()>) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Resolves once the write carrying a batched document has settled.
///
/// If a later write to the same path superseded this one before the flush,
/// the ticket reports the outcome of that later write.
#[must_use = "a batch ticket does nothing unless awaited"]
pub struct BatchTicket {
    rx: oneshot::Receiver<SyncResult<()>>,
}

impl Future for BatchTicket {
    type Output = SyncResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SyncError::Shutdown)))
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Paths written successfully.
    pub flushed: Vec<DocPath>,
    /// Paths whose write failed.
    pub failed: Vec<DocPath>,
    /// Failed paths parked again for a retry.
    pub requeued: Vec<DocPath>,
}

impl BatchReport {
    /// True when nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct BatchInner {
    delay: Duration,
    max_batch_size: usize,
    max_retries: u32,
    pending: Mutex<HashMap<DocPath, PendingEntry>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// The batching scheduler. Cheap to clone; clones share state.
///
/// Scheduling spawns onto the current tokio runtime, so `batch_update`
/// must be called from within one.
#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<BatchInner>,
}

impl BatchScheduler {
    /// Creates a scheduler.
    pub fn new(delay: Duration, max_batch_size: usize, max_retries: u32) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                delay,
                max_batch_size: max_batch_size.max(1),
                max_retries,
                pending: Mutex::new(HashMap::new()),
                timer: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Parks `data` for `path`, replacing any pending write for that path.
    pub fn batch_update(&self, path: DocPath, data: Document, flush: FlushFn) -> BatchTicket {
        let (tx, rx) = oneshot::channel();
        if self.inner.closed.load(Ordering::SeqCst) {
            let _ = tx.send(Err(SyncError::Shutdown));
            return BatchTicket { rx };
        }

        let pending_paths = {
            let mut pending = lock(&self.inner.pending);
            let mut waiters = pending
                .remove(&path)
                .map(|superseded| {
                    debug!("Superseding pending write for {}", path);
                    superseded.waiters
                })
                .unwrap_or_default();
            waiters.push(tx);
            pending.insert(
                path,
                PendingEntry {
                    data,
                    enqueued_at: Instant::now(),
                    flush,
                    attempts: 0,
                    waiters,
                },
            );
            pending.len()
        };

        if pending_paths >= self.inner.max_batch_size {
            debug!("Batch reached {} paths, flushing immediately", pending_paths);
            self.cancel_timer();
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.process_batch().await;
            });
        } else {
            self.arm_timer();
        }

        BatchTicket { rx }
    }

    /// Drains every pending entry and writes them concurrently.
    pub async fn process_batch(&self) -> BatchReport {
        let drained: Vec<(DocPath, PendingEntry)> = lock(&self.inner.pending).drain().collect();
        let mut report = BatchReport::default();
        if drained.is_empty() {
            return report;
        }

        debug!("Flushing batch of {} paths", drained.len());
        let flushes = drained.into_iter().map(|(path, entry)| {
            let write = (entry.flush)(path.clone(), entry.data.clone());
            async move {
                let result = write.await;
                (path, entry, result)
            }
        });

        for (path, entry, result) in join_all(flushes).await {
            match result {
                Ok(()) => {
                    debug!(
                        "Flushed {} after {}ms",
                        path,
                        entry.enqueued_at.elapsed().as_millis()
                    );
                    entry.settle(&Ok(()));
                    report.flushed.push(path);
                }
                Err(e) => {
                    warn!("Batched write to {} failed: {}", path, e);
                    let PendingEntry {
                        data,
                        flush,
                        attempts,
                        waiters,
                        ..
                    } = entry;
                    for waiter in waiters {
                        let _ = waiter.send(Err(e.clone()));
                    }
                    if attempts < self.inner.max_retries && self.requeue(&path, data, flush, attempts + 1) {
                        report.requeued.push(path.clone());
                    }
                    report.failed.push(path);
                }
            }
        }

        if !report.requeued.is_empty() {
            self.arm_timer();
        }
        report
    }

    /// Re-parks a failed entry unless a newer write already took its place.
    fn requeue(&self, path: &DocPath, data: Document, flush: FlushFn, attempts: u32) -> bool {
        if self.inner.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut pending = lock(&self.inner.pending);
        if pending.contains_key(path) {
            return false;
        }
        pending.insert(
            path.clone(),
            PendingEntry {
                data,
                enqueued_at: Instant::now(),
                flush,
                attempts,
                waiters: Vec::new(),
            },
        );
        true
    }

    fn arm_timer(&self) {
        let scheduler = self.clone();
        let delay = self.inner.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached so re-arming the timer cannot cancel a running flush.
            tokio::spawn(async move {
                scheduler.process_batch().await;
            });
        });
        if let Some(previous) = lock(&self.inner.timer).replace(handle) {
            previous.abort();
        }
    }

    fn cancel_timer(&self) {
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.abort();
        }
    }

    /// Paths currently waiting to be flushed.
    pub fn pending_paths(&self) -> Vec<DocPath> {
        let mut paths: Vec<DocPath> = lock(&self.inner.pending).keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of distinct pending paths.
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Stops the timer and fails every parked write with `Shutdown`.
    ///
    /// Later calls to `batch_update` fail immediately. Idempotent.
    pub fn teardown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.cancel_timer();
        let drained: Vec<PendingEntry> = lock(&self.inner.pending).drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.settle(&Err(SyncError::Shutdown));
        }
    }

    /// Whether `teardown` has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}
