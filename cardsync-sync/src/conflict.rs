//! Conflict detection and resolution.
//!
//! A conflict exists when the stored remote document carries a newer
//! `_lastModified` than the envelope about to overwrite it. Resolution is
//! either the built-in last-writer-wins policy or a [`ConflictResolver`]
//! registered alongside a subscription.
//!
//! [`ConflictPrompt`] is a resolver that hands the decision to the UI: it
//! sends a [`ConflictRequest`] over a channel and suspends the write until
//! the UI answers. A dismissed request resolves to the default policy.

use crate::config::MergeConfig;
use crate::error::{SyncError, SyncResult};
use crate::optimizer::smart_merge;
use async_trait::async_trait;
use cardsync_types::document::last_modified;
use cardsync_types::{DocPath, Document};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Produces the authoritative document when local and remote disagree.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// Returns the document to write in place of `local`.
    async fn resolve(
        &self,
        path: &DocPath,
        local: &Document,
        remote: &Document,
    ) -> SyncResult<Document>;
}

/// Whether writing `local` would clobber a newer `remote`.
///
/// A missing timestamp reads as 0.
pub fn is_conflict(local: &Document, remote: &Document) -> bool {
    last_modified(remote).unwrap_or(0) > last_modified(local).unwrap_or(0)
}

/// Default policy: the larger `_lastModified` wins outright, ties keep local.
pub fn resolve_by_timestamp(local: &Document, remote: &Document) -> Document {
    if is_conflict(local, remote) {
        remote.clone()
    } else {
        local.clone()
    }
}

/// Runs `resolver` if present, falling back to the default policy when it
/// is absent or fails.
pub(crate) async fn resolve_conflict(
    resolver: Option<Arc<dyn ConflictResolver>>,
    path: &DocPath,
    local: &Document,
    remote: &Document,
) -> Document {
    let Some(resolver) = resolver else {
        info!("Conflict on {}, remote is newer, applying last-writer-wins", path);
        return resolve_by_timestamp(local, remote);
    };

    match resolver.resolve(path, local, remote).await {
        Ok(resolved) => {
            info!("Conflict on {} resolved by custom resolver", path);
            resolved
        }
        Err(e) => {
            warn!("Conflict resolver for {} failed ({}), applying last-writer-wins", path, e);
            resolve_by_timestamp(local, remote)
        }
    }
}

/// The default policy as a resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

#[async_trait]
impl ConflictResolver for LastWriterWins {
    async fn resolve(
        &self,
        _path: &DocPath,
        local: &Document,
        remote: &Document,
    ) -> SyncResult<Document> {
        Ok(resolve_by_timestamp(local, remote))
    }
}

/// Resolves every conflict with the smart-merge heuristic.
#[derive(Debug, Clone, Default)]
pub struct MergeResolver {
    config: MergeConfig,
}

impl MergeResolver {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConflictResolver for MergeResolver {
    async fn resolve(
        &self,
        _path: &DocPath,
        local: &Document,
        remote: &Document,
    ) -> SyncResult<Document> {
        Ok(smart_merge(Some(local), Some(remote), &self.config))
    }
}

/// Adapts an async closure into a resolver.
pub struct FnResolver<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ConflictResolver for FnResolver<F>
where
    F: Fn(Document, Document) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<Document>> + Send + 'static,
{
    async fn resolve(
        &self,
        _path: &DocPath,
        local: &Document,
        remote: &Document,
    ) -> SyncResult<Document> {
        (self.f)(local.clone(), remote.clone()).await
    }
}

/// Builds a resolver from `|local, remote| async { ... }`.
pub fn resolver_fn<F, Fut>(f: F) -> Arc<dyn ConflictResolver>
where
    F: Fn(Document, Document) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<Document>> + Send + 'static,
{
    Arc::new(FnResolver { f })
}

// ── Interactive handshake ────────────────────────────────────────

/// The user's answer to a conflict prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictChoice {
    /// Keep the local edit.
    KeepLocal,
    /// Discard the local edit in favour of the remote document.
    TakeRemote,
    /// Smart-merge both versions.
    Merge,
    /// Write this document instead.
    Custom(Document),
}

/// A pending conflict awaiting a decision from the UI.
#[derive(Debug)]
pub struct ConflictRequest {
    pub path: DocPath,
    pub local: Document,
    pub remote: Document,
    reply: oneshot::Sender<ConflictChoice>,
}

impl ConflictRequest {
    /// Answers the prompt, resuming the suspended write.
    ///
    /// Returns `false` if the write is no longer waiting.
    pub fn respond(self, choice: ConflictChoice) -> bool {
        self.reply.send(choice).is_ok()
    }

    /// Dismisses the prompt; the write falls back to the default policy.
    pub fn dismiss(self) {}
}

/// Resolver that asks the UI through a channel.
#[derive(Debug, Clone)]
pub struct ConflictPrompt {
    requests: mpsc::Sender<ConflictRequest>,
    merge: MergeConfig,
}

impl ConflictPrompt {
    /// Creates a prompt and the receiver the UI should drain.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ConflictRequest>) {
        Self::with_merge_config(buffer, MergeConfig::default())
    }

    /// Like [`ConflictPrompt::channel`], with explicit merge thresholds for
    /// [`ConflictChoice::Merge`].
    pub fn with_merge_config(
        buffer: usize,
        merge: MergeConfig,
    ) -> (Self, mpsc::Receiver<ConflictRequest>) {
        let (requests, rx) = mpsc::channel(buffer.max(1));
        (Self { requests, merge }, rx)
    }
}

#[async_trait]
impl ConflictResolver for ConflictPrompt {
    async fn resolve(
        &self,
        path: &DocPath,
        local: &Document,
        remote: &Document,
    ) -> SyncResult<Document> {
        let (reply, answer) = oneshot::channel();
        let request = ConflictRequest {
            path: path.clone(),
            local: local.clone(),
            remote: remote.clone(),
            reply,
        };
        self.requests
            .send(request)
            .await
            .map_err(|_| SyncError::ResolutionCancelled)?;

        let choice = answer.await.map_err(|_| SyncError::ResolutionCancelled)?;
        Ok(match choice {
            ConflictChoice::KeepLocal => local.clone(),
            ConflictChoice::TakeRemote => remote.clone(),
            ConflictChoice::Merge => smart_merge(Some(local), Some(remote), &self.merge),
            ConflictChoice::Custom(doc) => doc,
        })
    }
}
