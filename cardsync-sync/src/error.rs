//! Error types for the sync layer.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Network error talking to the remote store.
    #[error("network error: {0}")]
    Network(String),

    /// A write was given something other than a JSON object.
    #[error("invalid document at {path}: expected an object")]
    InvalidDocument { path: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A conflict resolver failed.
    #[error("conflict resolver failed: {0}")]
    Resolver(String),

    /// The interactive conflict prompt was dismissed without a choice.
    #[error("conflict resolution cancelled")]
    ResolutionCancelled,

    /// The component was torn down before the operation completed.
    #[error("sync engine shut down")]
    Shutdown,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
