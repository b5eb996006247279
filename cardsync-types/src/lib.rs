//! Core value types for CardSync.
//!
//! This crate defines the plugin-agnostic types shared by the sync engine:
//! - Document paths (opaque string keys)
//! - Document helpers and the `_lastModified` envelope field
//! - Structural change records produced by diffing two documents
//! - An injectable millisecond clock
//!
//! Domain schemas (cards, profiles, contacts) are not modelled here. The
//! engine treats every document as an untyped JSON tree.

mod change;
mod clock;
pub mod document;
mod path;

pub use change::{
    child_path, escape_segment, unescape_segment, ChangeKind, ChangeRecord, DiffResult,
    PATH_SEPARATOR,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{Document, LAST_MODIFIED};
pub use path::DocPath;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid path: {0}")]
    InvalidPath(String),
}
