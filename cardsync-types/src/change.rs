//! Structural change records.
//!
//! A diff between two documents is a flat list of [`ChangeRecord`]s, each
//! addressing one leaf by its dotted key path. When either side of the diff
//! is absent the result is a wholesale [`DiffResult::Replace`] instead.
//!
//! Keys are escaped inside a path the way JSON Pointer escapes them: `~`
//! becomes `~0` and `.` becomes `~1`, so any object key survives the trip
//! through a dotted path.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

/// Separator between key segments in a change path.
pub const PATH_SEPARATOR: char = '.';

/// Escapes one object key for use as a path segment.
#[must_use]
pub fn escape_segment(key: &str) -> Cow<'_, str> {
    if key.contains(['~', PATH_SEPARATOR]) {
        Cow::Owned(key.replace('~', "~0").replace(PATH_SEPARATOR, "~1"))
    } else {
        Cow::Borrowed(key)
    }
}

/// Reverses [`escape_segment`].
#[must_use]
pub fn unescape_segment(segment: &str) -> Cow<'_, str> {
    if segment.contains('~') {
        Cow::Owned(segment.replace("~1", ".").replace("~0", "~"))
    } else {
        Cow::Borrowed(segment)
    }
}

/// Appends `key` to a parent path. `None` is the document root.
#[must_use]
pub fn child_path(parent: Option<&str>, key: &str) -> String {
    let key = escape_segment(key);
    match parent {
        Some(parent) => format!("{parent}{PATH_SEPARATOR}{key}"),
        None => key.into_owned(),
    }
}

/// The kind of operation a change record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Key present only in the new document.
    Add,
    /// Key present on both sides with different values.
    Update,
    /// Key present only in the old document.
    Remove,
}

/// One leaf-level change between two documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Dotted key path from the document root, e.g. `contact.email`.
    /// Segments are escaped with [`escape_segment`].
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

impl ChangeRecord {
    /// A key that appeared.
    #[must_use]
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            kind: ChangeKind::Add,
            path: path.into(),
            value: Some(value),
            old_value: None,
        }
    }

    /// A key whose value changed.
    #[must_use]
    pub fn update(path: impl Into<String>, value: Value, old_value: Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            path: path.into(),
            value: Some(value),
            old_value: Some(old_value),
        }
    }

    /// A key that disappeared.
    #[must_use]
    pub fn remove(path: impl Into<String>, old_value: Value) -> Self {
        Self {
            kind: ChangeKind::Remove,
            path: path.into(),
            value: None,
            old_value: Some(old_value),
        }
    }

    /// Splits the dotted path into its unescaped key segments.
    pub fn segments(&self) -> impl Iterator<Item = Cow<'_, str>> {
        self.path.split(PATH_SEPARATOR).map(unescape_segment)
    }
}

/// Outcome of diffing two documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiffResult {
    /// One side was absent; carry the new document wholesale.
    Replace { document: Value },
    /// Granular leaf changes.
    Diff { changes: Vec<ChangeRecord> },
}

impl DiffResult {
    /// Whether applying this diff changes anything.
    ///
    /// A replacement always counts as a change.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        match self {
            Self::Replace { .. } => true,
            Self::Diff { changes } => !changes.is_empty(),
        }
    }

    /// Number of granular changes. Replacements carry none.
    #[must_use]
    pub fn change_count(&self) -> usize {
        match self {
            Self::Replace { .. } => 0,
            Self::Diff { changes } => changes.len(),
        }
    }

    /// The granular changes, empty for replacements.
    #[must_use]
    pub fn changes(&self) -> &[ChangeRecord] {
        match self {
            Self::Replace { .. } => &[],
            Self::Diff { changes } => changes,
        }
    }
}
