//! Document helpers.
//!
//! Documents are untyped JSON trees. Every document the engine writes is an
//! object carrying the reserved [`LAST_MODIFIED`] field, which holds the
//! epoch-millisecond time of the write and drives staleness comparisons.

use serde_json::{Map, Value};

/// An arbitrary JSON document.
pub type Document = Value;

/// Reserved field holding the write time in epoch milliseconds.
pub const LAST_MODIFIED: &str = "_lastModified";

/// Returns true for the engine's reserved fields.
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    key == LAST_MODIFIED
}

/// Reads `_lastModified` from a document.
///
/// Floats are truncated; negative, missing or non-numeric values read as `None`.
#[must_use]
pub fn last_modified(doc: &Value) -> Option<u64> {
    let raw = doc.as_object()?.get(LAST_MODIFIED)?;
    raw.as_u64()
        .or_else(|| raw.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Returns a copy of `doc` with `_lastModified` set to `millis`.
///
/// Returns `None` when `doc` is not an object.
#[must_use]
pub fn stamped(doc: &Value, millis: u64) -> Option<Value> {
    let mut map = doc.as_object()?.clone();
    map.insert(LAST_MODIFIED.to_string(), Value::from(millis));
    Some(Value::Object(map))
}

/// Number of non-reserved top-level keys. Non-objects count as zero.
#[must_use]
pub fn content_key_count(doc: &Value) -> usize {
    doc.as_object()
        .map(|m| m.keys().filter(|k| !is_reserved(k)).count())
        .unwrap_or(0)
}

/// Returns a copy of `doc` without reserved top-level fields.
#[must_use]
pub fn without_reserved(doc: &Value) -> Value {
    match doc {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !is_reserved(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

/// Treats JSON `null` the same as an absent document.
#[must_use]
pub fn present(doc: Option<&Value>) -> Option<&Value> {
    doc.filter(|v| !v.is_null())
}
