//! Structural diff between two documents.
//!
//! Objects are walked key by key over the union of both sides; everything
//! else (arrays, strings, numbers) is an opaque leaf compared by deep
//! equality. Keys are escaped and joined with `.` into dotted change paths.

use cardsync_types::document::present;
use cardsync_types::{child_path, ChangeKind, ChangeRecord, DiffResult, Document};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Computes the changes that turn `old` into `new`.
///
/// An absent (or `null`) side yields a wholesale replacement, as does a
/// pair of unequal non-object roots.
pub fn calculate_diff(old: Option<&Document>, new: Option<&Document>) -> DiffResult {
    let (Some(old), Some(new)) = (present(old), present(new)) else {
        return DiffResult::Replace {
            document: new.cloned().unwrap_or(Value::Null),
        };
    };

    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut changes = Vec::new();
            diff_objects(None, old_map, new_map, &mut changes);
            DiffResult::Diff { changes }
        }
        _ if old == new => DiffResult::Diff { changes: Vec::new() },
        _ => DiffResult::Replace {
            document: new.clone(),
        },
    }
}

fn diff_objects(
    prefix: Option<&str>,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    changes: &mut Vec<ChangeRecord>,
) {
    for (key, old_value) in old {
        let path = child_path(prefix, key);
        match new.get(key) {
            None => changes.push(ChangeRecord::remove(path, old_value.clone())),
            Some(Value::Object(new_obj)) if old_value.is_object() => {
                if let Value::Object(old_obj) = old_value {
                    diff_objects(Some(&path), old_obj, new_obj, changes);
                }
            }
            Some(new_value) if new_value != old_value => {
                changes.push(ChangeRecord::update(path, new_value.clone(), old_value.clone()));
            }
            Some(_) => {}
        }
    }

    for (key, new_value) in new {
        if !old.contains_key(key) {
            changes.push(ChangeRecord::add(child_path(prefix, key), new_value.clone()));
        }
    }
}

/// Applies a diff to `base`, returning the patched document.
///
/// Missing or non-object intermediates along a change path are replaced
/// with empty objects. Removing a key that does not exist is ignored.
pub fn apply_diff(base: Option<&Document>, diff: &DiffResult) -> Document {
    let changes = match diff {
        DiffResult::Replace { document } => return document.clone(),
        DiffResult::Diff { changes } => changes,
    };

    let mut doc = match present(base) {
        Some(v) if v.is_object() => v.clone(),
        _ => Value::Object(Map::new()),
    };

    for change in changes {
        let segments: Vec<Cow<'_, str>> = change.segments().collect();
        let Some((leaf, parents)) = segments.split_last() else {
            continue;
        };

        match change.kind {
            ChangeKind::Add | ChangeKind::Update => {
                if let Some(parent) = parent_map(&mut doc, parents) {
                    parent.insert(
                        leaf.clone().into_owned(),
                        change.value.clone().unwrap_or(Value::Null),
                    );
                }
            }
            ChangeKind::Remove => {
                if let Some(parent) = existing_parent(&mut doc, parents) {
                    parent.remove(&**leaf);
                }
            }
        }
    }

    doc
}

/// Walks to the object at `parents`, creating objects along the way.
fn parent_map<'a>(
    root: &'a mut Value,
    parents: &[Cow<'_, str>],
) -> Option<&'a mut Map<String, Value>> {
    let mut current = root;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = current
            .as_object_mut()?
            .entry(&**segment)
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    current.as_object_mut()
}

/// Walks to the object at `parents` without creating anything.
fn existing_parent<'a>(
    root: &'a mut Value,
    parents: &[Cow<'_, str>],
) -> Option<&'a mut Map<String, Value>> {
    let mut current = root;
    for segment in parents {
        current = current.as_object_mut()?.get_mut(&**segment)?;
    }
    current.as_object_mut()
}
