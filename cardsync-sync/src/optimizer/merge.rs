//! Smart merge of two versions of the same document.
//!
//! Remote pushes are frequently partial: a device that touched one field may
//! publish a snapshot containing only that field. Replacing the local copy
//! with such a snapshot would erase everything else, so the merge first
//! decides whether either side looks partial and, if so, layers it onto the
//! fuller side instead of letting it win outright.

use crate::config::MergeConfig;
use cardsync_types::document::{content_key_count, last_modified, present};
use cardsync_types::{Document, LAST_MODIFIED};
use serde_json::Value;
use tracing::debug;

/// Combines a local and a remote version of one document.
///
/// - An absent side yields the other verbatim (`null` if both are absent).
/// - A remote with fewer than `partial_ratio` of the local keys is merged
///   onto local.
/// - Versions stamped within `concurrent_window_ms` of each other are
///   merged field by field.
/// - Otherwise the newer version wins, unless it has fewer than
///   `stale_partial_ratio` of the older version's keys, in which case it is
///   merged onto the older one.
pub fn smart_merge(
    local: Option<&Document>,
    remote: Option<&Document>,
    config: &MergeConfig,
) -> Document {
    let (local, remote) = match (present(local), present(remote)) {
        (None, None) => return Value::Null,
        (Some(local), None) => return local.clone(),
        (None, Some(remote)) => return remote.clone(),
        (Some(local), Some(remote)) => (local, remote),
    };

    if !local.is_object() || !remote.is_object() {
        return remote.clone();
    }

    let local_keys = content_key_count(local) as f64;
    let remote_keys = content_key_count(remote) as f64;

    if local_keys > 0.0 && remote_keys < local_keys * config.partial_ratio {
        debug!(
            "Remote snapshot has {} of {} keys, merging as partial update",
            remote_keys, local_keys
        );
        return merge_objects(local, remote);
    }

    let local_ts = last_modified(local).unwrap_or(0);
    let remote_ts = last_modified(remote).unwrap_or(0);

    if local_ts.abs_diff(remote_ts) <= config.concurrent_window_ms {
        return merge_objects(local, remote);
    }

    if remote_ts > local_ts {
        if remote_keys < local_keys * config.stale_partial_ratio {
            merge_objects(local, remote)
        } else {
            remote.clone()
        }
    } else if local_keys < remote_keys * config.stale_partial_ratio {
        merge_objects(remote, local)
    } else {
        local.clone()
    }
}

/// Deep-merges `source` onto `target`.
///
/// `_lastModified` keeps the larger of both sides and `null` in `source`
/// never clears a value in `target`. Arrays of objects carrying an `id` are
/// reconciled by id; other arrays keep `target`'s copy when `source`'s is
/// empty or shorter, which guards against partial lists.
pub fn merge_objects(target: &Document, source: &Document) -> Document {
    let (Value::Object(target_map), Value::Object(source_map)) = (target, source) else {
        return if source.is_null() { target.clone() } else { source.clone() };
    };

    let mut merged = target_map.clone();
    for (key, source_value) in source_map {
        if key == LAST_MODIFIED {
            let newest = match (last_modified(target), last_modified(source)) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            if let Some(ts) = newest {
                merged.insert(key.clone(), Value::from(ts));
            }
            continue;
        }

        match merged.get(key) {
            Some(existing) if !existing.is_null() => {
                if source_value.is_null() {
                    continue;
                }
                let value = merge_values(existing, source_value);
                merged.insert(key.clone(), value);
            }
            _ => {
                merged.insert(key.clone(), source_value.clone());
            }
        }
    }

    Value::Object(merged)
}

fn merge_values(target: &Value, source: &Value) -> Value {
    match (target, source) {
        (Value::Object(_), Value::Object(_)) => merge_objects(target, source),
        (Value::Array(t), Value::Array(s)) => merge_arrays(t, s),
        _ => source.clone(),
    }
}

fn merge_arrays(target: &[Value], source: &[Value]) -> Value {
    if !source.is_empty() && is_identified(target) && is_identified(source) {
        return Value::Array(reconcile_by_id(target, source));
    }
    if source.is_empty() || source.len() < target.len() {
        return Value::Array(target.to_vec());
    }
    Value::Array(source.to_vec())
}

fn item_id(item: &Value) -> Option<&Value> {
    item.as_object()?.get("id").filter(|id| !id.is_null())
}

fn is_identified(items: &[Value]) -> bool {
    items.iter().all(|item| item_id(item).is_some())
}

/// Updates items whose id already exists, appends the rest in source order.
fn reconcile_by_id(target: &[Value], source: &[Value]) -> Vec<Value> {
    let mut result = target.to_vec();
    for item in source {
        let position = result.iter().position(|existing| item_id(existing) == item_id(item));
        match position {
            Some(idx) => {
                let updated = merge_objects(&result[idx], item);
                result[idx] = updated;
            }
            None => result.push(item.clone()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_never_clears_target() {
        let merged = merge_objects(&json!({ "a": 1 }), &json!({ "a": null }));
        assert_eq!(merged, json!({ "a": 1 }));
    }

    #[test]
    fn timestamp_takes_max() {
        let merged = merge_objects(
            &json!({ "_lastModified": 500 }),
            &json!({ "_lastModified": 200 }),
        );
        assert_eq!(merged["_lastModified"], json!(500));
    }

    #[test]
    fn shorter_plain_array_keeps_target() {
        let merged = merge_objects(&json!({ "t": [1, 2, 3] }), &json!({ "t": [9] }));
        assert_eq!(merged, json!({ "t": [1, 2, 3] }));
    }

    #[test]
    fn longer_plain_array_replaces() {
        let merged = merge_objects(&json!({ "t": [1] }), &json!({ "t": [1, 2] }));
        assert_eq!(merged, json!({ "t": [1, 2] }));
    }
}
