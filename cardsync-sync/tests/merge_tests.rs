use cardsync_sync::{merge_objects, smart_merge, MergeConfig};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn merge(local: &Value, remote: &Value) -> Value {
    smart_merge(Some(local), Some(remote), &MergeConfig::default())
}

fn full_card(ts: u64) -> Value {
    json!({
        "name": "Grace Hopper",
        "title": "Rear Admiral",
        "company": "US Navy",
        "email": "grace@navy.mil",
        "phone": "555-0100",
        "_lastModified": ts
    })
}

// ── Absent sides ─────────────────────────────────────────────────

#[test]
fn absent_side_returns_other() {
    let doc = json!({ "a": 1 });
    let cfg = MergeConfig::default();
    assert_eq!(smart_merge(None, Some(&doc), &cfg), doc);
    assert_eq!(smart_merge(Some(&doc), None, &cfg), doc);
    assert_eq!(smart_merge(Some(&Value::Null), Some(&doc), &cfg), doc);
    assert_eq!(smart_merge(None, None, &cfg), Value::Null);
}

// ── Partial-update detection ─────────────────────────────────────

#[test]
fn partial_remote_keeps_all_local_keys() {
    let full = full_card(1_000);
    let partial = json!({ "title": "Commodore", "_lastModified": 90_000 });

    let merged = merge(&full, &partial);

    for key in ["name", "company", "email", "phone"] {
        assert_eq!(merged[key], full[key], "lost {key}");
    }
    assert_eq!(merged["title"], json!("Commodore"));
    assert_eq!(merged["_lastModified"], json!(90_000));
}

#[test]
fn older_partial_remote_still_merges() {
    let merged = merge(&full_card(50_000), &json!({ "phone": "555-0199", "_lastModified": 1 }));
    assert_eq!(merged["phone"], json!("555-0199"));
    assert_eq!(merged["name"], json!("Grace Hopper"));
    assert_eq!(merged["_lastModified"], json!(50_000));
}

// ── Timestamp rules ──────────────────────────────────────────────

#[test]
fn near_simultaneous_edits_merge_field_by_field() {
    let local = json!({ "a": 1, "b": 2, "c": 3, "_lastModified": 10_000 });
    let remote = json!({ "a": 1, "b": 20, "d": 4, "_lastModified": 10_500 });
    let merged = merge(&local, &remote);
    assert_eq!(
        merged,
        json!({ "a": 1, "b": 20, "c": 3, "d": 4, "_lastModified": 10_500 })
    );
}

#[test]
fn clearly_newer_remote_wins() {
    let local = json!({ "a": 1, "b": 2, "c": 3, "_lastModified": 1_000 });
    let remote = json!({ "a": 9, "b": 9, "x": 9, "_lastModified": 60_000 });
    assert_eq!(merge(&local, &remote), remote);
}

#[test]
fn clearly_newer_local_wins() {
    let local = json!({ "a": 1, "b": 2, "c": 3, "_lastModified": 60_000 });
    let remote = json!({ "a": 9, "b": 9, "c": 9, "_lastModified": 1_000 });
    assert_eq!(merge(&local, &remote), local);
}

#[test]
fn newer_but_thin_remote_merges_onto_older() {
    // 3 of 5 keys: not partial (>= 50%) but below the 70% staleness bar.
    let local = json!({ "a": 1, "b": 2, "c": 3, "d": 4, "e": 5, "_lastModified": 1_000 });
    let remote = json!({ "a": 10, "b": 20, "c": 30, "_lastModified": 60_000 });
    let merged = merge(&local, &remote);
    assert_eq!(
        merged,
        json!({ "a": 10, "b": 20, "c": 30, "d": 4, "e": 5, "_lastModified": 60_000 })
    );
}

#[test]
fn newer_but_thin_local_merges_onto_older_remote() {
    let local = json!({ "a": 10, "b": 20, "_lastModified": 60_000 });
    let remote = json!({ "a": 1, "b": 2, "c": 3, "_lastModified": 1_000 });
    let merged = merge(&local, &remote);
    assert_eq!(merged, json!({ "a": 10, "b": 20, "c": 3, "_lastModified": 60_000 }));
}

#[test]
fn custom_window_changes_outcome() {
    let cfg = MergeConfig {
        concurrent_window_ms: 100_000,
        ..MergeConfig::default()
    };
    let local = json!({ "a": 1, "b": 2, "_lastModified": 1_000 });
    let remote = json!({ "a": 5, "c": 3, "_lastModified": 60_000 });
    let merged = smart_merge(Some(&local), Some(&remote), &cfg);
    assert_eq!(merged, json!({ "a": 5, "b": 2, "c": 3, "_lastModified": 60_000 }));
}

// ── merge_objects ────────────────────────────────────────────────

#[test]
fn list_reconciliation_by_id() {
    let target = json!({ "links": [{ "id": 1, "x": 1 }, { "id": 2, "x": 2 }] });
    let source = json!({ "links": [{ "id": 2, "x": 9 }, { "id": 3, "x": 3 }] });
    let merged = merge_objects(&target, &source);
    assert_eq!(
        merged["links"],
        json!([{ "id": 1, "x": 1 }, { "id": 2, "x": 9 }, { "id": 3, "x": 3 }])
    );
}

#[test]
fn shorter_identified_list_still_updates_by_id() {
    let target = json!({ "l": [{ "id": "a", "v": 1 }, { "id": "b", "v": 2 }] });
    let source = json!({ "l": [{ "id": "b", "v": 3 }] });
    let merged = merge_objects(&target, &source);
    assert_eq!(merged["l"], json!([{ "id": "a", "v": 1 }, { "id": "b", "v": 3 }]));
}

#[test]
fn empty_source_list_keeps_target() {
    let target = json!({ "skills": ["rust", "go"] });
    let merged = merge_objects(&target, &json!({ "skills": [] }));
    assert_eq!(merged, target);
}

#[test]
fn nested_objects_merge_deeply() {
    let target = json!({ "contact": { "email": "a@x", "phone": "1" } });
    let source = json!({ "contact": { "phone": "2", "fax": "3" } });
    assert_eq!(
        merge_objects(&target, &source),
        json!({ "contact": { "email": "a@x", "phone": "2", "fax": "3" } })
    );
}

#[test]
fn null_source_field_fills_missing_target_key() {
    let merged = merge_objects(&json!({ "a": 1 }), &json!({ "b": null }));
    assert_eq!(merged, json!({ "a": 1, "b": null }));
}

#[test]
fn non_object_source_replaces_target() {
    assert_eq!(merge_objects(&json!({ "a": 1 }), &json!([1])), json!([1]));
    assert_eq!(merge_objects(&json!({ "a": 1 }), &Value::Null), json!({ "a": 1 }));
}
