use cardsync_sync::{MergeConfig, SyncConfig, SyncError};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[test]
fn defaults() {
    let config = SyncConfig::default();
    assert_eq!(config.batch_delay_ms, 300);
    assert_eq!(config.batch_delay(), Duration::from_millis(300));
    assert_eq!(config.max_batch_size, 10);
    assert_eq!(config.max_flush_retries, 3);
    assert!(config.start_online);
    assert_eq!(config.merge, MergeConfig::default());
    assert!(config.validate().is_ok());
}

#[test]
fn partial_json_fills_defaults() {
    let config = SyncConfig::from_json(r#"{ "batchDelayMs": 50, "merge": { "concurrentWindowMs": 250 } }"#)
        .unwrap();
    assert_eq!(config.batch_delay_ms, 50);
    assert_eq!(config.max_batch_size, 10);
    assert_eq!(config.merge.concurrent_window_ms, 250);
    assert_eq!(config.merge.partial_ratio, 0.5);
}

#[test]
fn empty_json_is_default() {
    assert_eq!(SyncConfig::from_json("{}").unwrap(), SyncConfig::default());
}

#[test]
fn zero_batch_size_is_rejected() {
    let result = SyncConfig::from_json(r#"{ "maxBatchSize": 0 }"#);
    assert!(matches!(result, Err(SyncError::Config(_))));
}

#[test]
fn ratios_must_be_in_unit_interval() {
    for ratio in [0.0, -0.5, 1.5, f64::NAN] {
        let merge = MergeConfig {
            partial_ratio: ratio,
            ..MergeConfig::default()
        };
        assert!(merge.validate().is_err(), "accepted {ratio}");
    }
    let merge = MergeConfig {
        stale_partial_ratio: 1.0,
        ..MergeConfig::default()
    };
    assert!(merge.validate().is_ok());
}

#[test]
fn malformed_json_is_a_serialization_error() {
    let result = SyncConfig::from_json("{ not json");
    assert!(matches!(result, Err(SyncError::Serialization(_))));
}

#[test]
fn serializes_camel_case() {
    let json = serde_json::to_value(SyncConfig::default()).unwrap();
    assert_eq!(json["batchDelayMs"], 300);
    assert_eq!(json["merge"]["stalePartialRatio"], 0.7);
}
