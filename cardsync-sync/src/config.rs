//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default debounce before a pending batch is flushed (ms).
pub const DEFAULT_BATCH_DELAY_MS: u64 = 300;

/// Default number of distinct pending paths that forces an immediate flush.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Configuration for the sync coordinator and optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Debounce delay for outgoing writes (ms).
    pub batch_delay_ms: u64,
    /// Distinct pending paths that trigger an immediate flush.
    pub max_batch_size: usize,
    /// Extra attempts for a batch entry whose write failed.
    pub max_flush_retries: u32,
    /// Whether the coordinator assumes connectivity before the first signal.
    pub start_online: bool,
    /// Smart-merge thresholds.
    pub merge: MergeConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_flush_retries: 3,
            start_online: true,
            merge: MergeConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parses a JSON configuration, filling omitted fields with defaults.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// The batch debounce as a `Duration`.
    #[must_use]
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Checks that every threshold is usable.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_batch_size == 0 {
            return Err(SyncError::Config("maxBatchSize must be at least 1".into()));
        }
        self.merge.validate()
    }
}

/// Thresholds used by the smart-merge heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MergeConfig {
    /// Remote snapshots with fewer than this share of the local key count
    /// are treated as partial pushes.
    pub partial_ratio: f64,
    /// A newer side with fewer than this share of the older side's key count
    /// is merged onto the older side instead of replacing it.
    pub stale_partial_ratio: f64,
    /// Edits closer together than this (ms) are merged field by field.
    pub concurrent_window_ms: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            partial_ratio: 0.5,
            stale_partial_ratio: 0.7,
            concurrent_window_ms: 1000,
        }
    }
}

impl MergeConfig {
    /// Checks that both ratios lie in `(0, 1]`.
    pub fn validate(&self) -> SyncResult<()> {
        for (name, ratio) in [
            ("partialRatio", self.partial_ratio),
            ("stalePartialRatio", self.stale_partial_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(SyncError::Config(format!("{name} must be in (0, 1], got {ratio}")));
            }
        }
        Ok(())
    }
}
