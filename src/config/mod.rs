//! # Table Configuration
//!
//! The recognized per-table options and their validation. Invalid values
//! are rejected at table-store construction with a configuration error;
//! nothing is silently clamped.

#[cfg(test)]
mod tests;

use thiserror::Error;

use crate::compaction::StrategyKind;

/// Errors raised by configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field held a value outside its legal range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Per-table options.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Threads in the per-disk flush-writer pool.
    pub flush_writers: usize,

    /// Upper bound on time between flushes, in milliseconds. Zero
    /// disables periodic flushing.
    pub memtable_flush_period_ms: u64,

    /// Memtable size threshold (bytes) that triggers a flush.
    pub memtable_size_limit: usize,

    /// Minimum age before a tombstone may be purged, in seconds.
    pub gc_grace_seconds: u32,

    /// Rows kept per cached partition; zero disables the row cache for
    /// this table.
    pub rows_per_partition_to_cache: usize,

    /// Probability of verifying page checksums on read, in `[0, 1]`.
    pub crc_check_chance: f64,

    /// Strategy input: minimum files per compaction bucket. Zero is
    /// forbidden.
    pub min_compaction_threshold: usize,

    /// Strategy input: maximum files merged at once. Zero is forbidden.
    pub max_compaction_threshold: usize,

    /// Which compaction strategy family the table uses.
    pub compaction_strategy: StrategyKind,

    /// Tag updates so flushed files mark CDC segments as retained.
    pub cdc: bool,

    /// When false, writes skip the commit log entirely.
    pub durable_writes: bool,

    /// Percentile of coordinator latency samples driving the additional
    /// write policy threshold.
    pub additional_write_policy_percentile: f64,

    /// Percentile of coordinator latency samples driving speculative
    /// retry.
    pub speculative_retry_percentile: f64,

    /// Snapshot before truncating.
    pub auto_snapshot: bool,

    /// Hard-link flushed files into `backups/` as they appear.
    pub incremental_backups: bool,

    /// Snapshot hard-link rate limit; zero means unlimited.
    pub snapshot_links_per_second: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            flush_writers: 2,
            memtable_flush_period_ms: 0,
            memtable_size_limit: 64 * 1024 * 1024,
            gc_grace_seconds: 864_000,
            rows_per_partition_to_cache: 0,
            crc_check_chance: 1.0,
            min_compaction_threshold: 4,
            max_compaction_threshold: 32,
            compaction_strategy: StrategyKind::SizeTiered,
            cdc: false,
            durable_writes: true,
            additional_write_policy_percentile: 0.99,
            speculative_retry_percentile: 0.99,
            auto_snapshot: true,
            incremental_backups: false,
            snapshot_links_per_second: 0,
        }
    }
}

impl TableConfig {
    /// Check every field's range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_compaction_threshold == 0 {
            return Err(ConfigError::Invalid(
                "min_compaction_threshold must not be zero".into(),
            ));
        }
        if self.max_compaction_threshold == 0 {
            return Err(ConfigError::Invalid(
                "max_compaction_threshold must not be zero".into(),
            ));
        }
        if self.min_compaction_threshold > self.max_compaction_threshold {
            return Err(ConfigError::Invalid(format!(
                "min_compaction_threshold {} exceeds max_compaction_threshold {}",
                self.min_compaction_threshold, self.max_compaction_threshold
            )));
        }
        if self.flush_writers == 0 {
            return Err(ConfigError::Invalid("flush_writers must not be zero".into()));
        }
        if self.memtable_size_limit == 0 {
            return Err(ConfigError::Invalid(
                "memtable_size_limit must not be zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.crc_check_chance) {
            return Err(ConfigError::Invalid(format!(
                "crc_check_chance {} outside [0, 1]",
                self.crc_check_chance
            )));
        }
        for (name, value) in [
            (
                "additional_write_policy_percentile",
                self.additional_write_policy_percentile,
            ),
            (
                "speculative_retry_percentile",
                self.speculative_retry_percentile,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} {value} outside [0, 1]")));
            }
        }
        Ok(())
    }

    /// Compaction tunables derived from this configuration.
    pub fn compaction_config(&self) -> crate::compaction::CompactionConfig {
        crate::compaction::CompactionConfig {
            min_threshold: self.min_compaction_threshold,
            max_threshold: self.max_compaction_threshold,
            ..crate::compaction::CompactionConfig::default()
        }
    }
}
