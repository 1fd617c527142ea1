//! Per-table counters and the write-interval histogram.
//!
//! Plain atomics, readable at any time; no external metrics plumbing.

use std::sync::atomic::{AtomicU64, Ordering};

/// Exponential-bucket histogram of intervals between overwrites of the
/// same cell, in microseconds.
///
/// Values beyond the largest bucket clamp into it rather than being
/// dropped.
#[derive(Debug)]
pub struct WriteIntervalHistogram {
    /// Bucket `i` counts deltas in `[2^i, 2^(i+1))` microseconds.
    buckets: [AtomicU64; 40],
}

impl Default for WriteIntervalHistogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl WriteIntervalHistogram {
    /// Record one overwrite interval. `u64::MAX` (no prior cell) is not
    /// recorded.
    pub fn record(&self, delta_micros: u64) {
        if delta_micros == u64::MAX {
            return;
        }
        let bucket = (64 - delta_micros.max(1).leading_zeros() as usize - 1)
            .min(self.buckets.len() - 1);
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    /// Total recorded samples.
    pub fn count(&self) -> u64 {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .sum()
    }

    /// Samples in the largest (clamp) bucket.
    pub fn clamped(&self) -> u64 {
        self.buckets[self.buckets.len() - 1].load(Ordering::Relaxed)
    }
}

/// Counters one table store maintains.
#[derive(Debug, Default)]
pub struct TableMetrics {
    /// Applied mutations.
    pub writes: AtomicU64,

    /// Executed read commands.
    pub reads: AtomicU64,

    /// Completed flushes.
    pub flushes: AtomicU64,

    /// Completed compactions.
    pub compactions: AtomicU64,

    /// Bytes written by flushes.
    pub bytes_flushed: AtomicU64,

    /// Live sorted files after the last list change.
    pub live_sstables: AtomicU64,

    /// Interval between overwrites of the same cell.
    pub write_interval: WriteIntervalHistogram,
}

impl TableMetrics {
    /// Count one write and its overwrite interval.
    pub fn on_write(&self, timestamp_delta_micros: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.write_interval.record(timestamp_delta_micros);
    }

    /// Count one read.
    pub fn on_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }
}
