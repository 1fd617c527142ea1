//! Size-tiered strategy: group similarly-sized files into buckets and
//! merge a bucket once it holds enough of them.
//!
//! Files smaller than `min_sstable_size` share one "small" bucket.
//! Remaining files join a bucket when their size falls within
//! `[avg × bucket_low, avg × bucket_high]` of the bucket's running
//! average. The fullest qualifying bucket compacts first, hottest-files
//! (by tombstone density) capped at `max_threshold`.

use std::sync::Arc;

use crate::lifecycle::OperationType;
use crate::sstable::SSTableReader;

use super::{CompactionConfig, CompactionStrategy, CompactionTask, StrategyGates};

/// Groups files into size buckets. Returns buckets as index lists into
/// `files`, smallest sizes first.
pub(crate) fn bucket_by_size(
    files: &[Arc<SSTableReader>],
    config: &CompactionConfig,
) -> Vec<Vec<usize>> {
    if files.is_empty() {
        return Vec::new();
    }

    let mut indices: Vec<usize> = (0..files.len()).collect();
    indices.sort_by_key(|&i| files[i].data_size());

    let mut small = Vec::new();
    let mut regular = Vec::new();
    for index in indices {
        if files[index].data_size() < config.min_sstable_size {
            small.push(index);
        } else {
            regular.push(index);
        }
    }

    let mut buckets = Vec::new();
    if !small.is_empty() {
        buckets.push(small);
    }

    let mut bucket: Vec<usize> = Vec::new();
    let mut average = 0.0f64;
    for index in regular {
        let size = files[index].data_size() as f64;
        if bucket.is_empty() {
            bucket.push(index);
            average = size;
            continue;
        }
        if size >= average * config.bucket_low && size <= average * config.bucket_high {
            bucket.push(index);
            let total: f64 = bucket.iter().map(|&i| files[i].data_size() as f64).sum();
            average = total / bucket.len() as f64;
        } else {
            buckets.push(std::mem::take(&mut bucket));
            bucket.push(index);
            average = size;
        }
    }
    if !bucket.is_empty() {
        buckets.push(bucket);
    }
    buckets
}

/// Size-tiered compaction strategy.
#[derive(Debug)]
pub struct SizeTieredStrategy {
    config: CompactionConfig,
    gates: StrategyGates,
}

impl SizeTieredStrategy {
    /// Strategy with the given tunables.
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            gates: StrategyGates::default(),
        }
    }
}

impl CompactionStrategy for SizeTieredStrategy {
    fn select_compaction(
        &mut self,
        live: &[Arc<SSTableReader>],
        _now_seconds: u32,
    ) -> Option<CompactionTask> {
        if !self.gates.selectable() {
            return None;
        }

        let buckets = bucket_by_size(live, &self.config);
        let best = buckets
            .into_iter()
            .filter(|bucket| bucket.len() >= self.config.min_threshold)
            .max_by_key(Vec::len)?;

        let mut inputs: Vec<Arc<SSTableReader>> = best
            .into_iter()
            .map(|index| Arc::clone(&live[index]))
            .collect();
        // Prefer the most tombstone-dense files when trimming to the cap.
        inputs.sort_by(|a, b| {
            let density = |r: &Arc<SSTableReader>| {
                let stats = r.stats();
                (stats.tombstone_count as f64) / (stats.row_count.max(1) as f64)
            };
            density(b)
                .partial_cmp(&density(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        inputs.truncate(self.config.max_threshold);

        Some(CompactionTask {
            inputs,
            op: OperationType::Compaction,
        })
    }

    fn created_sstable(&mut self, _reader: &Arc<SSTableReader>) {}

    fn replaced(&mut self, _old: &[Arc<SSTableReader>], _new: &[Arc<SSTableReader>]) {}

    fn disabled(&self) -> bool {
        self.gates.disabled
    }

    fn enable(&mut self) {
        self.gates.disabled = false;
    }

    fn disable(&mut self) {
        self.gates.disabled = true;
    }

    fn pause(&mut self) {
        self.gates.paused = true;
    }

    fn resume(&mut self) {
        self.gates.paused = false;
    }

    fn get_unleveled_sstables(&self) -> usize {
        0
    }
}
