//! Time-window strategy: bucket files by the window their newest data
//! falls in; merge within windows, never across them.
//!
//! Suits append-mostly, expiring data: old windows settle into one file
//! each and whole files age out together. The newest window behaves
//! size-tiered until it closes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::lifecycle::OperationType;
use crate::sstable::SSTableReader;

use super::size_tiered::bucket_by_size;
use super::{CompactionConfig, CompactionStrategy, CompactionTask, StrategyGates};

/// Time-window compaction strategy.
#[derive(Debug)]
pub struct TimeWindowStrategy {
    config: CompactionConfig,
    gates: StrategyGates,
}

impl TimeWindowStrategy {
    /// Strategy with the given tunables.
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            gates: StrategyGates::default(),
        }
    }

    fn window_of(&self, reader: &SSTableReader) -> u64 {
        let window_micros = self.config.window_seconds.max(1) as i64 * 1_000_000;
        let ts = reader.stats().max_timestamp.max(0);
        (ts / window_micros) as u64
    }
}

impl CompactionStrategy for TimeWindowStrategy {
    fn select_compaction(
        &mut self,
        live: &[Arc<SSTableReader>],
        now_seconds: u32,
    ) -> Option<CompactionTask> {
        if !self.gates.selectable() {
            return None;
        }

        let mut windows: BTreeMap<u64, Vec<Arc<SSTableReader>>> = BTreeMap::new();
        for reader in live {
            windows
                .entry(self.window_of(reader))
                .or_default()
                .push(Arc::clone(reader));
        }

        let newest = windows.keys().next_back().copied()?;
        let current_window =
            (now_seconds as u64 * 1_000_000) / (self.config.window_seconds.max(1) * 1_000_000);

        // Settled windows first, oldest first: anything older than the
        // newest window collapses to one file per window.
        for (window, files) in &windows {
            if *window == newest && *window >= current_window {
                continue;
            }
            if files.len() >= 2 {
                let mut inputs = files.clone();
                inputs.truncate(self.config.max_threshold);
                return Some(CompactionTask {
                    inputs,
                    op: OperationType::Compaction,
                });
            }
        }

        // The open window behaves size-tiered.
        let current = windows.remove(&newest)?;
        let buckets = bucket_by_size(&current, &self.config);
        let best = buckets
            .into_iter()
            .filter(|bucket| bucket.len() >= self.config.min_threshold)
            .max_by_key(Vec::len)?;
        let mut inputs: Vec<Arc<SSTableReader>> = best
            .into_iter()
            .map(|index| Arc::clone(&current[index]))
            .collect();
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
