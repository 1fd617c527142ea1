//! Unified strategy: one policy spanning the tiered/leveled trade-off.
//!
//! Files are assigned a *shard exponent*: the logarithm (base `fanout`) of
//! their size relative to `target_sstable_size`. Files sharing an exponent
//! form a tier; a tier holding `min_threshold` files merges, producing a
//! file that naturally graduates to a higher exponent. Low exponents
//! behave like size-tiered buckets; high exponents converge to one file
//! per tier, which is the leveled shape.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::lifecycle::OperationType;
use crate::sstable::SSTableReader;

use super::{CompactionConfig, CompactionStrategy, CompactionTask, StrategyGates};

/// Unified compaction strategy.
#[derive(Debug)]
pub struct UnifiedStrategy {
    config: CompactionConfig,
    gates: StrategyGates,
}

impl UnifiedStrategy {
    /// Strategy with the given tunables.
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            gates: StrategyGates::default(),
        }
    }

    fn exponent_of(&self, reader: &SSTableReader) -> u32 {
        let fanout = self.config.fanout.max(2);
        let base = self.config.target_sstable_size.max(1);
        let mut size = reader.data_size() / base;
        let mut exponent = 0u32;
        while size > 0 {
            size /= fanout;
            exponent += 1;
        }
        exponent
    }
}

impl CompactionStrategy for UnifiedStrategy {
    fn select_compaction(
        &mut self,
        live: &[Arc<SSTableReader>],
        _now_seconds: u32,
    ) -> Option<CompactionTask> {
        if !self.gates.selectable() {
            return None;
        }

        let mut tiers: BTreeMap<u32, Vec<Arc<SSTableReader>>> = BTreeMap::new();
        for reader in live {
            tiers
                .entry(self.exponent_of(reader))
                .or_default()
                .push(Arc::clone(reader));
        }

        // Lowest overfull tier first: small merges unblock the most
        // write amplification.
        for (_, files) in tiers {
            if files.len() < self.config.min_threshold {
                continue;
            }
            let mut inputs = files;
            inputs.sort_by_key(|reader| reader.generation());
            inputs.truncate(self.config.max_threshold);
            return Some(CompactionTask {
                inputs,
                op: OperationType::Compaction,
            });
        }
        None
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
