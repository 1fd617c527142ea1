//! Leveled strategy: organize files into levels of geometrically growing
//! capacity, keeping runs non-overlapping above level 0.
//!
//! Flushed files land in level 0. When level 0 collects `min_threshold`
//! files they merge with the overlapping slice of level 1; when a higher
//! level exceeds its capacity (`target_sstable_size × fanout^level`), its
//! oldest file merges with the overlapping slice of the next level.

use std::collections::HashMap;
use std::sync::Arc;

use crate::lifecycle::OperationType;
use crate::sstable::SSTableReader;

use super::{CompactionConfig, CompactionStrategy, CompactionTask, StrategyGates};

const MAX_LEVEL: u32 = 7;

/// Leveled compaction strategy.
#[derive(Debug)]
pub struct LeveledStrategy {
    config: CompactionConfig,
    gates: StrategyGates,

    /// Level of each known generation; unknown generations are level 0.
    levels: HashMap<u64, u32>,
}

impl LeveledStrategy {
    /// Strategy with the given tunables.
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            gates: StrategyGates::default(),
            levels: HashMap::new(),
        }
    }

    fn level_of(&self, reader: &SSTableReader) -> u32 {
        self.levels.get(&reader.generation()).copied().unwrap_or(0)
    }

    fn level_capacity(&self, level: u32) -> u64 {
        self.config
            .target_sstable_size
            .saturating_mul(self.config.fanout.saturating_pow(level))
    }

    fn overlapping<'a>(
        &self,
        candidates: &[&'a Arc<SSTableReader>],
        first: crate::data::Token,
        last: crate::data::Token,
    ) -> Vec<&'a Arc<SSTableReader>> {
        candidates
            .iter()
            .filter(|reader| {
                let stats = reader.stats();
                stats.first_key.token <= last && stats.last_key.token >= first
            })
            .copied()
            .collect()
    }
}

impl CompactionStrategy for LeveledStrategy {
    fn select_compaction(
        &mut self,
        live: &[Arc<SSTableReader>],
        _now_seconds: u32,
    ) -> Option<CompactionTask> {
        if !self.gates.selectable() {
            return None;
        }

        let mut by_level: HashMap<u32, Vec<&Arc<SSTableReader>>> = HashMap::new();
        for reader in live {
            by_level.entry(self.level_of(reader)).or_default().push(reader);
        }

        // Level 0 first: overlapping runs there make reads pay per file.
        if let Some(level0) = by_level.get(&0)
            && level0.len() >= self.config.min_threshold
        {
            let first = level0
                .iter()
                .map(|r| r.stats().first_key.token)
                .min()?;
            let last = level0.iter().map(|r| r.stats().last_key.token).max()?;
            let next = by_level.get(&1).cloned().unwrap_or_default();

            let mut inputs: Vec<Arc<SSTableReader>> =
                level0.iter().map(|r| Arc::clone(r)).collect();
            inputs.extend(
                self.overlapping(&next, first, last)
                    .into_iter()
                    .map(Arc::clone),
            );
            inputs.truncate(self.config.max_threshold.max(2));
            return Some(CompactionTask {
                inputs,
                op: OperationType::Compaction,
            });
        }

        // Higher levels: spill the oldest file of any over-capacity level
        // into the next one.
        for level in 1..MAX_LEVEL {
            let Some(files) = by_level.get(&level) else {
                continue;
            };
            let total: u64 = files.iter().map(|r| r.data_size()).sum();
            if total <= self.level_capacity(level) {
                continue;
            }
            let victim = files.iter().min_by_key(|r| r.generation())?;
            let stats = victim.stats();
            let next = by_level.get(&(level + 1)).cloned().unwrap_or_default();

            let mut inputs = vec![Arc::clone(victim)];
            inputs.extend(
                self.overlapping(&next, stats.first_key.token, stats.last_key.token)
                    .into_iter()
                    .map(Arc::clone),
            );
            inputs.truncate(self.config.max_threshold.max(2));
            return Some(CompactionTask {
                inputs,
                op: OperationType::Compaction,
            });
        }
        None
    }

    fn created_sstable(&mut self, reader: &Arc<SSTableReader>) {
        self.levels.insert(reader.generation(), 0);
    }

    fn replaced(&mut self, old: &[Arc<SSTableReader>], new: &[Arc<SSTableReader>]) {
        let target = old
            .iter()
            .map(|r| self.level_of(r))
            .max()
            .map(|level| (level + 1).min(MAX_LEVEL))
            .unwrap_or(0);
        for reader in old {
            self.levels.remove(&reader.generation());
        }
        for reader in new {
            self.levels.insert(reader.generation(), target);
        }
    }

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
        self.levels.values().filter(|level| **level == 0).count()
    }
}
