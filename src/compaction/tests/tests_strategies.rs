#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::compaction::size_tiered::bucket_by_size;
    use crate::compaction::{
        CompactionConfig, CompactionStrategy, Strategy, StrategyKind,
    };
    use crate::sstable::SSTableReader;
    use crate::sstable::tests::helpers::build_file;

    fn small_config() -> CompactionConfig {
        CompactionConfig {
            min_threshold: 2,
            max_threshold: 8,
            min_sstable_size: 1,
            ..CompactionConfig::default()
        }
    }

    fn files(tmp: &TempDir, count: usize, partitions: usize) -> Vec<Arc<SSTableReader>> {
        (0..count)
            .map(|i| build_file(tmp.path(), i as u64 + 1, partitions).0)
            .collect()
    }

    #[test]
    fn test_bucketing_groups_similar_sizes() {
        let tmp = TempDir::new().unwrap();
        let set = files(&tmp, 3, 10);

        let buckets = bucket_by_size(&set, &small_config());
        // Same partition count produces near-identical sizes: one bucket.
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].len(), 3);
    }

    #[test]
    fn test_size_tiered_respects_min_threshold() {
        let tmp = TempDir::new().unwrap();
        let set = files(&tmp, 1, 10);
        let mut strategy = Strategy::new(StrategyKind::SizeTiered, small_config());
        assert!(strategy.select_compaction(&set, 1000).is_none());

        let tmp2 = TempDir::new().unwrap();
        let set = files(&tmp2, 3, 10);
        let task = strategy.select_compaction(&set, 1000).unwrap();
        assert_eq!(task.inputs.len(), 3);
    }

    #[test]
    fn test_disabled_strategy_selects_nothing() {
        let tmp = TempDir::new().unwrap();
        let set = files(&tmp, 4, 10);
        let mut strategy = Strategy::new(StrategyKind::SizeTiered, small_config());

        strategy.disable();
        assert!(strategy.disabled());
        assert!(strategy.select_compaction(&set, 1000).is_none());

        strategy.enable();
        assert!(strategy.select_compaction(&set, 1000).is_some());
    }

    #[test]
    fn test_paused_strategy_selects_nothing_until_resume() {
        let tmp = TempDir::new().unwrap();
        let set = files(&tmp, 4, 10);
        let mut strategy = Strategy::new(StrategyKind::SizeTiered, small_config());

        strategy.pause();
        assert!(strategy.select_compaction(&set, 1000).is_none());
        strategy.resume();
        assert!(strategy.select_compaction(&set, 1000).is_some());
    }

    #[test]
    fn test_leveled_tracks_levels_through_replacement() {
        let tmp = TempDir::new().unwrap();
        let set = files(&tmp, 3, 10);
        let mut strategy = Strategy::new(StrategyKind::Leveled, small_config());

        for reader in &set {
            strategy.created_sstable(reader);
        }
        assert_eq!(strategy.get_unleveled_sstables(), 3);

        // L0 is over threshold: it compacts.
        let task = strategy.select_compaction(&set, 1000).unwrap();
        assert!(task.inputs.len() >= 2);

        // After replacement the outputs sit above L0.
        let (merged, _) = build_file(tmp.path(), 99, 10);
        strategy.replaced(&set, &[Arc::clone(&merged)]);
        assert_eq!(strategy.get_unleveled_sstables(), 0);
    }

    #[test]
    fn test_time_window_compacts_settled_windows() {
        let tmp = TempDir::new().unwrap();
        // Helper files carry tiny timestamps: they all fall into window 0,
        // which is far behind the current window.
        let set = files(&tmp, 3, 10);
        let mut strategy = Strategy::new(
            StrategyKind::TimeWindow,
            CompactionConfig {
                window_seconds: 60,
                ..small_config()
            },
        );

        let task = strategy
            .select_compaction(&set, 1_000_000)
            .expect("settled window must compact");
        assert_eq!(task.inputs.len(), 3);
    }

    #[test]
    fn test_unified_merges_overfull_tier() {
        let tmp = TempDir::new().unwrap();
        let set = files(&tmp, 4, 10);
        let mut strategy = Strategy::new(StrategyKind::Unified, small_config());

        let task = strategy.select_compaction(&set, 1000).unwrap();
        assert!(task.inputs.len() >= 2);
        assert!(task.inputs.len() <= 8);
    }

    #[test]
    fn test_no_strategy_supports_early_open() {
        for kind in [
            StrategyKind::SizeTiered,
            StrategyKind::Leveled,
            StrategyKind::TimeWindow,
            StrategyKind::Unified,
        ] {
            let strategy = Strategy::new(kind, small_config());
            assert!(!strategy.supports_early_open());
        }
    }
}
