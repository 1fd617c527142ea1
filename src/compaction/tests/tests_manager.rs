#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::commitlog::CommitLogPosition;
    use crate::compaction::manager::CompactionHost;
    use crate::compaction::{
        CompactionConfig, CompactionManager, StopTrigger, Strategy, StrategyKind,
    };
    use crate::data::{HashPartitioner, TableId, Token};
    use crate::memtable::{Memtable, PositionBound};
    use crate::sstable::tests::helpers::build_file;
    use crate::tracker::Tracker;

    const TABLE: TableId = TableId(3);

    struct TestHost {
        tracker: Arc<Tracker>,
        strategy: Arc<Mutex<Strategy>>,
        generation: Arc<AtomicU64>,
        dir: PathBuf,
    }

    impl TestHost {
        fn new(dir: PathBuf) -> Self {
            let memtable = Arc::new(Memtable::new(
                TABLE,
                Arc::new(HashPartitioner),
                1 << 20,
                Arc::new(PositionBound::new(CommitLogPosition::NONE)),
            ));
            Self {
                tracker: Arc::new(Tracker::new(memtable)),
                strategy: Arc::new(Mutex::new(Strategy::new(
                    StrategyKind::SizeTiered,
                    CompactionConfig {
                        min_threshold: 2,
                        min_sstable_size: 1,
                        ..CompactionConfig::default()
                    },
                ))),
                generation: Arc::new(AtomicU64::new(100)),
                dir,
            }
        }
    }

    impl CompactionHost for TestHost {
        fn table_id(&self) -> TableId {
            TABLE
        }

        fn tracker(&self) -> Arc<Tracker> {
            Arc::clone(&self.tracker)
        }

        fn strategy(&self) -> Arc<Mutex<Strategy>> {
            Arc::clone(&self.strategy)
        }

        fn generation_counter(&self) -> Arc<AtomicU64> {
            Arc::clone(&self.generation)
        }

        fn compaction_output_dir(&self) -> PathBuf {
            self.dir.clone()
        }

        fn shard_split_points(&self) -> Vec<Token> {
            Vec::new()
        }

        fn gc_grace_seconds(&self) -> u32 {
            864_000
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("condition never satisfied");
    }

    #[test]
    fn test_background_compaction_merges_files() {
        let tmp = TempDir::new().unwrap();
        let host = Arc::new(TestHost::new(tmp.path().to_path_buf()));
        for generation in 1..=3 {
            let (file, _) = build_file(tmp.path(), generation, 10);
            host.tracker.add_sstables(vec![file]).unwrap();
        }

        let manager = CompactionManager::new(2);
        assert!(manager
            .submit_background(Arc::clone(&host) as Arc<dyn CompactionHost>)
            .unwrap());

        wait_until(|| host.tracker.view().live.len() == 1);
        assert_eq!(host.tracker.view().live[0].stats().partition_count, 10);
    }

    #[test]
    fn test_paused_manager_declines_submissions() {
        let tmp = TempDir::new().unwrap();
        let host = Arc::new(TestHost::new(tmp.path().to_path_buf()));
        let manager = CompactionManager::new(1);

        let pauser = manager.pause_global();
        assert!(manager.is_paused());
        assert!(!manager
            .submit_background(Arc::clone(&host) as Arc<dyn CompactionHost>)
            .unwrap());

        drop(pauser);
        assert!(!manager.is_paused());
    }

    #[test]
    fn test_duplicate_submission_dropped_while_pending() {
        let tmp = TempDir::new().unwrap();
        let host = Arc::new(TestHost::new(tmp.path().to_path_buf()));
        let manager = CompactionManager::new(1);

        // An empty table: the round is a no-op but occupies the pending
        // slot until the worker runs it.
        let first = manager
            .submit_background(Arc::clone(&host) as Arc<dyn CompactionHost>)
            .unwrap();
        assert!(first);

        // Either the duplicate is dropped, or the first round already
        // finished; both are legal.
        let _ = manager.submit_background(Arc::clone(&host) as Arc<dyn CompactionHost>);
    }

    #[test]
    fn test_wait_for_cessation_returns_when_idle() {
        let manager = CompactionManager::new(1);
        // Nothing is running: must return immediately.
        manager.wait_for_cessation(&[TABLE], |_| true);
    }

    #[test]
    fn test_run_with_compactions_disabled_runs_body() {
        let manager = CompactionManager::new(1);
        let ran = manager.run_with_compactions_disabled(TABLE, StopTrigger::Truncate, || 42);
        assert_eq!(ran, 42);
        assert!(!manager.is_paused());
    }

    #[test]
    fn test_perform_maximal_on_empty_table_is_noop() {
        let tmp = TempDir::new().unwrap();
        let host = Arc::new(TestHost::new(tmp.path().to_path_buf()));
        let manager = CompactionManager::new(1);
        manager
            .perform_maximal(&(Arc::clone(&host) as Arc<dyn CompactionHost>), true)
            .unwrap();
    }

    #[test]
    fn test_force_user_defined_takes_exact_set() {
        let tmp = TempDir::new().unwrap();
        let host = Arc::new(TestHost::new(tmp.path().to_path_buf()));
        let mut files = Vec::new();
        for generation in 1..=3 {
            let (file, _) = build_file(tmp.path(), generation, 10);
            host.tracker.add_sstables(vec![Arc::clone(&file)]).unwrap();
            files.push(file);
        }

        let manager = CompactionManager::new(1);
        // Only the first two files.
        manager
            .force_user_defined(
                &(Arc::clone(&host) as Arc<dyn CompactionHost>),
                files[..2].to_vec(),
            )
            .unwrap();

        let view = host.tracker.view();
        assert_eq!(view.live.len(), 2);
        let generations: Vec<u64> = view.live.iter().map(|r| r.generation()).collect();
        assert!(generations.contains(&3));
    }
}
