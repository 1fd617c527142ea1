#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::commitlog::CommitLogPosition;
    use crate::data::{HashPartitioner, TableId};
    use crate::memtable::{Memtable, PositionBound};
    use crate::sstable::tests::helpers::build_file;
    use crate::tracker::{Tracker, TrackerError, TrackerEvent};

    fn memtable() -> Arc<Memtable> {
        Arc::new(Memtable::new(
            TableId(1),
            Arc::new(HashPartitioner),
            1 << 20,
            Arc::new(PositionBound::new(CommitLogPosition::NONE)),
        ))
    }

    #[test]
    fn test_switch_moves_old_to_flushing() {
        let tracker = Tracker::new(memtable());
        let replacement = memtable();
        let old = tracker.switch_memtable(false, Arc::clone(&replacement)).unwrap();

        let view = tracker.view();
        assert!(Arc::ptr_eq(&view.current, &replacement));
        assert_eq!(view.flushing.len(), 1);
        assert!(Arc::ptr_eq(&view.flushing[0], &old));
    }

    #[test]
    fn test_truncate_switch_drops_old() {
        let tracker = Tracker::new(memtable());
        tracker.switch_memtable(true, memtable()).unwrap();
        assert!(tracker.view().flushing.is_empty());
    }

    #[test]
    fn test_replace_flushed_swaps_memtable_for_files() {
        let tmp = TempDir::new().unwrap();
        let tracker = Tracker::new(memtable());
        let old = tracker.switch_memtable(false, memtable()).unwrap();

        let (file, _) = build_file(tmp.path(), 1, 4);
        tracker.replace_flushed(&old, vec![file]).unwrap();

        let view = tracker.view();
        assert!(view.flushing.is_empty());
        assert_eq!(view.live.len(), 1);
    }

    #[test]
    fn test_replace_flushed_unknown_memtable_fails() {
        let tracker = Tracker::new(memtable());
        let stranger = memtable();
        let err = tracker.replace_flushed(&stranger, Vec::new()).unwrap_err();
        assert!(matches!(err, TrackerError::NotInView(_)));
    }

    #[test]
    fn test_compacting_claims_are_exclusive() {
        let tmp = TempDir::new().unwrap();
        let tracker = Tracker::new(memtable());
        let (a, _) = build_file(tmp.path(), 1, 4);
        let (b, _) = build_file(tmp.path(), 2, 4);
        tracker
            .add_sstables(vec![Arc::clone(&a), Arc::clone(&b)])
            .unwrap();

        assert!(tracker.try_mark_compacting(&[Arc::clone(&a)]).unwrap());
        // Overlapping claim fails wholesale.
        assert!(
            !tracker
                .try_mark_compacting(&[Arc::clone(&a), Arc::clone(&b)])
                .unwrap()
        );
        // Disjoint claim succeeds.
        assert!(tracker.try_mark_compacting(&[Arc::clone(&b)]).unwrap());

        tracker.unmark_compacting(&[Arc::clone(&a)]).unwrap();
        assert!(tracker.try_mark_compacting(&[a]).unwrap());
    }

    #[test]
    fn test_replace_compacted_swaps_inputs_for_outputs() {
        let tmp = TempDir::new().unwrap();
        let tracker = Tracker::new(memtable());
        let (a, _) = build_file(tmp.path(), 1, 4);
        let (b, _) = build_file(tmp.path(), 2, 4);
        let (merged, _) = build_file(tmp.path(), 3, 8);
        tracker
            .add_sstables(vec![Arc::clone(&a), Arc::clone(&b)])
            .unwrap();
        tracker
            .try_mark_compacting(&[Arc::clone(&a), Arc::clone(&b)])
            .unwrap();

        tracker
            .replace_compacted(&[a, b], vec![Arc::clone(&merged)])
            .unwrap();

        let view = tracker.view();
        assert_eq!(view.live.len(), 1);
        assert_eq!(view.live[0].generation(), 3);
        assert!(view.compacting.is_empty());
    }

    #[test]
    fn test_drop_sstables_by_predicate() {
        let tmp = TempDir::new().unwrap();
        let tracker = Tracker::new(memtable());
        let (a, _) = build_file(tmp.path(), 1, 4);
        let (b, _) = build_file(tmp.path(), 2, 4);
        tracker.add_sstables(vec![a, b]).unwrap();

        let dropped = tracker
            .drop_sstables(|reader| reader.generation() == 1)
            .unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(tracker.view().live.len(), 1);
        assert_eq!(tracker.view().live[0].generation(), 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let tmp = TempDir::new().unwrap();
        let tracker = Tracker::new(memtable());
        let (file, _) = build_file(tmp.path(), 1, 4);
        tracker.add_sstables(vec![file]).unwrap();
        tracker.switch_memtable(false, memtable()).unwrap();

        tracker.reset(memtable()).unwrap();
        let view = tracker.view();
        assert!(view.flushing.is_empty());
        assert!(view.live.is_empty());
    }

    #[test]
    fn test_subscribers_observe_transitions() {
        let tmp = TempDir::new().unwrap();
        let tracker = Tracker::new(memtable());

        let switches = Arc::new(AtomicUsize::new(0));
        let additions = Arc::new(AtomicUsize::new(0));
        let truncations = Arc::new(AtomicUsize::new(0));
        {
            let switches = Arc::clone(&switches);
            let additions = Arc::clone(&additions);
            let truncations = Arc::clone(&truncations);
            tracker.subscribe(move |event| match event {
                TrackerEvent::MemtableSwitched => {
                    switches.fetch_add(1, Ordering::SeqCst);
                }
                TrackerEvent::SSTablesAdded(_) => {
                    additions.fetch_add(1, Ordering::SeqCst);
                }
                TrackerEvent::Truncated(_) => {
                    truncations.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            });
        }

        tracker.switch_memtable(false, memtable()).unwrap();
        let (file, _) = build_file(tmp.path(), 1, 4);
        tracker.add_sstables(vec![file]).unwrap();
        tracker.notify_truncated(1234);

        assert_eq!(switches.load(Ordering::SeqCst), 1);
        assert_eq!(additions.load(Ordering::SeqCst), 1);
        assert_eq!(truncations.load(Ordering::SeqCst), 1);
    }
}
