#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;

    use tempfile::TempDir;

    use crate::commitlog::CommitLogPosition;
    use crate::compaction::{
        CompactionError, CompactionInterrupt, CompactionJob, StopTrigger, compact_files,
    };
    use crate::data::cells::Cell;
    use crate::data::clustering::Clustering;
    use crate::data::filter::DataRange;
    use crate::data::{HashPartitioner, PartitionUpdate, Row, TableId};
    use crate::lifecycle::OperationType;
    use crate::memtable::{Memtable, PositionBound};
    use crate::sstable::tests::helpers::key;
    use crate::sstable::{Component, Descriptor, SSTableFormat, SSTableReader, SSTableWriter};
    use crate::tracker::Tracker;

    const TABLE: TableId = TableId(3);

    fn memtable() -> Arc<Memtable> {
        Arc::new(Memtable::new(
            TABLE,
            Arc::new(HashPartitioner),
            1 << 20,
            Arc::new(PositionBound::new(CommitLogPosition::NONE)),
        ))
    }

    fn build_overlapping_pair(
        tmp: &TempDir,
    ) -> (Arc<SSTableReader>, Arc<SSTableReader>) {
        // File 1: keys 0..20, ts 10.
        let mut updates: Vec<PartitionUpdate> = (0..20)
            .map(|i| {
                PartitionUpdate::new(TABLE, key(format!("p-{i:04}").as_bytes())).with_row(
                    Row::new(Clustering::row(vec![b"c".to_vec()]))
                        .with_cell(1, Cell::live(10, b"old".to_vec())),
                )
            })
            .collect();
        updates.sort_by(|a, b| a.key.cmp(&b.key));
        let mut writer =
            SSTableWriter::create(Descriptor::new(tmp.path(), 1, SSTableFormat::Big)).unwrap();
        for u in &updates {
            writer.append(u).unwrap();
        }
        let (d1, _) = writer.finish().unwrap();

        // File 2: keys 10..30, ts 20 (newer overlap for 10..20).
        let mut updates: Vec<PartitionUpdate> = (10..30)
            .map(|i| {
                PartitionUpdate::new(TABLE, key(format!("p-{i:04}").as_bytes())).with_row(
                    Row::new(Clustering::row(vec![b"c".to_vec()]))
                        .with_cell(1, Cell::live(20, b"new".to_vec())),
                )
            })
            .collect();
        updates.sort_by(|a, b| a.key.cmp(&b.key));
        let mut writer =
            SSTableWriter::create(Descriptor::new(tmp.path(), 2, SSTableFormat::Big)).unwrap();
        for u in &updates {
            writer.append(u).unwrap();
        }
        let (d2, _) = writer.finish().unwrap();

        (
            SSTableReader::open(d1).unwrap(),
            SSTableReader::open(d2).unwrap(),
        )
    }

    #[test]
    fn test_merge_dedups_and_replaces_inputs() {
        let tmp = TempDir::new().unwrap();
        let (a, b) = build_overlapping_pair(&tmp);
        let a_descriptor = a.descriptor().clone();

        let tracker = Tracker::new(memtable());
        tracker
            .add_sstables(vec![Arc::clone(&a), Arc::clone(&b)])
            .unwrap();
        let inputs = vec![Arc::clone(&a), Arc::clone(&b)];
        assert!(tracker.try_mark_compacting(&inputs).unwrap());

        let tracker = Arc::new(tracker);
        let generation = AtomicU64::new(10);
        let outputs = compact_files(CompactionJob {
            tracker: &tracker,
            inputs,
            op: OperationType::Compaction,
            generation: &generation,
            output_dir: tmp.path().to_path_buf(),
            split_points: Vec::new(),
            gc_grace_seconds: 864_000,
            now_seconds: 1_000,
            interrupt: Arc::new(CompactionInterrupt::new()),
        })
        .unwrap();

        // One merged output holding the 30 distinct keys.
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].stats().partition_count, 30);

        // The tracker view swapped inputs for outputs.
        let view = tracker.view();
        assert_eq!(view.live.len(), 1);
        assert_eq!(view.live[0].generation(), outputs[0].generation());
        assert!(view.compacting.is_empty());

        // Old bytes are gone.
        assert!(!a_descriptor.path(Component::Data).exists());

        // Overlapping keys resolved to the newer value.
        let merged = outputs[0].get(&key(b"p-0015")).unwrap().unwrap();
        let rows = merged.live_rows(2_000);
        assert_eq!(rows[0].cells[&1].value.as_deref(), Some(b"new".as_ref()));
    }

    #[test]
    fn test_interrupt_aborts_and_keeps_inputs() {
        let tmp = TempDir::new().unwrap();
        let (a, b) = build_overlapping_pair(&tmp);
        let a_descriptor = a.descriptor().clone();

        let tracker = Arc::new(Tracker::new(memtable()));
        tracker
            .add_sstables(vec![Arc::clone(&a), Arc::clone(&b)])
            .unwrap();
        let inputs = vec![Arc::clone(&a), Arc::clone(&b)];
        assert!(tracker.try_mark_compacting(&inputs).unwrap());

        let interrupt = Arc::new(CompactionInterrupt::new());
        interrupt.stop(StopTrigger::Truncate);

        let generation = AtomicU64::new(10);
        let err = compact_files(CompactionJob {
            tracker: &tracker,
            inputs,
            op: OperationType::Compaction,
            generation: &generation,
            output_dir: tmp.path().to_path_buf(),
            split_points: Vec::new(),
            gc_grace_seconds: 864_000,
            now_seconds: 1_000,
            interrupt,
        })
        .unwrap_err();

        assert!(matches!(
            err,
            CompactionError::Interrupted(StopTrigger::Truncate)
        ));

        // Inputs stay live and claimable again.
        let view = tracker.view();
        assert_eq!(view.live.len(), 2);
        assert!(view.compacting.is_empty());
        assert!(a_descriptor.is_complete());
    }

    #[test]
    fn test_fully_purged_inputs_leave_no_output() {
        let tmp = TempDir::new().unwrap();

        // A file holding nothing but an expired tombstone.
        let mut writer =
            SSTableWriter::create(Descriptor::new(tmp.path(), 1, SSTableFormat::Big)).unwrap();
        let mut doomed = PartitionUpdate::new(TABLE, key(b"k"));
        doomed.insert_row(
            Row::new(Clustering::row(vec![b"c".to_vec()])).with_cell(1, Cell::tombstone(10, 100)),
        );
        writer.append(&doomed).unwrap();
        let (descriptor, _) = writer.finish().unwrap();
        let reader = SSTableReader::open(descriptor.clone()).unwrap();

        let tracker = Arc::new(Tracker::new(memtable()));
        tracker.add_sstables(vec![Arc::clone(&reader)]).unwrap();
        let inputs = vec![Arc::clone(&reader)];
        assert!(tracker.try_mark_compacting(&inputs).unwrap());

        let generation = AtomicU64::new(10);
        let outputs = compact_files(CompactionJob {
            tracker: &tracker,
            inputs,
            op: OperationType::Compaction,
            generation: &generation,
            output_dir: tmp.path().to_path_buf(),
            split_points: Vec::new(),
            gc_grace_seconds: 100,
            now_seconds: 10_000,
            interrupt: Arc::new(CompactionInterrupt::new()),
        })
        .unwrap();

        assert!(outputs.is_empty());
        assert!(tracker.view().live.is_empty());
        assert!(!descriptor.path(Component::Data).exists());
    }

    #[test]
    fn test_split_points_produce_sharded_outputs() {
        let tmp = TempDir::new().unwrap();
        let (a, b) = build_overlapping_pair(&tmp);

        let tracker = Arc::new(Tracker::new(memtable()));
        tracker
            .add_sstables(vec![Arc::clone(&a), Arc::clone(&b)])
            .unwrap();
        let inputs = vec![a, b];
        assert!(tracker.try_mark_compacting(&inputs).unwrap());

        let generation = AtomicU64::new(10);
        let outputs = compact_files(CompactionJob {
            tracker: &tracker,
            inputs,
            op: OperationType::Compaction,
            generation: &generation,
            output_dir: tmp.path().to_path_buf(),
            split_points: vec![crate::data::Token(0)],
            gc_grace_seconds: 864_000,
            now_seconds: 1_000,
            interrupt: Arc::new(CompactionInterrupt::new()),
        })
        .unwrap();

        // Keys hash to both halves of the ring: two shards.
        assert_eq!(outputs.len(), 2);
        let total: u64 = outputs.iter().map(|r| r.stats().partition_count).sum();
        assert_eq!(total, 30);

        // Shard contents respect the split point.
        let full = DataRange::full();
        for output in &outputs {
            let keys: Vec<_> = output
                .scan(&full)
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            let below = keys.iter().filter(|(k, _)| k.token < crate::data::Token(0)).count();
            assert!(below == 0 || below == keys.len());
        }
    }
}
