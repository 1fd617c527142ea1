#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use tempfile::TempDir;

    use crate::cache::CacheService;
    use crate::commitlog::CommitLogPosition;
    use crate::data::cells::Cell;
    use crate::data::clustering::Clustering;
    use crate::data::filter::DataRange;
    use crate::data::{
        DataLimits, DecoratedKey, HashPartitioner, PartitionUpdate, Row, TableId,
    };
    use crate::memtable::{Memtable, NoopIndexer, PositionBound};
    use crate::oporder::OpOrder;
    use crate::read::{ReadCommand, ReadError, ReadExecutor};
    use crate::sstable::tests::helpers::build_file;
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

    fn key(bytes: &[u8]) -> DecoratedKey {
        DecoratedKey::new(&HashPartitioner, bytes.to_vec()).unwrap()
    }

    fn put(tracker: &Tracker, order: &OpOrder, k: &[u8], ts: i64, value: &[u8]) {
        let group = order.start().unwrap();
        let update = PartitionUpdate::new(TABLE, key(k)).with_row(
            Row::new(Clustering::row(vec![b"c".to_vec()]))
                .with_cell(1, Cell::live(ts, value.to_vec())),
        );
        tracker
            .view()
            .current
            .put(
                update,
                CommitLogPosition { segment: 1, offset: 1 },
                &NoopIndexer,
                &group,
            )
            .unwrap();
        group.close();
    }

    #[test]
    fn test_range_read_merges_memtable_and_files() {
        let tmp = TempDir::new().unwrap();
        let tracker = Tracker::new(memtable());
        let order = OpOrder::new();

        let (file, _) = build_file(tmp.path(), 1, 10);
        tracker.add_sstables(vec![file]).unwrap();
        put(&tracker, &order, b"extra-1", 100, b"m");
        put(&tracker, &order, b"extra-2", 100, b"m");

        let cache = CacheService::disabled();
        let command = ReadCommand::range(TABLE, DataRange::full(), 1000);
        let response = ReadExecutor::execute(&tracker.view(), &cache, &command).unwrap();

        assert_eq!(response.partitions.len(), 12);
        assert!(
            response
                .partitions
                .windows(2)
                .all(|w| w[0].key < w[1].key)
        );
    }

    #[test]
    fn test_overlapping_partition_merged_not_duplicated() {
        let tmp = TempDir::new().unwrap();
        let tracker = Tracker::new(memtable());
        let order = OpOrder::new();

        let (file, _) = build_file(tmp.path(), 1, 5);
        tracker.add_sstables(vec![file]).unwrap();
        // Overwrite one file-resident key with a newer value.
        put(&tracker, &order, b"p-0001", 1_000, b"overwritten");

        let cache = CacheService::disabled();
        let command = ReadCommand::range(TABLE, DataRange::full(), 1000);
        let response = ReadExecutor::execute(&tracker.view(), &cache, &command).unwrap();

        assert_eq!(response.partitions.len(), 5);
        let target = response
            .partitions
            .iter()
            .find(|p| p.key == key(b"p-0001"))
            .unwrap();
        assert_eq!(
            target.rows[0].cells[&1].value.as_deref(),
            Some(b"overwritten".as_ref())
        );
    }

    #[test]
    fn test_empty_source_set_returns_empty_iterator() {
        let tracker = Tracker::new(memtable());
        let cache = CacheService::disabled();
        let command = ReadCommand::range(TABLE, DataRange::full(), 1000);
        let response = ReadExecutor::execute(&tracker.view(), &cache, &command).unwrap();
        assert!(response.partitions.is_empty());
    }

    #[test]
    fn test_row_limit_applied_after_reconciliation() {
        let tracker = Tracker::new(memtable());
        let order = OpOrder::new();
        for i in 0..10 {
            put(&tracker, &order, format!("k{i}").as_bytes(), 10, b"v");
        }

        let cache = CacheService::disabled();
        let mut command = ReadCommand::range(TABLE, DataRange::full(), 1000);
        command.limits = DataLimits::rows(4);
        let response = ReadExecutor::execute(&tracker.view(), &cache, &command).unwrap();
        assert_eq!(response.row_count(), 4);
    }

    #[test]
    fn test_partition_limit() {
        let tracker = Tracker::new(memtable());
        let order = OpOrder::new();
        for i in 0..10 {
            put(&tracker, &order, format!("k{i}").as_bytes(), 10, b"v");
        }

        let cache = CacheService::disabled();
        let mut command = ReadCommand::range(TABLE, DataRange::full(), 1000);
        command.limits = DataLimits {
            partition_limit: 3,
            row_limit: usize::MAX,
        };
        let response = ReadExecutor::execute(&tracker.view(), &cache, &command).unwrap();
        assert_eq!(response.partitions.len(), 3);
    }

    #[test]
    fn test_deleted_partitions_are_invisible() {
        let tracker = Tracker::new(memtable());
        let order = OpOrder::new();
        put(&tracker, &order, b"keep", 10, b"v");

        // Partition-level delete with a newer timestamp.
        let group = order.start().unwrap();
        let mut doomed = PartitionUpdate::new(TABLE, key(b"gone"));
        doomed.insert_row(
            Row::new(Clustering::row(vec![b"c".to_vec()])).with_cell(1, Cell::live(5, b"v".to_vec())),
        );
        doomed.delete_partition(crate::data::cells::DeletionTime::new(50, 900));
        tracker
            .view()
            .current
            .put(
                doomed,
                CommitLogPosition { segment: 1, offset: 3 },
                &NoopIndexer,
                &group,
            )
            .unwrap();
        group.close();

        let cache = CacheService::disabled();
        let command = ReadCommand::range(TABLE, DataRange::full(), 1000);
        let response = ReadExecutor::execute(&tracker.view(), &cache, &command).unwrap();
        assert_eq!(response.partitions.len(), 1);
        assert_eq!(response.partitions[0].key, key(b"keep"));
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let tracker = Tracker::new(memtable());
        let order = OpOrder::new();
        put(&tracker, &order, b"k", 10, b"v");

        let cache = CacheService::disabled();
        let mut command = ReadCommand::range(TABLE, DataRange::full(), 1000);
        command.deadline = Some(Instant::now() - Duration::from_millis(1));
        let err = ReadExecutor::execute(&tracker.view(), &cache, &command).unwrap_err();
        assert!(matches!(err, ReadError::Timeout(_)));
    }

    #[test]
    fn test_view_captured_before_transition_still_reads_memtable() {
        let tracker = Tracker::new(memtable());
        let order = OpOrder::new();
        put(&tracker, &order, b"k", 10, b"v");

        let captured = tracker.view();
        // The table switches memtables after the view was captured.
        tracker.switch_memtable(false, memtable()).unwrap();

        let cache = CacheService::disabled();
        let command = ReadCommand::range(TABLE, DataRange::full(), 1000);
        let response = ReadExecutor::execute(&captured, &cache, &command).unwrap();
        assert_eq!(response.partitions.len(), 1);
    }
}
