#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::commitlog::{CommitLog, CommitLogPosition, SegmentedCommitLog};
    use crate::data::cells::Cell;
    use crate::data::clustering::Clustering;
    use crate::data::{
        DecoratedKey, HashPartitioner, Mutation, PartitionUpdate, Row, TableId,
    };

    fn mutation(table: TableId, key: &[u8], ts: i64) -> Mutation {
        let key = DecoratedKey::new(&HashPartitioner, key.to_vec()).unwrap();
        let update = PartitionUpdate::new(table, key.clone()).with_row(
            Row::new(Clustering::row(vec![b"c".to_vec()]))
                .with_cell(1, Cell::live(ts, b"v".to_vec())),
        );
        Mutation::new("ks", key).with(update).unwrap()
    }

    fn segment_count(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("segment-")
            })
            .count()
    }

    #[test]
    fn test_discard_deletes_fully_flushed_segments() {
        let tmp = TempDir::new().unwrap();
        // Rotate on every append.
        let log = SegmentedCommitLog::open(tmp.path(), 64).unwrap();

        let start = log.current_position();
        for i in 0..4 {
            log.add(&mutation(TableId(1), format!("k{i}").as_bytes(), i))
                .unwrap();
        }
        let upper = log.current_position();
        let before = segment_count(tmp.path());

        log.discard_completed_segments(TableId(1), start, upper)
            .unwrap();

        // Everything but the active segment is reclaimable.
        assert!(segment_count(tmp.path()) < before);
        assert!(log.replay_from(upper).unwrap().is_empty());
    }

    #[test]
    fn test_segment_dirty_for_another_table_survives() {
        let tmp = TempDir::new().unwrap();
        let log = SegmentedCommitLog::open(tmp.path(), 1 << 20).unwrap();

        let start = log.current_position();
        log.add(&mutation(TableId(1), b"a", 1)).unwrap();
        log.add(&mutation(TableId(2), b"b", 2)).unwrap();
        let upper = log.current_position();

        log.discard_completed_segments(TableId(1), start, upper)
            .unwrap();

        // Table 2 still claims the shared segment: its mutation must replay.
        let replayed = log.replay_from(CommitLogPosition::NONE).unwrap();
        assert_eq!(replayed.len(), 2);
    }

    #[test]
    fn test_discard_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let log = SegmentedCommitLog::open(tmp.path(), 64).unwrap();

        let start = log.current_position();
        log.add(&mutation(TableId(1), b"a", 1)).unwrap();
        let upper = log.current_position();

        log.discard_completed_segments(TableId(1), start, upper)
            .unwrap();
        log.discard_completed_segments(TableId(1), start, upper)
            .unwrap();
    }

    #[test]
    fn test_partial_segment_not_discarded() {
        let tmp = TempDir::new().unwrap();
        let log = SegmentedCommitLog::open(tmp.path(), 1 << 20).unwrap();

        let start = log.current_position();
        log.add(&mutation(TableId(1), b"flushed", 1)).unwrap();
        let upper = log.current_position();
        log.add(&mutation(TableId(1), b"unflushed", 2)).unwrap();

        log.discard_completed_segments(TableId(1), start, upper)
            .unwrap();

        // The segment still holds an unflushed mutation above `upper`.
        let replayed = log.replay_from(upper).unwrap();
        assert_eq!(replayed.len(), 1);
    }
}
