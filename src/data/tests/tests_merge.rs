#[cfg(test)]
mod tests {
    use crate::data::cells::{Cell, DeletionTime, Row};
    use crate::data::clustering::Clustering;
    use crate::data::update::{Mutation, PartitionUpdate, RangeTombstone};
    use crate::data::{DataError, DecoratedKey, HashPartitioner, TableId};

    const TABLE: TableId = TableId(1);

    fn key(bytes: &[u8]) -> DecoratedKey {
        DecoratedKey::new(&HashPartitioner, bytes.to_vec()).unwrap()
    }

    fn row(c: &[u8], column: u32, cell: Cell) -> Row {
        Row::new(Clustering::row(vec![c.to_vec()])).with_cell(column, cell)
    }

    #[test]
    fn test_newer_timestamp_wins() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"c", 1, Cell::live(10, b"old".to_vec())));
        update.insert_row(row(b"c", 1, Cell::live(20, b"new".to_vec())));

        let rows = update.live_rows(1000);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells[&1].value.as_deref(), Some(b"new".as_ref()));
    }

    #[test]
    fn test_tombstone_beats_value_at_equal_timestamp() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"c", 1, Cell::live(10, b"value".to_vec())));
        update.insert_row(row(b"c", 1, Cell::tombstone(10, 500)));

        assert!(update.live_rows(1000).is_empty());

        // The same pair merged in the opposite order gives the same answer.
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"c", 1, Cell::tombstone(10, 500)));
        update.insert_row(row(b"c", 1, Cell::live(10, b"value".to_vec())));

        assert!(update.live_rows(1000).is_empty());
    }

    #[test]
    fn test_merge_is_commutative_for_distinct_coordinates() {
        let a = PartitionUpdate::new(TABLE, key(b"k")).with_row(row(
            b"c1",
            1,
            Cell::live(10, b"a".to_vec()),
        ));
        let b = PartitionUpdate::new(TABLE, key(b"k")).with_row(row(
            b"c2",
            2,
            Cell::live(11, b"b".to_vec()),
        ));

        let mut left = a.clone();
        left.merge(b.clone());
        let mut right = b;
        right.merge(a);

        assert_eq!(left, right);
    }

    #[test]
    fn test_merge_reports_timestamp_delta() {
        let mut state = PartitionUpdate::new(TABLE, key(b"k"));
        let first = PartitionUpdate::new(TABLE, key(b"k")).with_row(row(
            b"c",
            1,
            Cell::live(1_000, b"v1".to_vec()),
        ));
        let second = PartitionUpdate::new(TABLE, key(b"k")).with_row(row(
            b"c",
            1,
            Cell::live(1_700, b"v2".to_vec()),
        ));

        // No prior cell: delta is unbounded.
        let outcome = state.merge(first);
        assert_eq!(outcome.timestamp_delta_micros, u64::MAX);

        let outcome = state.merge(second);
        assert_eq!(outcome.timestamp_delta_micros, 700);
    }

    #[test]
    fn test_range_tombstone_shadows_older_rows_only() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"b", 1, Cell::live(10, b"old".to_vec())));
        update.insert_row(row(b"x", 1, Cell::live(10, b"outside".to_vec())));
        update.add_range_tombstone(RangeTombstone::new(
            Clustering::incl_start(vec![b"a".to_vec()]),
            Clustering::incl_end(vec![b"c".to_vec()]),
            DeletionTime::new(15, 1000),
        ));
        update.insert_row(row(b"b", 1, Cell::live(20, b"resurrected".to_vec())));

        let rows = update.live_rows(2000);
        let values: Vec<_> = rows
            .iter()
            .map(|r| r.cells[&1].value.clone().unwrap())
            .collect();
        assert_eq!(values, vec![b"resurrected".to_vec(), b"outside".to_vec()]);
    }

    #[test]
    fn test_partition_deletion_shadows_everything_older() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"a", 1, Cell::live(10, b"gone".to_vec())));
        update.delete_partition(DeletionTime::new(50, 1000));
        update.insert_row(row(b"b", 1, Cell::live(60, b"alive".to_vec())));

        let rows = update.live_rows(2000);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells[&1].value.as_deref(), Some(b"alive".as_ref()));
    }

    #[test]
    fn test_static_row_merges_separately() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(Row::new(Clustering::static_row()).with_cell(9, Cell::live(5, b"s".to_vec())));
        update.insert_row(row(b"c", 1, Cell::live(5, b"r".to_vec())));

        let rows = update.live_rows(1000);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].clustering.is_static());
    }

    #[test]
    fn test_mutation_rejects_key_mismatch_and_duplicates() {
        let mut mutation = Mutation::new("ks", key(b"k"));
        mutation
            .add(PartitionUpdate::new(TABLE, key(b"k")))
            .unwrap();

        let err = mutation
            .add(PartitionUpdate::new(TABLE, key(b"k")))
            .unwrap_err();
        assert!(matches!(err, DataError::DuplicateTableUpdate(_)));

        let err = mutation
            .add(PartitionUpdate::new(TableId(2), key(b"other")))
            .unwrap_err();
        assert!(matches!(err, DataError::KeyMismatch));
    }

    #[test]
    fn test_min_max_timestamps_and_tombstone_counts() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"a", 1, Cell::live(10, b"v".to_vec())));
        update.insert_row(row(b"b", 1, Cell::tombstone(30, 700)));
        update.add_range_tombstone(RangeTombstone::new(
            Clustering::incl_start(vec![b"x".to_vec()]),
            Clustering::incl_end(vec![b"z".to_vec()]),
            DeletionTime::new(20, 600),
        ));

        assert_eq!(update.min_timestamp(), 10);
        assert_eq!(update.max_timestamp(), 30);
        assert_eq!(update.min_local_deletion_time(), 600);
        assert_eq!(update.tombstone_count(), 2);
    }

    #[test]
    fn test_encoding_round_trip() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"a", 1, Cell::live(10, b"v".to_vec())));
        update.add_range_tombstone(RangeTombstone::new(
            Clustering::incl_start(vec![b"p".to_vec()]),
            Clustering::excl_end(vec![b"q".to_vec()]),
            DeletionTime::new(20, 600),
        ));
        update.cdc = true;

        let mutation = Mutation::new("ks", key(b"k")).with(update).unwrap();

        let bytes = crate::encoding::encode_to_vec(&mutation).unwrap();
        let (decoded, n) = crate::encoding::decode_from_slice::<Mutation>(&bytes).unwrap();
        assert_eq!(decoded, mutation);
        assert_eq!(n, bytes.len());
    }
}
