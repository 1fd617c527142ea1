#[cfg(test)]
mod tests {
    use crate::compaction::purge_partition;
    use crate::data::cells::{Cell, DeletionTime};
    use crate::data::clustering::Clustering;
    use crate::data::update::RangeTombstone;
    use crate::data::{DecoratedKey, HashPartitioner, PartitionUpdate, Row, TableId};

    const TABLE: TableId = TableId(5);
    const GC_GRACE: u32 = 100;

    fn key(bytes: &[u8]) -> DecoratedKey {
        DecoratedKey::new(&HashPartitioner, bytes.to_vec()).unwrap()
    }

    fn row(c: &[u8], cell: Cell) -> Row {
        Row::new(Clustering::row(vec![c.to_vec()])).with_cell(1, cell)
    }

    #[test]
    fn test_tombstone_kept_before_grace() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"c", Cell::tombstone(10, 1_000)));

        // now is within the grace window.
        let purged = purge_partition(&update, GC_GRACE, 1_050, i64::MAX).unwrap();
        assert_eq!(purged.tombstone_count(), 1);
    }

    #[test]
    fn test_tombstone_purged_after_grace_below_floor() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"c", Cell::tombstone(10, 1_000)));

        // Grace has passed and no other source holds older data.
        assert!(purge_partition(&update, GC_GRACE, 2_000, i64::MAX).is_none());
    }

    #[test]
    fn test_tombstone_survives_low_purge_floor() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"c", Cell::tombstone(10, 1_000)));

        // An overlapping live file could still hold a shadowed value with
        // timestamp ≤ 10: the floor forbids the purge.
        let purged = purge_partition(&update, GC_GRACE, 2_000, 5).unwrap();
        assert_eq!(purged.tombstone_count(), 1);
    }

    #[test]
    fn test_shadowed_data_dropped_even_when_tombstone_kept() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"c", Cell::live(5, b"old".to_vec())));
        update.insert_row(row(b"c", Cell::tombstone(10, 1_000)));

        let purged = purge_partition(&update, GC_GRACE, 1_050, i64::MAX).unwrap();
        // The value at ts 5 is gone for good; the tombstone stays.
        let cell = &purged.rows[&Clustering::row(vec![b"c".to_vec()])].cells[&1];
        assert!(cell.is_tombstone());
    }

    #[test]
    fn test_partition_deletion_purge() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.delete_partition(DeletionTime::new(50, 1_000));
        update.insert_row(row(b"c", Cell::live(5, b"shadowed".to_vec())));

        // Before grace: deletion kept, shadowed data dropped.
        let purged = purge_partition(&update, GC_GRACE, 1_050, i64::MAX).unwrap();
        assert!(!purged.partition_deletion.is_live());
        assert!(purged.rows.is_empty());

        // After grace with an open floor: nothing remains.
        assert!(purge_partition(&update, GC_GRACE, 2_000, i64::MAX).is_none());
    }

    #[test]
    fn test_range_tombstone_purge() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.add_range_tombstone(RangeTombstone::new(
            Clustering::incl_start(vec![b"a".to_vec()]),
            Clustering::incl_end(vec![b"m".to_vec()]),
            DeletionTime::new(40, 1_000),
        ));
        update.insert_row(row(b"z", Cell::live(5, b"outside".to_vec())));

        let kept = purge_partition(&update, GC_GRACE, 1_010, i64::MAX).unwrap();
        assert_eq!(kept.range_tombstones.len(), 1);

        let purged = purge_partition(&update, GC_GRACE, 2_000, i64::MAX).unwrap();
        assert!(purged.range_tombstones.is_empty());
        assert_eq!(purged.rows.len(), 1);
    }

    #[test]
    fn test_live_data_always_survives() {
        let mut update = PartitionUpdate::new(TABLE, key(b"k"));
        update.insert_row(row(b"c", Cell::live(100, b"live".to_vec())));

        let purged = purge_partition(&update, GC_GRACE, 2_000, i64::MAX).unwrap();
        assert_eq!(purged.rows.len(), 1);
        assert_eq!(
            purged.rows[&Clustering::row(vec![b"c".to_vec()])].cells[&1]
                .value
                .as_deref(),
            Some(b"live".as_ref())
        );
    }
}
