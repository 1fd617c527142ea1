use std::path::Path;
use std::sync::Arc;

use crate::data::cells::Cell;
use crate::data::clustering::Clustering;
use crate::data::{DecoratedKey, HashPartitioner, PartitionUpdate, Row, TableId};
use crate::sstable::{Descriptor, SSTableFormat, SSTableReader, SSTableWriter, StatsMetadata};

pub const TABLE: TableId = TableId(3);

pub fn key(bytes: &[u8]) -> DecoratedKey {
    DecoratedKey::new(&HashPartitioner, bytes.to_vec()).unwrap()
}

pub fn update(k: &[u8], ts: i64, value: &[u8]) -> PartitionUpdate {
    PartitionUpdate::new(TABLE, key(k)).with_row(
        Row::new(Clustering::row(vec![b"c".to_vec()])).with_cell(1, Cell::live(ts, value.to_vec())),
    )
}

/// Build a sealed sorted file holding `count` partitions with keys
/// `p-0000 .. p-<count-1>` (appended in token order).
pub fn build_file(
    dir: &Path,
    generation: u64,
    count: usize,
) -> (Arc<SSTableReader>, StatsMetadata) {
    let descriptor = Descriptor::new(dir, generation, SSTableFormat::Big);
    let mut writer = SSTableWriter::create(descriptor).unwrap();

    let mut updates: Vec<PartitionUpdate> = (0..count)
        .map(|i| update(format!("p-{i:04}").as_bytes(), i as i64 + 1, b"value"))
        .collect();
    updates.sort_by(|a, b| a.key.cmp(&b.key));

    for u in &updates {
        writer.append(u).unwrap();
    }
    let (descriptor, stats) = writer.finish().unwrap();
    let reader = SSTableReader::open(descriptor).unwrap();
    (reader, stats)
}
