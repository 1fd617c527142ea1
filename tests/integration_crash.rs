//! Crash-safety scenarios: simulated kills around the durability and
//! lifecycle-transaction contracts.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use columnadb::cache::CacheService;
use columnadb::commitlog::{CommitLog, SegmentedCommitLog};
use columnadb::compaction::CompactionManager;
use columnadb::config::TableConfig;
use columnadb::data::cells::Cell;
use columnadb::data::clustering::Clustering;
use columnadb::data::{
    DataRange, DecoratedKey, HashPartitioner, Mutation, PartitionUpdate, Row, TableId,
};
use columnadb::flush::FlushReason;
use columnadb::lifecycle::{LifecycleTransaction, OperationType, recover_directory};
use columnadb::read::ReadCommand;
use columnadb::sstable::{Component, Descriptor, SSTableFormat, SSTableReader, SSTableWriter};
use columnadb::table::{EngineContext, TableMetadata, TableStore};

const TABLE: TableId = TableId(9);

fn context(root: &std::path::Path) -> EngineContext {
    let commit_log: Arc<dyn CommitLog> =
        Arc::new(SegmentedCommitLog::open(root.join("commitlog"), 1 << 20).unwrap());
    EngineContext {
        commit_log,
        compaction: CompactionManager::new(1),
        cache: Arc::new(CacheService::disabled()),
    }
}

fn open(root: &std::path::Path) -> Arc<TableStore> {
    let metadata = TableMetadata {
        keyspace: "ks".into(),
        name: "t".into(),
        id: TABLE,
        partitioner: Arc::new(HashPartitioner),
    };
    TableStore::open(
        &[PathBuf::from(root)],
        metadata,
        TableConfig {
            auto_snapshot: false,
            ..TableConfig::default()
        },
        context(root),
    )
    .unwrap()
}

fn put(store: &TableStore, k: &[u8], ts: i64) {
    let key = DecoratedKey::new(&HashPartitioner, k.to_vec()).unwrap();
    let update = PartitionUpdate::new(TABLE, key.clone()).with_row(
        Row::new(Clustering::row(vec![b"c".to_vec()]))
            .with_cell(1, Cell::live(ts, b"v".to_vec())),
    );
    store
        .apply(&Mutation::new("ks", key).with(update).unwrap())
        .unwrap();
}

fn count_rows(store: &TableStore) -> usize {
    store
        .read(&ReadCommand::range(TABLE, DataRange::full(), 1_000))
        .unwrap()
        .row_count()
}

// ------------------------------------------------------------------------------------------------
// Durability (property 1)
// ------------------------------------------------------------------------------------------------

#[test]
fn test_durability_after_simulated_kill() {
    let tmp = TempDir::new().unwrap();
    {
        let store = open(tmp.path());
        for i in 0..200 {
            put(&store, format!("k{i}").as_bytes(), i);
        }
        // Kill: the store is dropped without close or flush.
    }

    let store = open(tmp.path());
    assert_eq!(count_rows(&store), 200);
}

#[test]
fn test_durability_across_flush_and_kill() {
    let tmp = TempDir::new().unwrap();
    {
        let store = open(tmp.path());
        for i in 0..100 {
            put(&store, format!("flushed-{i}").as_bytes(), i);
        }
        store
            .flush(FlushReason::UserForced)
            .unwrap()
            .wait()
            .unwrap()
            .unwrap();
        for i in 0..60 {
            put(&store, format!("tail-{i}").as_bytes(), 1_000 + i);
        }
    }

    let store = open(tmp.path());
    assert_eq!(count_rows(&store), 160);
}

// ------------------------------------------------------------------------------------------------
// S3: crash after prepare, before / after commit
// ------------------------------------------------------------------------------------------------

fn sealed_file(dir: &std::path::Path, generation: u64, keys: &[&[u8]]) -> Arc<SSTableReader> {
    let mut updates: Vec<PartitionUpdate> = keys
        .iter()
        .map(|k| {
            let key = DecoratedKey::new(&HashPartitioner, k.to_vec()).unwrap();
            PartitionUpdate::new(TABLE, key).with_row(
                Row::new(Clustering::row(vec![b"c".to_vec()]))
                    .with_cell(1, Cell::live(1, b"v".to_vec())),
            )
        })
        .collect();
    updates.sort_by(|a, b| a.key.cmp(&b.key));

    let mut writer =
        SSTableWriter::create(Descriptor::new(dir, generation, SSTableFormat::Big)).unwrap();
    for update in &updates {
        writer.append(update).unwrap();
    }
    let (descriptor, _) = writer.finish().unwrap();
    SSTableReader::open(descriptor).unwrap()
}

#[test]
fn test_s3_crash_between_prepare_and_commit_rolls_back() {
    let tmp = TempDir::new().unwrap();

    // {A, B} → {C}, crash right after prepare.
    let a = sealed_file(tmp.path(), 1, &[b"a1", b"a2"]);
    let b = sealed_file(tmp.path(), 2, &[b"b1", b"b2"]);
    let c = sealed_file(tmp.path(), 3, &[b"a1", b"a2", b"b1", b"b2"]);
    let (a_desc, b_desc, c_desc) = (
        a.descriptor().clone(),
        b.descriptor().clone(),
        c.descriptor().clone(),
    );

    let mut txn = LifecycleTransaction::new(OperationType::Compaction, tmp.path(), 3);
    txn.track_new(c_desc.clone()).unwrap();
    txn.track_obsolete(a).unwrap();
    txn.track_obsolete(b).unwrap();
    txn.prepare_to_commit().unwrap();
    std::mem::forget(txn);
    drop(c);

    let report = recover_directory(tmp.path()).unwrap();
    assert_eq!(report.rolled_back.len(), 1);

    // Pre-commit world: {A, B} live, C deleted. Never {A,B,C}, never {}.
    assert!(a_desc.is_complete());
    assert!(b_desc.is_complete());
    assert!(!c_desc.path(Component::Data).exists());
}

#[test]
fn test_s3_crash_after_commit_record_rolls_forward() {
    let tmp = TempDir::new().unwrap();

    let a = sealed_file(tmp.path(), 1, &[b"a1", b"a2"]);
    let b = sealed_file(tmp.path(), 2, &[b"b1", b"b2"]);
    let c = sealed_file(tmp.path(), 3, &[b"a1", b"a2", b"b1", b"b2"]);
    let (a_desc, b_desc, c_desc) = (
        a.descriptor().clone(),
        b.descriptor().clone(),
        c.descriptor().clone(),
    );

    let mut txn = LifecycleTransaction::new(OperationType::Compaction, tmp.path(), 3);
    txn.track_new(c_desc.clone()).unwrap();
    txn.track_obsolete(a).unwrap();
    txn.track_obsolete(b).unwrap();
    txn.prepare_to_commit().unwrap();
    std::mem::forget(txn);
    drop(c);

    // Hand-write the COMMIT record, as a crash between sealing the commit
    // and deleting the old files would leave things.
    let log_path = tmp.path().join("txn-compaction-3.log");
    let payload = [2u8];
    let len = (payload.len() as u32).to_le_bytes();
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&len);
    hasher.update(&payload);
    let crc = hasher.finalize().to_le_bytes();
    let mut bytes = std::fs::read(&log_path).unwrap();
    bytes.extend_from_slice(&len);
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&crc);
    std::fs::write(&log_path, bytes).unwrap();

    let report = recover_directory(tmp.path()).unwrap();
    assert_eq!(report.rolled_forward.len(), 1);

    // Post-commit world: {C} live, {A, B} deleted.
    assert!(c_desc.is_complete());
    assert!(!a_desc.path(Component::Data).exists());
    assert!(!b_desc.path(Component::Data).exists());
}

#[test]
fn test_table_reopens_cleanly_after_interrupted_compaction() {
    let tmp = TempDir::new().unwrap();
    {
        let store = open(tmp.path());
        for i in 0..50 {
            put(&store, format!("k{i}").as_bytes(), i);
        }
        store
            .flush(FlushReason::UserForced)
            .unwrap()
            .wait()
            .unwrap()
            .unwrap();
    }

    // Plant an unfinished transaction log in the table directory, as an
    // interrupted compaction would.
    let table_dir = tmp.path().join("ks").join(format!("t-{TABLE}"));
    let phantom = sealed_file(&table_dir, 999, &[b"phantom"]);
    let phantom_desc = phantom.descriptor().clone();
    let mut txn = LifecycleTransaction::new(OperationType::Compaction, &table_dir, 999);
    txn.track_new(phantom_desc.clone()).unwrap();
    txn.prepare_to_commit().unwrap();
    std::mem::forget(txn);
    drop(phantom);

    // Reopen: the phantom output is rolled back, the real data intact.
    let store = open(tmp.path());
    assert_eq!(count_rows(&store), 50);
    assert!(!phantom_desc.path(Component::Data).exists());
}
