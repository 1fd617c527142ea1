use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use crate::cache::CacheService;
use crate::commitlog::{CommitLog, SegmentedCommitLog};
use crate::compaction::CompactionManager;
use crate::config::TableConfig;
use crate::data::cells::Cell;
use crate::data::clustering::Clustering;
use crate::data::{
    DecoratedKey, HashPartitioner, Mutation, PartitionUpdate, Row, TableId,
};
use crate::table::{EngineContext, TableMetadata, TableStore};

pub const TABLE: TableId = TableId(42);

pub fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::DEBUG)
        .try_init();
}

/// Context over a file-backed commit log rooted at `root/commitlog`.
pub fn context(root: &std::path::Path) -> EngineContext {
    let commit_log: Arc<dyn CommitLog> = Arc::new(
        SegmentedCommitLog::open(root.join("commitlog"), 1 << 20).unwrap(),
    );
    EngineContext {
        commit_log,
        compaction: CompactionManager::new(1),
        cache: Arc::new(CacheService::disabled()),
    }
}

pub fn metadata() -> TableMetadata {
    TableMetadata {
        keyspace: "ks".into(),
        name: "t".into(),
        id: TABLE,
        partitioner: Arc::new(HashPartitioner),
    }
}

pub fn open_store(root: &std::path::Path, config: TableConfig) -> Arc<TableStore> {
    init_tracing();
    TableStore::open(&[PathBuf::from(root)], metadata(), config, context(root)).unwrap()
}

pub fn key(bytes: &[u8]) -> DecoratedKey {
    DecoratedKey::new(&HashPartitioner, bytes.to_vec()).unwrap()
}

pub fn mutation(k: &[u8], clustering: &[u8], ts: i64, value: &[u8]) -> Mutation {
    let key = key(k);
    let update = PartitionUpdate::new(TABLE, key.clone()).with_row(
        Row::new(Clustering::row(vec![clustering.to_vec()]))
            .with_cell(1, Cell::live(ts, value.to_vec())),
    );
    Mutation::new("ks", key).with(update).unwrap()
}

pub fn tombstone_mutation(k: &[u8], clustering: &[u8], ts: i64, ldt: u32) -> Mutation {
    let key = key(k);
    let update = PartitionUpdate::new(TABLE, key.clone()).with_row(
        Row::new(Clustering::row(vec![clustering.to_vec()]))
            .with_cell(1, Cell::tombstone(ts, ldt)),
    );
    Mutation::new("ks", key).with(update).unwrap()
}

/// A table-backed secondary index for tests: mirrors every base update
/// into its own index table, so the coordinated flush and scrub-fallback
/// paths can be exercised end to end.
pub mod mirror_index {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::commitlog::CommitLogPosition;
    use crate::data::{PartitionUpdate, TableId};
    use crate::flush::IndexFlushTarget;
    use crate::memtable::{Memtable, NoopIndexer, PositionBound};
    use crate::oporder::Group;
    use crate::table::{SecondaryIndex, TableStore};
    use crate::tracker::Tracker;

    pub struct MirrorIndex {
        name: String,
        target: IndexFlushTarget,
        rebuilt: AtomicBool,
    }

    impl MirrorIndex {
        /// Build an index table under `<table-dir>/.<name>/`, register the
        /// index with the store, and return a handle.
        pub fn attach(store: &Arc<TableStore>, name: &str) -> Arc<MirrorIndex> {
            let index_id = TableId(store.id().0 + 1_000);
            let dir = store.dirs[0].join(format!(".{name}"));
            std::fs::create_dir_all(&dir).unwrap();

            let partitioner = Arc::clone(&store.metadata().partitioner);
            let memtable = Arc::new(Memtable::new(
                index_id,
                Arc::clone(&partitioner),
                1 << 20,
                Arc::new(PositionBound::new(CommitLogPosition::NONE)),
            ));
            let target = IndexFlushTarget {
                table_id: index_id,
                partitioner,
                tracker: Arc::new(Tracker::new(memtable)),
                dir,
                memtable_size_limit: 1 << 20,
            };

            let index = Arc::new(MirrorIndex {
                name: name.to_string(),
                target,
                rebuilt: AtomicBool::new(false),
            });
            store
                .secondary_indexes()
                .register(Arc::clone(&index) as Arc<dyn SecondaryIndex>);
            index
        }

        pub fn target(&self) -> &IndexFlushTarget {
            &self.target
        }

        pub fn rebuilt(&self) -> bool {
            self.rebuilt.load(Ordering::SeqCst)
        }
    }

    impl SecondaryIndex for MirrorIndex {
        fn name(&self) -> &str {
            &self.name
        }

        fn index_update(
            &self,
            update: &PartitionUpdate,
            position: CommitLogPosition,
            group: &Group,
        ) {
            let mut mirrored = update.clone();
            mirrored.table_id = self.target.table_id;
            let _ = self
                .target
                .tracker
                .view()
                .current
                .put(mirrored, position, &NoopIndexer, group);
        }

        fn backing_table(&self) -> Option<IndexFlushTarget> {
            Some(self.target.clone())
        }

        fn rebuild(&self) {
            self.rebuilt.store(true, Ordering::SeqCst);
        }
    }
}
