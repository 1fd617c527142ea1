//! Secondary-index plug point.
//!
//! An index observes every applied update from inside the write's
//! operation group ([`Memtable::put`](crate::memtable::Memtable::put)
//! invokes the registered [`UpdateIndexer`] with the update, its commit
//! log position, and the group), so an index that maintains its own index
//! table writes the derived rows under the same group as the base write.
//!
//! Indexes that expose a [`IndexFlushTarget`] through
//! [`SecondaryIndex::backing_table`] are flushed *with* the base table:
//! the flush coordinator swaps their memtables under the base table's
//! write barrier and seals their files in the same lifecycle transaction.
//! The table store's scrub pass also covers those backing tables; a scrub
//! failure there calls the index's rebuild hook instead of propagating.

use std::sync::RwLock;

use tracing::{info, warn};

use crate::commitlog::CommitLogPosition;
use crate::data::PartitionUpdate;
use crate::flush::IndexFlushTarget;
use crate::memtable::UpdateIndexer;
use crate::oporder::Group;

/// One secondary index attached to a table.
pub trait SecondaryIndex: Send + Sync {
    /// Index name, unique within the table.
    fn name(&self) -> &str;

    /// Observe one applied update, inside the write's group. An index
    /// backed by a table applies its derived update to that table's
    /// current memtable here, using the same group and position.
    fn index_update(&self, update: &PartitionUpdate, position: CommitLogPosition, group: &Group);

    /// The index's backing table, when the index maintains one. Backed
    /// indexes flush under the base table's barrier and are scrubbed
    /// alongside it.
    fn backing_table(&self) -> Option<IndexFlushTarget> {
        None
    }

    /// Rebuild from the base table (scrub-failure fallback).
    fn rebuild(&self);
}

/// Registry of a table's indexes.
#[derive(Default)]
pub struct SecondaryIndexManager {
    indexes: RwLock<Vec<std::sync::Arc<dyn SecondaryIndex>>>,
}

impl std::fmt::Debug for SecondaryIndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.indexes.read().map(|i| i.len()).unwrap_or(0);
        f.debug_struct("SecondaryIndexManager")
            .field("indexes", &count)
            .finish()
    }
}

impl SecondaryIndexManager {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an index.
    pub fn register(&self, index: std::sync::Arc<dyn SecondaryIndex>) {
        if let Ok(mut indexes) = self.indexes.write() {
            info!(index = index.name(), "secondary index registered");
            indexes.push(index);
        }
    }

    /// True when no index is attached.
    pub fn is_empty(&self) -> bool {
        self.indexes.read().map(|i| i.is_empty()).unwrap_or(true)
    }

    /// Every registered index.
    pub fn all(&self) -> Vec<std::sync::Arc<dyn SecondaryIndex>> {
        self.indexes
            .read()
            .map(|indexes| indexes.clone())
            .unwrap_or_default()
    }

    /// The backing tables of every table-backed index; the flush
    /// coordinator freezes these with the base table.
    pub fn flush_targets(&self) -> Vec<IndexFlushTarget> {
        self.all()
            .iter()
            .filter_map(|index| index.backing_table())
            .collect()
    }

    /// Scrub fallback: rebuild the named index from the base table.
    pub fn rebuild(&self, name: &str) {
        if let Ok(indexes) = self.indexes.read() {
            for index in indexes.iter() {
                if index.name() == name {
                    warn!(index = name, "rebuilding secondary index");
                    index.rebuild();
                    return;
                }
            }
        }
    }
}

impl UpdateIndexer for SecondaryIndexManager {
    fn index(&self, update: &PartitionUpdate, position: CommitLogPosition, group: &Group) {
        if let Ok(indexes) = self.indexes.read() {
            for index in indexes.iter() {
                index.index_update(update, position, group);
            }
        }
    }
}
