//! Partition updates and mutations: the write-path aggregates.
//!
//! A [`PartitionUpdate`] is everything one write says about one partition of
//! one table: rows, range deletions, and an optional partition deletion. A
//! [`Mutation`] bundles the updates of one logical write across tables that
//! share the partition key.

use std::collections::BTreeMap;

use crate::data::cells::{DeletionTime, Row};
use crate::data::clustering::Clustering;
use crate::data::{DataError, DecoratedKey, TableId};

// ------------------------------------------------------------------------------------------------
// Range tombstones
// ------------------------------------------------------------------------------------------------

/// A range deletion covering the clusterings between two bounds.
///
/// Containment uses the unified clustering order: `start <= c <= end` holds
/// exactly when `c` falls inside the deleted range, because bound kinds
/// position themselves on the correct side of equal-valued rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstone {
    /// Opening bound (a start kind).
    pub start: Clustering,

    /// Closing bound (an end kind).
    pub end: Clustering,

    /// Deletion marker applied to covered clusterings.
    pub deletion: DeletionTime,
}

impl RangeTombstone {
    /// Create a range tombstone from two bounds.
    pub fn new(start: Clustering, end: Clustering, deletion: DeletionTime) -> Self {
        debug_assert!(start.kind.is_start());
        debug_assert!(end.kind.is_end());
        Self {
            start,
            end,
            deletion,
        }
    }

    /// True when `clustering` lies inside this tombstone's range.
    pub fn covers(&self, clustering: &Clustering) -> bool {
        self.start <= *clustering && *clustering <= self.end
    }

    /// Approximate heap footprint.
    pub fn data_size(&self) -> usize {
        self.start.data_size() + self.end.data_size() + 16
    }
}

// ------------------------------------------------------------------------------------------------
// Partition updates
// ------------------------------------------------------------------------------------------------

/// Outcome of merging one update into partition state.
#[derive(Debug, Clone, Copy)]
pub struct MergeOutcome {
    /// Growth of the partition's approximate footprint, in bytes.
    pub bytes_delta: usize,

    /// Smallest timestamp distance between an incoming cell and the prior
    /// cell it reconciled against; `u64::MAX` when no cell had a prior.
    pub timestamp_delta_micros: u64,
}

/// All changes one write makes to a single partition of a single table.
///
/// Updates only grow: merging is add-or-reconcile, never removal. Tombstones
/// are data here; they are only dropped by compaction, under the garbage
/// collection rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionUpdate {
    /// Table this update applies to.
    pub table_id: TableId,

    /// Partition being updated.
    pub key: DecoratedKey,

    /// Partition-level deletion, shadowing everything at or below its
    /// timestamp.
    pub partition_deletion: DeletionTime,

    /// The static row, if the update touches static columns.
    pub static_row: Option<Row>,

    /// Range deletions, kept sorted by start bound.
    pub range_tombstones: Vec<RangeTombstone>,

    /// Regular rows keyed by clustering.
    pub rows: BTreeMap<Clustering, Row>,

    /// Tagged when this update must be retained for change-data-capture.
    pub cdc: bool,
}

impl PartitionUpdate {
    /// An empty update for the given partition.
    pub fn new(table_id: TableId, key: DecoratedKey) -> Self {
        Self {
            table_id,
            key,
            partition_deletion: DeletionTime::LIVE,
            static_row: None,
            range_tombstones: Vec::new(),
            rows: BTreeMap::new(),
            cdc: false,
        }
    }

    /// Add or merge a row; builder-style.
    pub fn with_row(mut self, row: Row) -> Self {
        self.insert_row(row);
        self
    }

    /// Tag the update for CDC retention; builder-style.
    pub fn with_cdc(mut self) -> Self {
        self.cdc = true;
        self
    }

    /// Add or merge a row.
    pub fn insert_row(&mut self, row: Row) {
        if row.clustering.is_static() {
            match &mut self.static_row {
                None => self.static_row = Some(row),
                Some(existing) => {
                    existing.merge(row);
                }
            }
            return;
        }
        match self.rows.get_mut(&row.clustering) {
            None => {
                self.rows.insert(row.clustering.clone(), row);
            }
            Some(existing) => {
                existing.merge(row);
            }
        }
    }

    /// Add a range deletion, keeping the list sorted by start bound.
    pub fn add_range_tombstone(&mut self, tombstone: RangeTombstone) {
        let at = self
            .range_tombstones
            .partition_point(|t| t.start <= tombstone.start);
        self.range_tombstones.insert(at, tombstone);
    }

    /// Apply a partition-level deletion.
    pub fn delete_partition(&mut self, deletion: DeletionTime) {
        self.partition_deletion = self.partition_deletion.max(deletion);
    }

    /// Merge `other` into `self`. Commutative for cells at distinct
    /// (clustering, column) coordinates.
    pub fn merge(&mut self, other: PartitionUpdate) -> MergeOutcome {
        debug_assert_eq!(self.key, other.key);

        let before = self.data_size();
        let mut min_delta = u64::MAX;

        self.partition_deletion = self.partition_deletion.max(other.partition_deletion);
        self.cdc |= other.cdc;

        if let Some(incoming_static) = other.static_row {
            match &mut self.static_row {
                None => self.static_row = Some(incoming_static),
                Some(existing) => {
                    min_delta = min_delta.min(existing.merge(incoming_static));
                }
            }
        }

        for tombstone in other.range_tombstones {
            self.add_range_tombstone(tombstone);
        }

        for (clustering, row) in other.rows {
            match self.rows.get_mut(&clustering) {
                None => {
                    self.rows.insert(clustering, row);
                }
                Some(existing) => {
                    min_delta = min_delta.min(existing.merge(row));
                }
            }
        }

        MergeOutcome {
            bytes_delta: self.data_size().saturating_sub(before),
            timestamp_delta_micros: min_delta,
        }
    }

    /// The strongest deletion covering `clustering`: partition deletion
    /// combined with every covering range tombstone.
    pub fn deletion_for(&self, clustering: &Clustering) -> DeletionTime {
        let mut deletion = self.partition_deletion;
        for tombstone in &self.range_tombstones {
            if tombstone.covers(clustering) {
                deletion = deletion.max(tombstone.deletion);
            }
        }
        deletion
    }

    /// Rows visible at `now_seconds` after applying every deletion, with
    /// shadowed and dead cells stripped. The static row, when visible,
    /// comes first.
    pub fn live_rows(&self, now_seconds: u32) -> Vec<Row> {
        let mut out = Vec::new();
        if let Some(static_row) = &self.static_row
            && let Some(live) = static_row.purge_visible(&self.partition_deletion, now_seconds)
        {
            out.push(live);
        }
        for row in self.rows.values() {
            let deletion = self.deletion_for(&row.clustering);
            if let Some(live) = row.purge_visible(&deletion, now_seconds) {
                out.push(live);
            }
        }
        out
    }

    /// True when the update carries no rows and no deletions.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
            && self.static_row.is_none()
            && self.range_tombstones.is_empty()
            && self.partition_deletion.is_live()
    }

    /// Smallest timestamp present in the update.
    pub fn min_timestamp(&self) -> i64 {
        let mut min = i64::MAX;
        if !self.partition_deletion.is_live() {
            min = min.min(self.partition_deletion.marked_for_delete_at);
        }
        for tombstone in &self.range_tombstones {
            min = min.min(tombstone.deletion.marked_for_delete_at);
        }
        for row in self.static_row.iter().chain(self.rows.values()) {
            if let Some(t) = row.min_timestamp() {
                min = min.min(t);
            }
            if !row.deletion.is_live() {
                min = min.min(row.deletion.marked_for_delete_at);
            }
        }
        min
    }

    /// Largest timestamp present in the update.
    pub fn max_timestamp(&self) -> i64 {
        let mut max = i64::MIN;
        if !self.partition_deletion.is_live() {
            max = max.max(self.partition_deletion.marked_for_delete_at);
        }
        for tombstone in &self.range_tombstones {
            max = max.max(tombstone.deletion.marked_for_delete_at);
        }
        for row in self.static_row.iter().chain(self.rows.values()) {
            if let Some(t) = row.max_timestamp() {
                max = max.max(t);
            }
        }
        max
    }

    /// Smallest local deletion time across all tombstones, or
    /// `u32::MAX` when the update carries none. Drives tombstone GC
    /// eligibility in compaction.
    pub fn min_local_deletion_time(&self) -> u32 {
        let mut min = u32::MAX;
        if !self.partition_deletion.is_live() {
            min = min.min(self.partition_deletion.local_deletion_time);
        }
        for tombstone in &self.range_tombstones {
            min = min.min(tombstone.deletion.local_deletion_time);
        }
        for row in self.static_row.iter().chain(self.rows.values()) {
            if !row.deletion.is_live() {
                min = min.min(row.deletion.local_deletion_time);
            }
            for cell in row.cells.values() {
                if cell.is_tombstone() {
                    min = min.min(cell.local_deletion_time);
                }
            }
        }
        min
    }

    /// Number of tombstones of any kind in the update.
    pub fn tombstone_count(&self) -> u64 {
        let mut count = self.range_tombstones.len() as u64;
        if !self.partition_deletion.is_live() {
            count += 1;
        }
        for row in self.static_row.iter().chain(self.rows.values()) {
            if !row.deletion.is_live() {
                count += 1;
            }
            count += row.cells.values().filter(|c| c.is_tombstone()).count() as u64;
        }
        count
    }

    /// Approximate heap footprint, used for memtable accounting.
    pub fn data_size(&self) -> usize {
        let mut size = self.key.key.len() + 32;
        size += self
            .range_tombstones
            .iter()
            .map(RangeTombstone::data_size)
            .sum::<usize>();
        size += self
            .static_row
            .iter()
            .chain(self.rows.values())
            .map(Row::data_size)
            .sum::<usize>();
        size
    }
}

// ------------------------------------------------------------------------------------------------
// Mutations
// ------------------------------------------------------------------------------------------------

/// One logical write: updates for one partition key across one or more
/// tables of a keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Keyspace all updates belong to.
    pub keyspace: String,

    /// Shared partition key.
    pub key: DecoratedKey,

    /// At most one update per table.
    pub updates: BTreeMap<TableId, PartitionUpdate>,
}

impl Mutation {
    /// An empty mutation for the given partition.
    pub fn new(keyspace: impl Into<String>, key: DecoratedKey) -> Self {
        Self {
            keyspace: keyspace.into(),
            key,
            updates: BTreeMap::new(),
        }
    }

    /// Add an update, enforcing the shared-key and one-per-table invariants.
    pub fn add(&mut self, update: PartitionUpdate) -> Result<(), DataError> {
        if update.key != self.key {
            return Err(DataError::KeyMismatch);
        }
        if self.updates.contains_key(&update.table_id) {
            return Err(DataError::DuplicateTableUpdate(update.table_id));
        }
        self.updates.insert(update.table_id, update);
        Ok(())
    }

    /// Builder-style [`Mutation::add`].
    pub fn with(mut self, update: PartitionUpdate) -> Result<Self, DataError> {
        self.add(update)?;
        Ok(self)
    }

    /// The update for one table, if present.
    pub fn update_for(&self, table_id: TableId) -> Option<&PartitionUpdate> {
        self.updates.get(&table_id)
    }

    /// True when any contained update is CDC-tagged.
    pub fn has_cdc(&self) -> bool {
        self.updates.values().any(|u| u.cdc)
    }

    /// Approximate serialized footprint.
    pub fn data_size(&self) -> usize {
        self.keyspace.len()
            + self.key.key.len()
            + self
                .updates
                .values()
                .map(PartitionUpdate::data_size)
                .sum::<usize>()
    }
}
