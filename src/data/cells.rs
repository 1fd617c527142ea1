//! Cells, rows, and deletion markers.
//!
//! A cell is the smallest reconcilable unit: one column value (or column
//! tombstone) with a timestamp. Rows aggregate cells under a clustering and
//! may carry a whole-row deletion. Reconciliation is last-write-wins by
//! timestamp, with a tombstone beating a value at equal timestamps.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::data::clustering::Clustering;

/// Identifier of a column within a table's schema.
pub type ColumnId = u32;

/// Sentinel local-deletion-time meaning "live".
pub const NO_DELETION_TIME: u32 = u32::MAX;

// ------------------------------------------------------------------------------------------------
// DeletionTime
// ------------------------------------------------------------------------------------------------

/// A deletion marker: everything with a timestamp at or below
/// `marked_for_delete_at` is deleted.
///
/// `local_deletion_time` is the wall-clock second the deletion was issued;
/// it gates tombstone garbage collection against `gc_grace_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionTime {
    /// Deletion timestamp in microseconds; values at or below are shadowed.
    pub marked_for_delete_at: i64,

    /// Wall-clock second the deletion happened locally.
    pub local_deletion_time: u32,
}

impl DeletionTime {
    /// The "nothing deleted" marker.
    pub const LIVE: DeletionTime = DeletionTime {
        marked_for_delete_at: i64::MIN,
        local_deletion_time: NO_DELETION_TIME,
    };

    /// Create a deletion at the given timestamp and wall-clock second.
    pub fn new(marked_for_delete_at: i64, local_deletion_time: u32) -> Self {
        Self {
            marked_for_delete_at,
            local_deletion_time,
        }
    }

    /// True when this marker deletes nothing.
    pub fn is_live(&self) -> bool {
        *self == Self::LIVE
    }

    /// True when a write with `timestamp` is shadowed by this marker.
    pub fn deletes_timestamp(&self, timestamp: i64) -> bool {
        timestamp <= self.marked_for_delete_at
    }

    /// True when this marker supersedes `other` during merge.
    pub fn supersedes(&self, other: &DeletionTime) -> bool {
        self.marked_for_delete_at > other.marked_for_delete_at
            || (self.marked_for_delete_at == other.marked_for_delete_at
                && self.local_deletion_time > other.local_deletion_time)
    }

    /// The stronger of two markers.
    pub fn max(self, other: DeletionTime) -> DeletionTime {
        if other.supersedes(&self) { other } else { self }
    }
}

// ------------------------------------------------------------------------------------------------
// Cell
// ------------------------------------------------------------------------------------------------

/// A single column value or column tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Write timestamp in microseconds.
    pub timestamp: i64,

    /// Wall-clock second this cell dies: [`NO_DELETION_TIME`] for live
    /// cells, the deletion second for tombstones, the expiry second for
    /// TTL'd cells.
    pub local_deletion_time: u32,

    /// Column value; `None` marks a tombstone.
    pub value: Option<Vec<u8>>,
}

impl Cell {
    /// A live cell.
    pub fn live(timestamp: i64, value: Vec<u8>) -> Self {
        Self {
            timestamp,
            local_deletion_time: NO_DELETION_TIME,
            value: Some(value),
        }
    }

    /// A column tombstone issued at the given wall-clock second.
    pub fn tombstone(timestamp: i64, local_deletion_time: u32) -> Self {
        Self {
            timestamp,
            local_deletion_time,
            value: None,
        }
    }

    /// True when this cell is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// True when this cell is visible at `now_seconds` (not a tombstone and
    /// not expired).
    pub fn is_live_at(&self, now_seconds: u32) -> bool {
        !self.is_tombstone()
            && (self.local_deletion_time == NO_DELETION_TIME
                || self.local_deletion_time > now_seconds)
    }

    /// Pick the winner between two cells for the same (clustering, column).
    ///
    /// Higher timestamp wins. At equal timestamps a tombstone beats a value;
    /// between two values, byte order breaks the tie deterministically.
    pub fn reconcile<'a>(a: &'a Cell, b: &'a Cell) -> &'a Cell {
        match a.timestamp.cmp(&b.timestamp) {
            Ordering::Greater => a,
            Ordering::Less => b,
            Ordering::Equal => match (a.is_tombstone(), b.is_tombstone()) {
                (true, false) => a,
                (false, true) => b,
                _ => {
                    if a.value >= b.value {
                        a
                    } else {
                        b
                    }
                }
            },
        }
    }

    /// Approximate heap footprint.
    pub fn data_size(&self) -> usize {
        16 + self.value.as_ref().map_or(0, Vec::len)
    }
}

// ------------------------------------------------------------------------------------------------
// Row
// ------------------------------------------------------------------------------------------------

/// A clustered row: a clustering, an optional row deletion, and its cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Clustering of this row (kind `Row` or `StaticRow`).
    pub clustering: Clustering,

    /// Whole-row deletion marker.
    pub deletion: DeletionTime,

    /// Cells keyed by column.
    pub cells: BTreeMap<ColumnId, Cell>,
}

impl Row {
    /// An empty live row at the given clustering.
    pub fn new(clustering: Clustering) -> Self {
        Self {
            clustering,
            deletion: DeletionTime::LIVE,
            cells: BTreeMap::new(),
        }
    }

    /// Insert or replace a cell.
    pub fn with_cell(mut self, column: ColumnId, cell: Cell) -> Self {
        self.cells.insert(column, cell);
        self
    }

    /// Merge `other` into `self`, reconciling overlapping cells.
    ///
    /// Returns the smallest absolute timestamp distance observed between an
    /// incoming cell and the cell it reconciled against, or `u64::MAX` when
    /// no incoming cell had a prior. The flush histogram clamps this.
    pub fn merge(&mut self, other: Row) -> u64 {
        self.deletion = self.deletion.max(other.deletion);

        let mut min_delta = u64::MAX;
        for (column, incoming) in other.cells {
            match self.cells.get_mut(&column) {
                None => {
                    self.cells.insert(column, incoming);
                }
                Some(existing) => {
                    let delta = existing.timestamp.abs_diff(incoming.timestamp);
                    min_delta = min_delta.min(delta);
                    if Cell::reconcile(existing, &incoming) == &incoming {
                        *existing = incoming;
                    }
                }
            }
        }
        min_delta
    }

    /// Drop cells shadowed by `deletion` (the effective deletion covering
    /// this row) and tombstone or expired cells, returning `None` when
    /// nothing visible remains.
    pub fn purge_visible(&self, deletion: &DeletionTime, now_seconds: u32) -> Option<Row> {
        let effective = self.deletion.max(*deletion);

        let cells: BTreeMap<ColumnId, Cell> = self
            .cells
            .iter()
            .filter(|(_, cell)| {
                cell.is_live_at(now_seconds) && !effective.deletes_timestamp(cell.timestamp)
            })
            .map(|(column, cell)| (*column, cell.clone()))
            .collect();

        if cells.is_empty() {
            return None;
        }

        Some(Row {
            clustering: self.clustering.clone(),
            deletion: DeletionTime::LIVE,
            cells,
        })
    }

    /// Smallest cell timestamp in the row, ignoring the row deletion.
    pub fn min_timestamp(&self) -> Option<i64> {
        self.cells.values().map(|c| c.timestamp).min()
    }

    /// Largest timestamp carried by the row or its deletion.
    pub fn max_timestamp(&self) -> Option<i64> {
        let cell_max = self.cells.values().map(|c| c.timestamp).max();
        if self.deletion.is_live() {
            cell_max
        } else {
            Some(cell_max.map_or(self.deletion.marked_for_delete_at, |t| {
                t.max(self.deletion.marked_for_delete_at)
            }))
        }
    }

    /// True when the row has no cells and no deletion.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.deletion.is_live()
    }

    /// Approximate heap footprint.
    pub fn data_size(&self) -> usize {
        self.clustering.data_size()
            + 16
            + self
                .cells
                .values()
                .map(|c| c.data_size() + 8)
                .sum::<usize>()
    }
}
