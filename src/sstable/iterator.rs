//! Streaming scanner over a sorted file's partitions.
//!
//! The scanner walks a contiguous slice of the primary index and decodes
//! one partition block per step; only the block being read is materialized.
//! It owns an [`SSTableRef`], so the underlying bytes survive obsoletion
//! until the scan finishes.

use crate::data::{DecoratedKey, PartitionUpdate};

use super::{SSTableError, SSTableRef};

/// Iterator over `(key, partition)` pairs in key order.
pub struct SSTableScanner {
    guard: SSTableRef,
    positions: std::ops::Range<usize>,
}

impl SSTableScanner {
    pub(crate) fn new(guard: SSTableRef, positions: std::ops::Range<usize>) -> Self {
        Self { guard, positions }
    }

    /// Number of partitions remaining.
    pub fn remaining(&self) -> usize {
        self.positions.len()
    }
}

impl std::fmt::Debug for SSTableScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableScanner")
            .field("guard", &self.guard)
            .field("remaining", &self.positions.len())
            .finish()
    }
}

impl Iterator for SSTableScanner {
    type Item = Result<(DecoratedKey, PartitionUpdate), SSTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.positions.next()?;
        let reader = self.guard.reader();
        let entry = reader.index_entry(slot)?;
        match reader.read_partition(entry) {
            Ok(update) => {
                let key = update.key.clone();
                Some(Ok((key, update)))
            }
            Err(e) => {
                // Poison the scan: a damaged block ends iteration after
                // the error is delivered.
                self.positions = 0..0;
                Some(Err(e))
            }
        }
    }
}
