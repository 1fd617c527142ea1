//! # Read Path
//!
//! Builds a merging view over every storage source a table has (current
//! memtable, flushing memtables, selected sorted files), reconciles
//! overlapping partitions, applies filters, limits, and the row cache, and
//! enforces the command deadline.
//!
//! ## Shape
//!
//! Every source implements [`UnfilteredPartitionIterator`]: a stream of
//! `(key, partition)` pairs in key order. [`MergedPartitionIterator`]
//! k-way-merges them, combining same-key partitions with the data model's
//! reconcile rules. [`ReadExecutor`] drives the merge, consults the row
//! cache per partition, converts reconciled partitions to visible rows,
//! and applies [`DataLimits`] *after* reconciliation so limits can never
//! hide a live row behind deleted ones.
//!
//! ## Error containment
//!
//! Sorted-file scanners own mmapped regions through their reference
//! guards. When any source fails, every sibling source is closed before
//! the error propagates, and the closed sources are recorded on the error.
//!
//! ## Cancellation
//!
//! A command may carry a deadline; the merge checks it on every advance
//! and fails with a timeout error, closing all sources.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::time::Instant;

use thiserror::Error;
use tracing::trace;

use crate::cache::CacheService;
use crate::data::cells::Row;
use crate::data::{
    ClusteringFilter, ColumnFilter, DataLimits, DataRange, DecoratedKey, PartitionUpdate, TableId,
};
use crate::encoding;
use crate::memtable::{MemtableError, MemtablePartitionIterator};
use crate::sstable::{SSTableError, SSTableScanner};
use crate::tracker::View;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the read path.
#[derive(Debug, Error)]
pub enum ReadError {
    /// A memtable source failed.
    #[error("Memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// A sorted-file source failed; every sibling source was closed first.
    #[error("Sorted file error: {source} (closed: {closed:?})")]
    SSTable {
        /// The failing source's error.
        source: SSTableError,
        /// Names of the sibling sources closed before propagation.
        closed: Vec<String>,
    },

    /// The command deadline passed mid-read.
    #[error("read timed out: {0}")]
    Timeout(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Read commands
// ------------------------------------------------------------------------------------------------

/// What a read addresses: one partition or a token range.
#[derive(Debug, Clone)]
pub enum ReadSelection {
    /// Single-partition read.
    Point(DecoratedKey),

    /// Partition-range read.
    Range(DataRange),
}

/// A fully-specified read.
#[derive(Debug, Clone)]
pub struct ReadCommand {
    /// Table to read.
    pub table_id: TableId,

    /// Partition selection.
    pub selection: ReadSelection,

    /// Row restriction within each partition.
    pub clustering_filter: ClusteringFilter,

    /// Column restriction within each row.
    pub column_filter: ColumnFilter,

    /// Result limits, applied after reconciliation.
    pub limits: DataLimits,

    /// Read time in wall-clock seconds; decides TTL visibility.
    pub now_seconds: u32,

    /// When set, the response carries a digest of the result instead of
    /// being consumed row-by-row by the caller.
    pub digest: bool,

    /// Optional deadline checked on every merge advance.
    pub deadline: Option<Instant>,
}

impl ReadCommand {
    /// Unrestricted point read.
    pub fn point(table_id: TableId, key: DecoratedKey, now_seconds: u32) -> Self {
        Self {
            table_id,
            selection: ReadSelection::Point(key),
            clustering_filter: ClusteringFilter::All,
            column_filter: ColumnFilter::All,
            limits: DataLimits::NONE,
            now_seconds,
            digest: false,
            deadline: None,
        }
    }

    /// Unrestricted range read.
    pub fn range(table_id: TableId, range: DataRange, now_seconds: u32) -> Self {
        Self {
            table_id,
            selection: ReadSelection::Range(range),
            clustering_filter: ClusteringFilter::All,
            column_filter: ColumnFilter::All,
            limits: DataLimits::NONE,
            now_seconds,
            digest: false,
            deadline: None,
        }
    }

    fn check_deadline(&self) -> Result<(), ReadError> {
        if let Some(deadline) = self.deadline
            && Instant::now() > deadline
        {
            return Err(ReadError::Timeout(format!(
                "table {} exceeded its read deadline",
                self.table_id
            )));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Results
// ------------------------------------------------------------------------------------------------

/// One partition of a read result: visible rows only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredPartition {
    /// Partition key.
    pub key: DecoratedKey,

    /// Rows surviving deletions, filters, and TTL, in clustering order.
    pub rows: Vec<Row>,
}

/// A complete read result.
#[derive(Debug, Clone)]
pub struct ReadResponse {
    /// Result partitions in key order.
    pub partitions: Vec<FilteredPartition>,

    /// CRC digest of the result, present when the command asked for one.
    pub digest: Option<u32>,
}

impl ReadResponse {
    /// Total visible rows across all partitions.
    pub fn row_count(&self) -> usize {
        self.partitions.iter().map(|p| p.rows.len()).sum()
    }
}

// ------------------------------------------------------------------------------------------------
// Sources
// ------------------------------------------------------------------------------------------------

/// A sorted stream of reconcilable partitions from one storage source.
pub trait UnfilteredPartitionIterator: Send {
    /// The next partition, or `None` at the end.
    fn next_partition(&mut self) -> Result<Option<(DecoratedKey, PartitionUpdate)>, ReadError>;

    /// Name used in error containment reports.
    fn source_name(&self) -> String;
}

/// Memtable-backed source (snapshot; infallible after construction).
pub struct MemtableSource {
    iterator: MemtablePartitionIterator,
    name: String,
}

impl MemtableSource {
    /// Wrap a memtable snapshot.
    pub fn new(iterator: MemtablePartitionIterator, name: impl Into<String>) -> Self {
        Self {
            iterator,
            name: name.into(),
        }
    }
}

impl UnfilteredPartitionIterator for MemtableSource {
    fn next_partition(&mut self) -> Result<Option<(DecoratedKey, PartitionUpdate)>, ReadError> {
        Ok(self.iterator.next())
    }

    fn source_name(&self) -> String {
        self.name.clone()
    }
}

/// Sorted-file source; owns the file reference through the scanner.
pub struct SSTableSource {
    scanner: SSTableScanner,
    name: String,
}

impl SSTableSource {
    /// Wrap a file scanner.
    pub fn new(scanner: SSTableScanner, name: impl Into<String>) -> Self {
        Self {
            scanner,
            name: name.into(),
        }
    }
}

impl UnfilteredPartitionIterator for SSTableSource {
    fn next_partition(&mut self) -> Result<Option<(DecoratedKey, PartitionUpdate)>, ReadError> {
        match self.scanner.next() {
            None => Ok(None),
            Some(Ok(pair)) => Ok(Some(pair)),
            Some(Err(source)) => Err(ReadError::SSTable {
                source,
                closed: Vec::new(),
            }),
        }
    }

    fn source_name(&self) -> String {
        self.name.clone()
    }
}

// ------------------------------------------------------------------------------------------------
// Merge
// ------------------------------------------------------------------------------------------------

/// K-way merge over sources, reconciling same-key partitions.
pub struct MergedPartitionIterator {
    sources: Vec<Box<dyn UnfilteredPartitionIterator>>,
    heads: Vec<Option<(DecoratedKey, PartitionUpdate)>>,
}

impl MergedPartitionIterator {
    /// Prime every source. On a priming failure all sources are closed.
    pub fn new(
        mut sources: Vec<Box<dyn UnfilteredPartitionIterator>>,
    ) -> Result<Self, ReadError> {
        let mut heads = Vec::with_capacity(sources.len());
        for index in 0..sources.len() {
            match sources[index].next_partition() {
                Ok(head) => heads.push(head),
                Err(error) => {
                    return Err(Self::contain(error, &mut sources));
                }
            }
        }
        Ok(Self { sources, heads })
    }

    /// Attach the names of all closed siblings to a failing source's
    /// error, dropping the sources (which releases file references).
    fn contain(
        error: ReadError,
        sources: &mut Vec<Box<dyn UnfilteredPartitionIterator>>,
    ) -> ReadError {
        let closed: Vec<String> = sources.iter().map(|s| s.source_name()).collect();
        sources.clear();
        match error {
            ReadError::SSTable { source, .. } => ReadError::SSTable { source, closed },
            other => other,
        }
    }

    /// The smallest key among the source heads, if any source has data.
    pub fn peek_key(&self) -> Option<&DecoratedKey> {
        self.heads
            .iter()
            .flatten()
            .map(|(key, _)| key)
            .min()
    }

    fn refill(&mut self, index: usize) -> Result<(), ReadError> {
        match self.sources[index].next_partition() {
            Ok(head) => {
                self.heads[index] = head;
                Ok(())
            }
            Err(error) => {
                self.heads.clear();
                Err(Self::contain(error, &mut self.sources))
            }
        }
    }

    /// Merge and return the next partition across all sources.
    pub fn next_merged(
        &mut self,
    ) -> Result<Option<(DecoratedKey, PartitionUpdate)>, ReadError> {
        let Some(min_key) = self.peek_key().cloned() else {
            return Ok(None);
        };

        let mut merged: Option<PartitionUpdate> = None;
        for index in 0..self.heads.len() {
            let matches = self
                .heads
                .get(index)
                .and_then(|h| h.as_ref())
                .is_some_and(|(key, _)| *key == min_key);
            if !matches {
                continue;
            }
            let (_, update) = self.heads[index]
                .take()
                .ok_or_else(|| ReadError::Internal("merge head vanished".into()))?;
            match &mut merged {
                None => merged = Some(update),
                Some(accumulated) => {
                    accumulated.merge(update);
                }
            }
            self.refill(index)?;
        }

        let merged = merged
            .ok_or_else(|| ReadError::Internal("merge produced no partition".into()))?;
        Ok(Some((min_key, merged)))
    }

    /// Drop every head carrying the current minimum key without merging
    /// (row-cache hit: the cached slice already answers the filter).
    pub fn skip_current(&mut self) -> Result<(), ReadError> {
        let Some(min_key) = self.peek_key().cloned() else {
            return Ok(());
        };
        for index in 0..self.heads.len() {
            let matches = self
                .heads
                .get(index)
                .and_then(|h| h.as_ref())
                .is_some_and(|(key, _)| *key == min_key);
            if matches {
                self.heads[index] = None;
                self.refill(index)?;
            }
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Row filtering
// ------------------------------------------------------------------------------------------------

fn filter_rows(rows: Vec<Row>, command: &ReadCommand) -> Vec<Row> {
    rows.into_iter()
        .filter(|row| command.clustering_filter.selects(&row.clustering))
        .filter_map(|mut row| {
            if !matches!(command.column_filter, ColumnFilter::All) {
                row.cells
                    .retain(|column, _| command.column_filter.selects(*column));
            }
            if row.cells.is_empty() {
                None
            } else {
                Some(row)
            }
        })
        .collect()
}

fn visible_rows(update: &PartitionUpdate, command: &ReadCommand) -> Vec<Row> {
    filter_rows(update.live_rows(command.now_seconds), command)
}

// ------------------------------------------------------------------------------------------------
// Executor
// ------------------------------------------------------------------------------------------------

/// Drives one read command against one captured view.
pub struct ReadExecutor;

impl ReadExecutor {
    /// Execute `command` against `view`, using `cache` for row-cache
    /// lookups and population.
    pub fn execute(
        view: &View,
        cache: &CacheService,
        command: &ReadCommand,
    ) -> Result<ReadResponse, ReadError> {
        let partitions = match &command.selection {
            ReadSelection::Point(key) => Self::execute_point(view, cache, command, key)?,
            ReadSelection::Range(range) => Self::execute_range(view, cache, command, range)?,
        };

        let digest = if command.digest {
            Some(digest_partitions(&partitions))
        } else {
            None
        };
        Ok(ReadResponse { partitions, digest })
    }

    fn execute_point(
        view: &View,
        cache: &CacheService,
        command: &ReadCommand,
        key: &DecoratedKey,
    ) -> Result<Vec<FilteredPartition>, ReadError> {
        command.check_deadline()?;

        if let Some(cached) = cache.lookup(command.table_id, key)
            && cached.covers(&command.clustering_filter, &command.limits)
        {
            let rows = filter_rows(cached.rows.clone(), command);
            return Ok(Self::single(key.clone(), rows, command));
        }

        // Per-source point gets, newest memtable last so merge order does
        // not matter (reconciliation is timestamp-driven).
        let mut merged: Option<PartitionUpdate> = None;
        for memtable in view.all_memtables() {
            if let Some(update) = memtable.get(key)? {
                match &mut merged {
                    None => merged = Some(update),
                    Some(accumulated) => {
                        accumulated.merge(update);
                    }
                }
            }
        }
        for reader in &view.live {
            command.check_deadline()?;
            if !reader.may_contain(key) {
                continue;
            }
            match reader.get(key) {
                Ok(Some(update)) => match &mut merged {
                    None => merged = Some(update),
                    Some(accumulated) => {
                        accumulated.merge(update);
                    }
                },
                Ok(None) => {}
                Err(source) => {
                    return Err(ReadError::SSTable {
                        source,
                        closed: Vec::new(),
                    });
                }
            }
        }

        let Some(update) = merged else {
            return Ok(Vec::new());
        };

        if cache.enabled() {
            cache.populate(command.table_id, key, &update, command.now_seconds);
        }

        let rows = visible_rows(&update, command);
        Ok(Self::single(key.clone(), rows, command))
    }

    fn single(
        key: DecoratedKey,
        rows: Vec<Row>,
        command: &ReadCommand,
    ) -> Vec<FilteredPartition> {
        if rows.is_empty() {
            return Vec::new();
        }
        let limited: Vec<Row> = rows.into_iter().take(command.limits.row_limit).collect();
        vec![FilteredPartition { key, rows: limited }]
    }

    fn execute_range(
        view: &View,
        cache: &CacheService,
        command: &ReadCommand,
        range: &DataRange,
    ) -> Result<Vec<FilteredPartition>, ReadError> {
        let mut sources: Vec<Box<dyn UnfilteredPartitionIterator>> = Vec::new();

        for (slot, memtable) in view.all_memtables().into_iter().enumerate() {
            let iterator = memtable.partition_iterator(range)?;
            sources.push(Box::new(MemtableSource::new(
                iterator,
                format!("memtable-{slot}"),
            )));
        }
        for reader in view.sstables_intersecting(range) {
            let name = reader.descriptor().to_string();
            match reader.scan(range) {
                Ok(scanner) => sources.push(Box::new(SSTableSource::new(scanner, name))),
                Err(source) => {
                    let closed: Vec<String> =
                        sources.iter().map(|s| s.source_name()).collect();
                    return Err(ReadError::SSTable { source, closed });
                }
            }
        }

        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let mut merge = MergedPartitionIterator::new(sources)?;
        let mut partitions = Vec::new();
        let mut rows_emitted = 0usize;

        while partitions.len() < command.limits.partition_limit
            && rows_emitted < command.limits.row_limit
        {
            command.check_deadline()?;

            let Some(next_key) = merge.peek_key().cloned() else {
                break;
            };

            // Cache-cover check: a covering cached head answers the
            // filter without touching the merge for this partition.
            if let Some(cached) = cache.lookup(command.table_id, &next_key)
                && cached.covers(&command.clustering_filter, &command.limits)
            {
                merge.skip_current()?;
                let rows = filter_rows(cached.rows.clone(), command);
                rows_emitted += Self::push_partition(
                    &mut partitions,
                    next_key,
                    rows,
                    command.limits.row_limit - rows_emitted,
                );
                continue;
            }

            let Some((key, update)) = merge.next_merged()? else {
                break;
            };
            let rows = visible_rows(&update, command);
            rows_emitted += Self::push_partition(
                &mut partitions,
                key,
                rows,
                command.limits.row_limit - rows_emitted,
            );
        }

        trace!(
            table = %command.table_id,
            partitions = partitions.len(),
            rows = rows_emitted,
            "range read complete"
        );
        Ok(partitions)
    }

    fn push_partition(
        partitions: &mut Vec<FilteredPartition>,
        key: DecoratedKey,
        rows: Vec<Row>,
        row_budget: usize,
    ) -> usize {
        if rows.is_empty() || row_budget == 0 {
            return 0;
        }
        let limited: Vec<Row> = rows.into_iter().take(row_budget).collect();
        let emitted = limited.len();
        partitions.push(FilteredPartition { key, rows: limited });
        emitted
    }
}

// ------------------------------------------------------------------------------------------------
// Digests
// ------------------------------------------------------------------------------------------------

/// CRC digest over a result set, for digest reads.
fn digest_partitions(partitions: &[FilteredPartition]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for partition in partitions {
        hasher.update(&partition.key.key);
        for row in &partition.rows {
            if let Ok(bytes) = encoding::encode_to_vec(row) {
                hasher.update(&bytes);
            }
        }
    }
    hasher.finalize()
}
