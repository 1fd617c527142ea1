//! # Memtable Module
//!
//! Sorted in-memory buffer of pending partition updates for one table.
//!
//! ## Design Invariants
//!
//! - Every put happens inside an operation-order [`Group`]; the flush
//!   pipeline's barrier guarantees all puts visible to a switch have
//!   completed before the memtable's content is read for flushing.
//! - `final_log_position() ≥` the commit-log position of every mutation the
//!   memtable holds: puts advance the position ceiling themselves, and the
//!   switch advances the shared upper bound with a only-forward update.
//! - `initial_log_position() ≤ final_log_position()`.
//! - Lifecycle runs strictly `active → switched-out → flushing → discarded`;
//!   puts are rejected from `flushing` on.
//!
//! ## Flush Semantics
//!
//! [`Memtable::flush_set`] slices the frozen content by token range so the
//! flush pipeline can write one sorted file per data-directory shard.
//! Partitions empty in the requested range yield nothing. Slicing never
//! mutates in-memory state; the memtable stays readable until discarded.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, trace};

use crate::commitlog::CommitLogPosition;
use crate::data::{DataRange, DecoratedKey, PartitionUpdate, PartitionerRef, TableId};
use crate::data::update::MergeOutcome;
use crate::flush::FlushReason;
use crate::oporder::{Barrier, Group};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by memtable operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Operation not legal in the memtable's current lifecycle state.
    #[error("illegal memtable state: expected {expected}, was {actual}")]
    IllegalState {
        /// State the operation requires.
        expected: &'static str,
        /// State the memtable was in.
        actual: &'static str,
    },

    /// The update targets a different table.
    #[error("update for table {got} applied to memtable of table {expected}")]
    TableMismatch {
        /// Table the memtable belongs to.
        expected: TableId,
        /// Table the update was built for.
        got: TableId,
    },

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Shared position bound
// ------------------------------------------------------------------------------------------------

/// A commit-log position that can only move forward.
///
/// One bound is shared between a switched-out memtable (as its upper bound)
/// and its successor (as the lower bound), which is what makes consecutive
/// memtables contiguous in the log.
#[derive(Debug)]
pub struct PositionBound {
    position: Mutex<CommitLogPosition>,
}

impl PositionBound {
    /// A bound starting at `position`.
    pub fn new(position: CommitLogPosition) -> Self {
        Self {
            position: Mutex::new(position),
        }
    }

    /// Current value.
    pub fn get(&self) -> CommitLogPosition {
        self.position
            .lock()
            .map(|p| *p)
            .unwrap_or(CommitLogPosition::NONE)
    }

    /// Advance to `candidate` if it is ahead; never moves backwards.
    pub fn advance_to(&self, candidate: CommitLogPosition) {
        if let Ok(mut position) = self.position.lock()
            && candidate > *position
        {
            *position = candidate;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Secondary index plug point
// ------------------------------------------------------------------------------------------------

/// Write-path hook for secondary index maintenance.
///
/// Called inside the put's operation [`Group`], with the mutation's commit
/// log position, so an index that maintains its own memtable can apply the
/// derived update under the same group. The switch barrier then covers base
/// and index writes together.
pub trait UpdateIndexer: Send + Sync {
    /// Observe one applied update.
    fn index(&self, update: &PartitionUpdate, position: CommitLogPosition, group: &Group);
}

/// Indexer used by tables with no secondary indexes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndexer;

impl UpdateIndexer for NoopIndexer {
    fn index(&self, _update: &PartitionUpdate, _position: CommitLogPosition, _group: &Group) {}
}

// ------------------------------------------------------------------------------------------------
// Lifecycle
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Active,
    SwitchedOut,
    Flushing,
    Discarded,
}

impl LifecycleState {
    fn name(self) -> &'static str {
        match self {
            LifecycleState::Active => "active",
            LifecycleState::SwitchedOut => "switched-out",
            LifecycleState::Flushing => "flushing",
            LifecycleState::Discarded => "discarded",
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Outcome of a put
// ------------------------------------------------------------------------------------------------

/// What one put changed, for size accounting and the write-interval
/// histogram.
#[derive(Debug, Clone, Copy)]
pub struct PutOutcome {
    /// Approximate growth of the memtable, in bytes.
    pub bytes_delta: usize,

    /// Smallest timestamp distance between an incoming cell and the prior
    /// cell it replaced, `u64::MAX` when there was no prior. Callers clamp
    /// this to the histogram's largest bucket.
    pub timestamp_delta_micros: u64,
}

// ------------------------------------------------------------------------------------------------
// Memtable core
// ------------------------------------------------------------------------------------------------

struct MemtableInner {
    partitions: BTreeMap<DecoratedKey, PartitionUpdate>,
}

/// The in-memory write buffer of one table.
pub struct Memtable {
    table_id: TableId,
    partitioner: PartitionerRef,

    inner: RwLock<MemtableInner>,
    state: Mutex<LifecycleState>,

    /// Approximate heap footprint of buffered updates.
    approximate_size: AtomicUsize,

    /// Size threshold consulted by `should_switch(MemtableLimit)`.
    size_limit: usize,

    /// Lower bound: the shared bound latched when this memtable became
    /// current. Everything this memtable holds is above it.
    lower_bound: Arc<PositionBound>,

    /// Upper bound shared with the successor; installed at switch-out.
    upper_bound: Mutex<Option<Arc<PositionBound>>>,

    /// Highest commit-log position any put into this memtable has observed.
    observed_ceiling: PositionBound,

    /// Barrier handed over at switch-out; the flush awaits it before
    /// reading content.
    write_barrier: Mutex<Option<Barrier>>,

    /// Smallest write timestamp buffered, for compaction's purge floor.
    min_timestamp: AtomicI64,

    /// True once any put mutated state.
    dirty: AtomicBool,

    /// True when any buffered update is CDC-tagged.
    cdc_dirty: AtomicBool,

    /// Wall-clock milliseconds at creation; becomes the flushed files'
    /// `max_data_age`.
    creation_time_millis: u64,
}

impl fmt::Debug for Memtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memtable")
            .field("table_id", &self.table_id)
            .field("size", &self.approximate_size.load(Ordering::Relaxed))
            .field("dirty", &self.dirty.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Memtable {
    /// Create an active memtable whose content begins at `lower_bound`.
    pub fn new(
        table_id: TableId,
        partitioner: PartitionerRef,
        size_limit: usize,
        lower_bound: Arc<PositionBound>,
    ) -> Self {
        debug!(%table_id, size_limit, "memtable created");
        Self {
            table_id,
            partitioner,
            inner: RwLock::new(MemtableInner {
                partitions: BTreeMap::new(),
            }),
            state: Mutex::new(LifecycleState::Active),
            approximate_size: AtomicUsize::new(0),
            size_limit,
            lower_bound,
            upper_bound: Mutex::new(None),
            observed_ceiling: PositionBound::new(CommitLogPosition::NONE),
            write_barrier: Mutex::new(None),
            min_timestamp: AtomicI64::new(i64::MAX),
            dirty: AtomicBool::new(false),
            cdc_dirty: AtomicBool::new(false),
            creation_time_millis: now_millis(),
        }
    }

    /// The table this memtable buffers writes for.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// The table's partitioner.
    pub fn partitioner(&self) -> &PartitionerRef {
        &self.partitioner
    }

    /// Insert or merge a partition update.
    ///
    /// Must be called inside an active operation [`Group`]; the group
    /// witnesses the put for the switch barrier. `position` is the commit
    /// log position of the mutation carrying this update.
    pub fn put(
        &self,
        update: PartitionUpdate,
        position: CommitLogPosition,
        indexer: &dyn UpdateIndexer,
        group: &Group,
    ) -> Result<PutOutcome, MemtableError> {
        if update.table_id != self.table_id {
            return Err(MemtableError::TableMismatch {
                expected: self.table_id,
                got: update.table_id,
            });
        }
        match self.state()? {
            // Old-epoch writers may still land here right after a switch;
            // the barrier makes the flush wait for them.
            LifecycleState::Active | LifecycleState::SwitchedOut => {}
            actual => {
                return Err(MemtableError::IllegalState {
                    expected: "active",
                    actual: actual.name(),
                });
            }
        }

        if update.cdc {
            self.cdc_dirty.store(true, Ordering::Release);
        }
        self.min_timestamp
            .fetch_min(update.min_timestamp(), Ordering::AcqRel);

        // Index maintenance runs under the caller's group, before the
        // update is merged, so index memtables see the same barrier.
        indexer.index(&update, position, group);

        let outcome = {
            let mut inner = self
                .inner
                .write()
                .map_err(|_| MemtableError::Internal("memtable lock poisoned".into()))?;

            match inner.partitions.get_mut(&update.key) {
                None => {
                    let bytes = update.data_size();
                    inner.partitions.insert(update.key.clone(), update);
                    MergeOutcome {
                        bytes_delta: bytes,
                        timestamp_delta_micros: u64::MAX,
                    }
                }
                Some(existing) => existing.merge(update),
            }
        };

        self.dirty.store(true, Ordering::Release);
        self.approximate_size
            .fetch_add(outcome.bytes_delta, Ordering::AcqRel);

        // The put itself keeps the final-position invariant honest: a
        // writer that allocated its position after the switch read the
        // log head still pushes the ceiling up.
        self.observed_ceiling.advance_to(position);
        if let Ok(upper) = self.upper_bound.lock()
            && let Some(bound) = upper.as_ref()
        {
            bound.advance_to(position);
        }

        trace!(
            table = %self.table_id,
            bytes = outcome.bytes_delta,
            %position,
            "partition update applied"
        );

        Ok(PutOutcome {
            bytes_delta: outcome.bytes_delta,
            timestamp_delta_micros: outcome.timestamp_delta_micros,
        })
    }

    /// True iff no put has mutated state.
    pub fn is_clean(&self) -> bool {
        !self.dirty.load(Ordering::Acquire)
    }

    /// True when any buffered update is CDC-tagged.
    pub fn cdc_dirty(&self) -> bool {
        self.cdc_dirty.load(Ordering::Acquire)
    }

    /// Approximate heap footprint of buffered updates.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size.load(Ordering::Acquire)
    }

    /// Number of buffered partitions.
    pub fn partition_count(&self) -> usize {
        self.inner.read().map(|i| i.partitions.len()).unwrap_or(0)
    }

    /// Wall-clock milliseconds when this memtable became current.
    pub fn creation_time_millis(&self) -> u64 {
        self.creation_time_millis
    }

    /// Smallest write timestamp buffered; `i64::MAX` when clean. Bounds
    /// what compaction may purge while this memtable is live.
    pub fn min_timestamp(&self) -> i64 {
        self.min_timestamp.load(Ordering::Acquire)
    }

    /// Whether a flush triggered for `reason` should actually switch this
    /// memtable out.
    ///
    /// Lifecycle reasons (truncate, drop, shutdown) always switch. All
    /// other reasons are no-ops on a clean memtable, and the memory-limit
    /// trigger additionally requires the buffer to have reached its
    /// threshold.
    pub fn should_switch(&self, reason: FlushReason) -> bool {
        match reason {
            FlushReason::Truncate | FlushReason::Drop | FlushReason::Shutdown => true,
            FlushReason::MemtableLimit => {
                !self.is_clean() && self.approximate_size() >= self.size_limit
            }
            _ => !self.is_clean(),
        }
    }

    /// Freeze the memtable: record the barrier witnessing in-flight puts
    /// and install the shared upper bound.
    pub fn switch_out(
        &self,
        barrier: Barrier,
        upper_bound: Arc<PositionBound>,
    ) -> Result<(), MemtableError> {
        self.transition(LifecycleState::Active, LifecycleState::SwitchedOut)?;
        *self
            .write_barrier
            .lock()
            .map_err(|_| MemtableError::Internal("barrier lock poisoned".into()))? = Some(barrier);
        *self
            .upper_bound
            .lock()
            .map_err(|_| MemtableError::Internal("bound lock poisoned".into()))? =
            Some(upper_bound);
        debug!(table = %self.table_id, "memtable switched out");
        Ok(())
    }

    /// Enter the flushing state. Puts are illegal from here on.
    pub fn mark_flushing(&self) -> Result<(), MemtableError> {
        self.transition(LifecycleState::SwitchedOut, LifecycleState::Flushing)
    }

    /// The barrier installed at switch-out: the witness that every put
    /// visible to the switch has completed. All clones are one barrier, so
    /// a flush covering several memtables awaits it once.
    pub fn write_barrier(&self) -> Option<Barrier> {
        self.write_barrier.lock().ok().and_then(|b| b.clone())
    }

    /// Lower bound: position at or below which nothing in this memtable
    /// was written.
    pub fn initial_log_position(&self) -> CommitLogPosition {
        self.lower_bound.get()
    }

    /// Final position, valid once the switch barrier has completed: the
    /// maximum of the shared upper bound and every position observed by a
    /// put.
    pub fn final_log_position(&self) -> CommitLogPosition {
        let bound = self
            .upper_bound
            .lock()
            .ok()
            .and_then(|u| u.as_ref().map(|b| b.get()))
            .unwrap_or(CommitLogPosition::NONE);
        bound.max(self.observed_ceiling.get())
    }

    /// Snapshot the partitions intersecting `range`, in key order.
    ///
    /// The snapshot owns its data: readers are unaffected by later puts
    /// (which only merge into other partitions or produce newer clones on
    /// the next snapshot).
    pub fn partition_iterator(
        &self,
        range: &DataRange,
    ) -> Result<MemtablePartitionIterator, MemtableError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("memtable lock poisoned".into()))?;

        let partitions: Vec<(DecoratedKey, PartitionUpdate)> = inner
            .partitions
            .iter()
            .filter(|(key, update)| range.contains(key) && !update.is_empty())
            .map(|(key, update)| (key.clone(), update.clone()))
            .collect();

        Ok(MemtablePartitionIterator {
            partitions: partitions.into_iter(),
        })
    }

    /// Point lookup of a single partition.
    pub fn get(&self, key: &DecoratedKey) -> Result<Option<PartitionUpdate>, MemtableError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("memtable lock poisoned".into()))?;
        Ok(inner.partitions.get(key).cloned())
    }

    /// Content slice handed to the flush pipeline: every non-empty
    /// partition whose token falls in `range`.
    pub fn flush_set(&self, range: &DataRange) -> Result<FlushCollection, MemtableError> {
        match self.state()? {
            LifecycleState::SwitchedOut | LifecycleState::Flushing => {}
            actual => {
                return Err(MemtableError::IllegalState {
                    expected: "switched-out",
                    actual: actual.name(),
                });
            }
        }

        let inner = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("memtable lock poisoned".into()))?;

        let partitions: Vec<(DecoratedKey, PartitionUpdate)> = inner
            .partitions
            .iter()
            .filter(|(key, update)| range.contains(key) && !update.is_empty())
            .map(|(key, update)| (key.clone(), update.clone()))
            .collect();

        Ok(FlushCollection {
            range: *range,
            partitions,
        })
    }

    /// Final lifecycle step: return memory. Content becomes unreadable.
    pub fn discard(&self) -> Result<(), MemtableError> {
        self.transition(LifecycleState::Flushing, LifecycleState::Discarded)?;
        if let Ok(mut inner) = self.inner.write() {
            inner.partitions.clear();
        }
        self.approximate_size.store(0, Ordering::Release);
        debug!(table = %self.table_id, "memtable discarded");
        Ok(())
    }

    fn state(&self) -> Result<LifecycleState, MemtableError> {
        self.state
            .lock()
            .map(|s| *s)
            .map_err(|_| MemtableError::Internal("state lock poisoned".into()))
    }

    fn transition(
        &self,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), MemtableError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| MemtableError::Internal("state lock poisoned".into()))?;
        if *state != from {
            return Err(MemtableError::IllegalState {
                expected: from.name(),
                actual: state.name(),
            });
        }
        *state = to;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Iterators and flush collections
// ------------------------------------------------------------------------------------------------

/// Owning iterator over a memtable content snapshot, in key order.
///
/// Lazy at the consumption level: single iteration consumes it; take a new
/// snapshot for a new scan.
#[derive(Debug)]
pub struct MemtablePartitionIterator {
    partitions: std::vec::IntoIter<(DecoratedKey, PartitionUpdate)>,
}

impl Iterator for MemtablePartitionIterator {
    type Item = (DecoratedKey, PartitionUpdate);

    fn next(&mut self) -> Option<Self::Item> {
        self.partitions.next()
    }
}

/// Per-shard content slice produced by [`Memtable::flush_set`].
#[derive(Debug)]
pub struct FlushCollection {
    /// Token range this slice covers.
    pub range: DataRange,

    /// Non-empty partitions in key order.
    pub partitions: Vec<(DecoratedKey, PartitionUpdate)>,
}

impl FlushCollection {
    /// True when the shard has nothing to write.
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
