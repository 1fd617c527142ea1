//! # Flush Pipeline
//!
//! Converts one frozen memtable into sorted files on disk, one file per
//! data-directory shard, and drives the "mark commit log clean up to X"
//! handoff.
//!
//! ## Algorithm
//!
//! 1. Under the switch monitor: read the current memtable; if
//!    [`Memtable::should_switch`] declines the trigger reason, return the
//!    previous flush's future ("wait for flushes").
//! 2. Allocate one write barrier. For the base table *and every attached
//!    index table*: create a fresh memtable sharing a [`PositionBound`]
//!    with the old one, swap that table's tracker, and hand the old
//!    memtable a clone of the barrier.
//! 3. Advance every shared bound to the commit log head (forward-only),
//!    then issue the barrier once.
//! 4. The flush task marks the barrier blocking, awaits it, and for each
//!    frozen memtable splits the content by shard ranges and writes one
//!    sorted file per non-empty shard on the flush-IO pool. Every sealed
//!    file — base and index alike — lands in a *single* lifecycle
//!    transaction; only after its commit does each tracker publish its
//!    files via [`Tracker::replace_flushed`]. Memtables are reclaimed
//!    behind a *read* barrier so in-flight readers finish first.
//! 5. The post-flush task runs on a single-thread lane, strictly in
//!    submission order: it waits for its flush, then tells the commit log
//!    to discard `[initial, final]`. Because the lane is ordered,
//!    completion of any flush future implies completion of every earlier
//!    one.
//!
//! ## Failure policy
//!
//! A failed flush leaves the memtable in the flushing slot (retry is
//! possible), aborts its lifecycle transaction (new files deleted), and
//! rethrows from the post-flush future. The commit log is never advanced
//! for a failed flush.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::commitlog::{CommitLog, CommitLogPosition};
use crate::data::{DataRange, PartitionerRef, TableId, Token};
use crate::executor::{ExecutorError, SerialExecutor, TaskFuture, WorkerPool};
use crate::lifecycle::{LifecycleTransaction, OperationType};
use crate::memtable::{Memtable, PositionBound};
use crate::oporder::OpOrder;
use crate::sstable::{Descriptor, SSTableFormat, SSTableReader, SSTableWriter, StatsMetadata};
use crate::tracker::Tracker;

// ------------------------------------------------------------------------------------------------
// Flush reasons
// ------------------------------------------------------------------------------------------------

/// Why a flush was requested. The trigger carries no behavioral weight
/// beyond [`Memtable::should_switch`]; it exists for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The commit log wants its dirty segments released.
    CommitLogDirty,
    /// The memtable reached its size threshold.
    MemtableLimit,
    /// The periodic flush interval elapsed.
    MemtablePeriodExpired,
    /// A secondary index build is starting.
    IndexBuildStarted,
    /// A secondary index build finished.
    IndexBuildCompleted,
    /// A secondary index was dropped.
    IndexRemoved,
    /// An index table is being flushed alongside its base table.
    IndexTableFlush,
    /// A view build is starting.
    ViewBuildStarted,
    /// The engine decided to flush on its own.
    InternallyForced,
    /// An operator asked for a flush.
    UserForced,
    /// Table startup.
    Startup,
    /// Table or process shutdown.
    Shutdown,
    /// A snapshot wants memtable content on disk first.
    Snapshot,
    /// Truncation is discarding the memtable.
    Truncate,
    /// The table is being dropped.
    Drop,
    /// Outgoing streaming needs sealed files.
    Streaming,
    /// Incoming streams completed.
    StreamsReceived,
    /// Repair wants a consistent on-disk state.
    Repair,
    /// A schema change is being applied.
    SchemaChange,
    /// Test hook.
    UnitTests,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by flush futures.
///
/// Payloads are strings so the error can travel through shared
/// [`TaskFuture`]s to every waiter.
#[derive(Debug, Error, Clone)]
pub enum FlushError {
    /// A worker pool rejected part of the flush.
    #[error("flush rejected: {0}")]
    Rejected(#[from] ExecutorError),

    /// Memtable state machine violation.
    #[error("Memtable error: {0}")]
    Memtable(String),

    /// Sorted-file write failure.
    #[error("Sorted file error: {0}")]
    SSTable(String),

    /// Lifecycle transaction failure.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Tracker transition failure.
    #[error("Tracker error: {0}")]
    Tracker(String),

    /// Barrier failure.
    #[error("Ordering error: {0}")]
    Ordering(String),

    /// Commit log failure during the post-flush discard.
    #[error("Commit log error: {0}")]
    CommitLog(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Shared handle on one flush's eventual outcome: the final commit-log
/// position the flush made durable.
pub type FlushFuture = TaskFuture<Result<CommitLogPosition, FlushError>>;

// ------------------------------------------------------------------------------------------------
// Disk boundaries
// ------------------------------------------------------------------------------------------------

/// Token split of the local ownership across data directories.
#[derive(Debug, Clone)]
pub struct DiskBoundaries {
    /// One entry per data directory.
    pub directories: Vec<PathBuf>,

    /// Interior boundary tokens (`directories.len() - 1` of them) in
    /// ascending order; empty when splitting is unsupported.
    pub boundaries: Vec<Token>,

    /// Ring version this split was computed against.
    pub version: u64,
}

impl DiskBoundaries {
    /// The shard ranges, one per directory. With no boundaries everything
    /// lands on the first directory.
    pub fn shard_ranges(&self) -> Vec<(PathBuf, DataRange)> {
        use crate::data::TokenBound;

        if self.boundaries.is_empty() {
            return vec![(self.directories[0].clone(), DataRange::full())];
        }

        let mut shards = Vec::with_capacity(self.directories.len());
        for (slot, dir) in self.directories.iter().enumerate() {
            let start = if slot == 0 {
                TokenBound::Unbounded
            } else {
                TokenBound::Inclusive(self.boundaries[slot - 1])
            };
            let end = if slot == self.directories.len() - 1 {
                TokenBound::Unbounded
            } else {
                TokenBound::Exclusive(self.boundaries[slot])
            };
            shards.push((dir.clone(), DataRange { start, end }));
        }
        shards
    }

    /// Directory owning `token`.
    pub fn directory_for(&self, token: Token) -> &PathBuf {
        let slot = self.boundaries.partition_point(|b| *b <= token);
        &self.directories[slot.min(self.directories.len() - 1)]
    }
}

/// Caches the shard split and recomputes it when the ring changes.
#[derive(Debug)]
pub struct DiskBoundaryManager {
    partitioner: PartitionerRef,
    directories: Vec<PathBuf>,
    cached: Mutex<Arc<DiskBoundaries>>,
    ring_version: AtomicU64,
}

impl DiskBoundaryManager {
    /// Compute the initial split.
    pub fn new(partitioner: PartitionerRef, directories: Vec<PathBuf>) -> Self {
        let directories = if directories.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            directories
        };
        let initial = Arc::new(Self::compute(&partitioner, &directories, 0));
        Self {
            partitioner,
            directories,
            cached: Mutex::new(initial),
            ring_version: AtomicU64::new(0),
        }
    }

    fn compute(
        partitioner: &PartitionerRef,
        directories: &[PathBuf],
        version: u64,
    ) -> DiskBoundaries {
        DiskBoundaries {
            directories: directories.to_vec(),
            boundaries: partitioner.split_evenly(directories.len()),
            version,
        }
    }

    /// The current (cached) split.
    pub fn boundaries(&self) -> Arc<DiskBoundaries> {
        match self.cached.lock() {
            Ok(cached) => Arc::clone(&cached),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Recompute after a ring change.
    pub fn invalidate(&self) {
        let version = self.ring_version.fetch_add(1, Ordering::AcqRel) + 1;
        let fresh = Arc::new(Self::compute(&self.partitioner, &self.directories, version));
        if let Ok(mut cached) = self.cached.lock() {
            *cached = fresh;
        }
        debug!(version, "disk boundaries recomputed");
    }
}

// ------------------------------------------------------------------------------------------------
// Replay floor
// ------------------------------------------------------------------------------------------------

const REPLAY_FLOOR_FILENAME: &str = "flushed.meta";

/// The persisted commit-log position below which everything is known to
/// be in sorted files; startup replay begins above it.
pub fn read_replay_floor(dir: &std::path::Path) -> Option<CommitLogPosition> {
    let bytes = std::fs::read(dir.join(REPLAY_FLOOR_FILENAME)).ok()?;
    if bytes.len() < 4 {
        return None;
    }
    let (payload, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    if hasher.finalize().to_le_bytes() != crc_bytes {
        warn!(dir = %dir.display(), "replay floor failed its checksum, ignoring");
        return None;
    }
    crate::encoding::decode_from_slice::<CommitLogPosition>(payload)
        .ok()
        .map(|(position, _)| position)
}

/// Advance the persisted replay floor; never moves backwards.
fn write_replay_floor(dir: &std::path::Path, position: CommitLogPosition) {
    let floor = read_replay_floor(dir)
        .map_or(position, |existing| existing.max(position));
    let Ok(mut payload) = crate::encoding::encode_to_vec(&floor) else {
        return;
    };
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    payload.extend_from_slice(&hasher.finalize().to_le_bytes());

    let tmp = dir.join(format!("{REPLAY_FLOOR_FILENAME}.tmp"));
    let written = std::fs::write(&tmp, &payload)
        .and_then(|()| std::fs::rename(&tmp, dir.join(REPLAY_FLOOR_FILENAME)));
    if let Err(e) = written {
        warn!(dir = %dir.display(), error = %e, "failed to persist replay floor");
    }
}

// ------------------------------------------------------------------------------------------------
// Attached index tables
// ------------------------------------------------------------------------------------------------

/// An index table attached to a base table.
///
/// Index memtables are populated inside the base write's operation group,
/// so a flush freezes base and index state under one barrier: the
/// coordinator swaps each target's tracker alongside the base table's and
/// seals every produced file in the same lifecycle transaction.
#[derive(Debug, Clone)]
pub struct IndexFlushTarget {
    /// The index table's id.
    pub table_id: TableId,

    /// Partitioner (index tables share the base table's).
    pub partitioner: PartitionerRef,

    /// The index table's tracker.
    pub tracker: Arc<Tracker>,

    /// Directory the index table's files live in.
    pub dir: PathBuf,

    /// Size threshold for the replacement memtable.
    pub memtable_size_limit: usize,
}

/// One table's slice of a flush: its frozen memtable, its tracker, and
/// the shard ranges its files are written under.
struct FlushParticipant {
    memtable: Arc<Memtable>,
    tracker: Arc<Tracker>,
    shards: Vec<(PathBuf, DataRange)>,
}

// ------------------------------------------------------------------------------------------------
// Coordinator
// ------------------------------------------------------------------------------------------------

struct FlushShared {
    table_id: TableId,
    partitioner: PartitionerRef,
    tracker: Arc<Tracker>,
    commit_log: Arc<dyn CommitLog>,
    write_order: OpOrder,
    read_order: OpOrder,
    boundaries: Arc<DiskBoundaryManager>,
    generation: Arc<AtomicU64>,
    memtable_size_limit: usize,
    format: SSTableFormat,
    disk_pool: Arc<WorkerPool>,
    reclaim_pool: Arc<WorkerPool>,
}

/// Owns the flush machinery of one table.
pub struct FlushCoordinator {
    shared: Arc<FlushShared>,

    /// Serializes memtable switches.
    monitor: Mutex<()>,

    /// The most recent flush future, served to "wait for flushes" callers.
    last_flush: Mutex<Option<FlushFuture>>,

    flush_pool: WorkerPool,
    post_flush: SerialExecutor,
}

impl fmt::Debug for FlushCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushCoordinator")
            .field("table", &self.shared.table_id)
            .finish_non_exhaustive()
    }
}

impl FlushCoordinator {
    /// Build the coordinator and its pools.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table_id: TableId,
        partitioner: PartitionerRef,
        tracker: Arc<Tracker>,
        commit_log: Arc<dyn CommitLog>,
        write_order: OpOrder,
        read_order: OpOrder,
        boundaries: Arc<DiskBoundaryManager>,
        generation: Arc<AtomicU64>,
        memtable_size_limit: usize,
        flush_writers: usize,
    ) -> Self {
        let shared = Arc::new(FlushShared {
            table_id,
            partitioner,
            tracker,
            commit_log,
            write_order,
            read_order,
            boundaries,
            generation,
            memtable_size_limit,
            format: SSTableFormat::Big,
            disk_pool: Arc::new(WorkerPool::new(
                format!("flush-io-{table_id}"),
                flush_writers.max(1),
                64,
            )),
            reclaim_pool: Arc::new(WorkerPool::new(format!("reclaim-{table_id}"), 1, 16)),
        });
        Self {
            shared,
            monitor: Mutex::new(()),
            last_flush: Mutex::new(None),
            flush_pool: WorkerPool::new(format!("flush-{table_id}"), 1, 16),
            post_flush: SerialExecutor::new(format!("post-flush-{table_id}")),
        }
    }

    /// The write order writers must join for puts.
    pub fn write_order(&self) -> &OpOrder {
        &self.shared.write_order
    }

    /// The read order readers join so memtable reclaim can wait for them.
    pub fn read_order(&self) -> &OpOrder {
        &self.shared.read_order
    }

    /// A fresh memtable for this table, starting at `lower`.
    pub fn new_memtable(&self, lower: Arc<PositionBound>) -> Arc<Memtable> {
        Arc::new(Memtable::new(
            self.shared.table_id,
            Arc::clone(&self.shared.partitioner),
            self.shared.memtable_size_limit,
            lower,
        ))
    }

    /// True when enough memtables are backed up that writers should wait
    /// for a flush before growing memory further.
    pub fn backlogged(&self, max_pending: usize) -> bool {
        self.shared.tracker.view().flushing.len() >= max_pending.max(1)
    }

    /// The most recent flush future, if any flush ever ran.
    pub fn last_flush(&self) -> Option<FlushFuture> {
        self.last_flush.lock().ok().and_then(|last| last.clone())
    }

    /// Request a flush for `reason`, freezing the base memtable and every
    /// attached index table's memtable under one barrier.
    ///
    /// Returns a future completing with the final commit-log position the
    /// flush made durable. When the current memtable declines the reason,
    /// the returned future tracks the *previous* flush instead, so waiting
    /// on it still yields "all earlier flushes done".
    pub fn flush(
        &self,
        reason: FlushReason,
        indexes: &[IndexFlushTarget],
    ) -> Result<FlushFuture, FlushError> {
        let _monitor = self
            .monitor
            .lock()
            .map_err(|_| FlushError::Internal("flush monitor poisoned".into()))?;

        let view = self.shared.tracker.view();
        let current = Arc::clone(&view.current);

        if !current.should_switch(reason) {
            debug!(table = %self.shared.table_id, %reason, "flush declined, waiting for prior flushes");
            let waiter = self
                .last_flush
                .lock()
                .map_err(|_| FlushError::Internal("flush monitor poisoned".into()))?
                .clone()
                .unwrap_or_else(|| TaskFuture::ready(Ok(current.initial_log_position())));
            return Ok(waiter);
        }

        info!(
            table = %self.shared.table_id,
            %reason,
            indexes = indexes.len(),
            "flushing memtable"
        );

        // One barrier for the base table and every index table: clones
        // share the epoch set, so a single issue + await freezes them all.
        let barrier = self.shared.write_order.new_barrier();

        // Fresh memtable sharing one bound with the old one: the old
        // memtable's final position is the new one's initial position.
        let bound = Arc::new(PositionBound::new(CommitLogPosition::NONE));
        let new = self.new_memtable(Arc::clone(&bound));

        let old = self
            .shared
            .tracker
            .switch_memtable(false, new)
            .map_err(|e| FlushError::Tracker(e.to_string()))?;
        old.switch_out(barrier.clone(), Arc::clone(&bound))
            .map_err(|e| FlushError::Memtable(e.to_string()))?;

        let mut participants = vec![FlushParticipant {
            memtable: Arc::clone(&old),
            tracker: Arc::clone(&self.shared.tracker),
            shards: self.shared.boundaries.boundaries().shard_ranges(),
        }];
        let mut bounds = vec![bound];

        for target in indexes {
            let index_bound = Arc::new(PositionBound::new(CommitLogPosition::NONE));
            let fresh = Arc::new(Memtable::new(
                target.table_id,
                Arc::clone(&target.partitioner),
                target.memtable_size_limit,
                Arc::clone(&index_bound),
            ));
            let index_old = target
                .tracker
                .switch_memtable(false, fresh)
                .map_err(|e| FlushError::Tracker(e.to_string()))?;
            index_old
                .switch_out(barrier.clone(), Arc::clone(&index_bound))
                .map_err(|e| FlushError::Memtable(e.to_string()))?;
            participants.push(FlushParticipant {
                memtable: index_old,
                tracker: Arc::clone(&target.tracker),
                shards: vec![(target.dir.clone(), DataRange::full())],
            });
            bounds.push(index_bound);
        }

        // Forward-only: a racing put can push a bound higher, never
        // lower.
        let head = self.shared.commit_log.current_position();
        for bound in &bounds {
            bound.advance_to(head);
        }
        barrier
            .issue()
            .map_err(|e| FlushError::Ordering(e.to_string()))?;

        let shared = Arc::clone(&self.shared);
        let flush_future = self
            .flush_pool
            .try_submit(move || run_flush(&shared, &participants))?;

        let post_shared = Arc::clone(&self.shared);
        let post_old = Arc::clone(&old);
        let future = self.post_flush.try_submit(move || {
            let outcome = flush_future.wait().map_err(FlushError::from)?;
            let final_position = outcome?;
            let initial = post_old.initial_log_position();
            post_shared
                .commit_log
                .discard_completed_segments(post_shared.table_id, initial, final_position)
                .map_err(|e| FlushError::CommitLog(e.to_string()))?;
            write_replay_floor(
                &post_shared.boundaries.boundaries().directories[0],
                final_position,
            );
            debug!(
                table = %post_shared.table_id,
                %initial,
                %final_position,
                "post-flush published commit log bounds"
            );
            Ok(final_position)
        })?;

        if let Ok(mut last) = self.last_flush.lock() {
            *last = Some(future.clone());
        }
        Ok(future)
    }

    /// Shut the pipeline down, draining queued work.
    pub fn shutdown(&mut self) {
        self.flush_pool.shutdown();
        self.post_flush.shutdown();
    }
}

// ------------------------------------------------------------------------------------------------
// Flush task
// ------------------------------------------------------------------------------------------------

/// The flush runnable: one barrier drain, per-shard writes for every
/// participant, one lifecycle seal across all of them, per-tracker
/// publish, memtable reclaim.
fn run_flush(
    shared: &Arc<FlushShared>,
    participants: &[FlushParticipant],
) -> Result<CommitLogPosition, FlushError> {
    let base = participants
        .first()
        .ok_or_else(|| FlushError::Internal("flush with no participants".into()))?;

    // Drain in-flight writers; ask them to respect soft limits meanwhile.
    // The base memtable's barrier is the same barrier every index
    // memtable holds, so one await covers them all.
    let barrier = base
        .memtable
        .write_barrier()
        .ok_or_else(|| FlushError::Internal("flushing memtable has no barrier".into()))?;
    barrier.mark_blocking();
    barrier
        .await_completion()
        .map_err(|e| FlushError::Ordering(e.to_string()))?;

    for participant in participants {
        participant
            .tracker
            .mark_flushing(&participant.memtable)
            .map_err(|e| FlushError::Tracker(e.to_string()))?;
    }

    let final_position = base.memtable.final_log_position();

    // One write task per non-empty shard of every participant, in
    // parallel on the IO pool. Clean memtables (a forced switch wrote
    // nothing) simply contribute no shards.
    let mut pending: Vec<(usize, TaskFuture<Result<(Descriptor, StatsMetadata), FlushError>>)> =
        Vec::new();
    for (slot, participant) in participants.iter().enumerate() {
        if participant.memtable.is_clean() {
            continue;
        }
        for (dir, range) in &participant.shards {
            let collection = participant
                .memtable
                .flush_set(range)
                .map_err(|e| FlushError::Memtable(e.to_string()))?;
            if collection.is_empty() {
                continue;
            }
            let generation = shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
            let descriptor = Descriptor::new(dir.clone(), generation, shared.format);
            let max_data_age = participant.memtable.creation_time_millis();
            pending.push((
                slot,
                shared.disk_pool.try_submit(move || {
                    let mut writer = SSTableWriter::create(descriptor)
                        .map_err(|e| FlushError::SSTable(e.to_string()))?;
                    writer.set_max_data_age(max_data_age);
                    for (_, update) in &collection.partitions {
                        writer
                            .append(update)
                            .map_err(|e| FlushError::SSTable(e.to_string()))?;
                    }
                    writer
                        .finish()
                        .map_err(|e| FlushError::SSTable(e.to_string()))
                })?,
            ));
        }
    }

    let mut sealed: Vec<Vec<(Descriptor, StatsMetadata)>> =
        (0..participants.len()).map(|_| Vec::new()).collect();
    let mut first_error: Option<FlushError> = None;
    for (slot, write) in pending {
        match write.wait().map_err(FlushError::from).and_then(|r| r) {
            Ok(result) => sealed[slot].push(result),
            Err(error) => first_error = first_error.or(Some(error)),
        }
    }
    if let Some(error) = first_error {
        // Clean up the shards that did seal; every memtable stays in its
        // flushing slot for a retry.
        for (descriptor, _) in sealed.into_iter().flatten() {
            if let Err(e) = descriptor.delete_all() {
                warn!(file = %descriptor, error = %e, "failed to clean partial flush output");
            }
        }
        return Err(error);
    }

    // Seal the swap through one lifecycle transaction covering every
    // shard of every participant, then publish per tracker. Base and
    // index files become durable together or not at all.
    let produced: usize = sealed.iter().map(Vec::len).sum();
    if produced > 0 {
        let txn_dir = shared.boundaries.boundaries().directories[0].clone();
        let txn_id = sealed
            .iter()
            .flatten()
            .next()
            .map(|(d, _)| d.generation)
            .unwrap_or_else(|| shared.generation.load(Ordering::Acquire));
        let mut txn = LifecycleTransaction::new(OperationType::Flush, txn_dir, txn_id);
        for (descriptor, _) in sealed.iter().flatten() {
            txn.track_new(descriptor.clone())
                .map_err(|e| FlushError::Lifecycle(e.to_string()))?;
        }
        txn.prepare_to_commit()
            .map_err(|e| FlushError::Lifecycle(e.to_string()))?;
        txn.commit()
            .map_err(|e| FlushError::Lifecycle(e.to_string()))?;
    }

    let mut generations = Vec::with_capacity(produced);
    for (participant, sealed) in participants.iter().zip(sealed) {
        let mut readers = Vec::with_capacity(sealed.len());
        for (descriptor, _) in sealed {
            readers.push(
                SSTableReader::open(descriptor)
                    .map_err(|e| FlushError::SSTable(e.to_string()))?,
            );
        }
        generations.extend(readers.iter().map(|r| r.generation()));
        participant
            .tracker
            .replace_flushed(&participant.memtable, readers)
            .map_err(|e| FlushError::Tracker(e.to_string()))?;
        reclaim(shared, &participant.memtable);
    }

    info!(
        table = %shared.table_id,
        files = ?generations,
        %final_position,
        "memtable flushed"
    );
    Ok(final_position)
}

/// Return the memtable's memory once in-flight readers are done.
fn reclaim(shared: &Arc<FlushShared>, memtable: &Arc<Memtable>) {
    let read_barrier = shared.read_order.new_barrier();
    if let Err(e) = read_barrier.issue() {
        warn!(error = %e, "failed to issue read barrier, discarding inline");
        let _ = memtable.discard();
        return;
    }
    let memtable = Arc::clone(memtable);
    let submitted = shared.reclaim_pool.try_submit(move || {
        if let Err(e) = read_barrier.await_completion() {
            warn!(error = %e, "read barrier wait failed during reclaim");
        }
        if let Err(e) = memtable.discard() {
            warn!(error = %e, "memtable discard failed");
        }
    });
    if let Err(e) = submitted {
        warn!(error = %e, "reclaim pool rejected discard task");
    }
}
