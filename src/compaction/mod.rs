//! # Compaction Module
//!
//! Background merging of sorted files into fewer, less-overlapping ones,
//! with tombstone garbage collection.
//!
//! ## Pieces
//!
//! - [`Strategy`] — closed enum of selection policies (size-tiered,
//!   leveled, time-window, unified) behind the [`CompactionStrategy`]
//!   trait. Policies only *choose* input sets; execution is shared.
//! - [`manager::CompactionManager`] — global worker pool, running-operation
//!   registry, pause switch, cooperative interruption.
//! - [`compact_files`] — the shared merge executor: k-way merge over input
//!   scanners, purge, rewrite through one lifecycle transaction, tracker
//!   swap.
//!
//! ## Tombstone garbage collection
//!
//! A tombstone is dropped from compaction output only when both hold:
//!
//! - its local deletion time is at least `gc_grace_seconds` old, and
//! - its timestamp is below the *purge floor*: the smallest timestamp any
//!   overlapping non-input source (live file or memtable) could still
//!   hold. Anything newer might shadow data that would resurrect without
//!   the tombstone.
//!
//! ## Failure policy
//!
//! A failed or interrupted merge aborts its lifecycle transaction (new
//! files deleted, inputs stay live), releases its compacting claim, and
//! reports the error; the strategy is free to select a different set next
//! round.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod leveled;
pub mod manager;
pub mod size_tiered;
pub mod time_window;
pub mod unified;

#[cfg(test)]
mod tests;

pub use leveled::LeveledStrategy;
pub use manager::{CompactionManager, CompactionPauser};
pub use size_tiered::SizeTieredStrategy;
pub use time_window::TimeWindowStrategy;
pub use unified::UnifiedStrategy;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, info};

use crate::data::cells::DeletionTime;
use crate::data::{DataRange, PartitionUpdate};
use crate::lifecycle::{LifecycleError, LifecycleTransaction, OperationType};
use crate::read::{MergedPartitionIterator, ReadError, SSTableSource, UnfilteredPartitionIterator};
use crate::sstable::{
    Descriptor, SSTableError, SSTableFormat, SSTableReader, SSTableWriter, UNREPAIRED,
};
use crate::tracker::{Tracker, TrackerError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by compaction execution.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// Sorted-file read or write failure.
    #[error("Sorted file error: {0}")]
    SSTable(#[from] SSTableError),

    /// Lifecycle transaction failure.
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Tracker transition failure.
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// Merge-iterator failure over the inputs.
    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    /// The operation observed its stop flag and backed out.
    #[error("compaction interrupted by {0:?}")]
    Interrupted(StopTrigger),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Cooperative interruption
// ------------------------------------------------------------------------------------------------

/// Why a running operation was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    /// Not stopped.
    None,
    /// Another compaction needs the inputs.
    Compaction,
    /// Cleanup wants the files.
    Cleanup,
    /// Truncation is invalidating the table.
    Truncate,
    /// Process shutdown.
    Shutdown,
    /// Test hook.
    UnitTests,
}

impl StopTrigger {
    fn as_u8(self) -> u8 {
        match self {
            StopTrigger::None => 0,
            StopTrigger::Compaction => 1,
            StopTrigger::Cleanup => 2,
            StopTrigger::Truncate => 3,
            StopTrigger::Shutdown => 4,
            StopTrigger::UnitTests => 5,
        }
    }

    fn from_u8(value: u8) -> StopTrigger {
        match value {
            1 => StopTrigger::Compaction,
            2 => StopTrigger::Cleanup,
            3 => StopTrigger::Truncate,
            4 => StopTrigger::Shutdown,
            5 => StopTrigger::UnitTests,
            _ => StopTrigger::None,
        }
    }
}

/// Per-operation stop flag, polled between merged partitions.
#[derive(Debug, Default)]
pub struct CompactionInterrupt {
    trigger: AtomicU8,
}

impl CompactionInterrupt {
    /// Fresh, un-triggered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. The first trigger wins.
    pub fn stop(&self, trigger: StopTrigger) {
        let _ = self.trigger.compare_exchange(
            StopTrigger::None.as_u8(),
            trigger.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// The trigger, if raised.
    pub fn triggered(&self) -> StopTrigger {
        StopTrigger::from_u8(self.trigger.load(Ordering::Acquire))
    }
}

// ------------------------------------------------------------------------------------------------
// Strategy contract
// ------------------------------------------------------------------------------------------------

/// Tunables shared by every strategy.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Minimum files in a bucket before it compacts. Never zero.
    pub min_threshold: usize,

    /// Maximum files merged at once. Never zero.
    pub max_threshold: usize,

    /// Size-tiered: lower bucket-size multiplier.
    pub bucket_low: f64,

    /// Size-tiered: upper bucket-size multiplier.
    pub bucket_high: f64,

    /// Size-tiered: files below this size share one bucket.
    pub min_sstable_size: u64,

    /// Leveled / unified: per-level size fanout.
    pub fanout: u64,

    /// Leveled / unified: target file size for level 1.
    pub target_sstable_size: u64,

    /// Time-window: window width in seconds.
    pub window_seconds: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_threshold: 4,
            max_threshold: 32,
            bucket_low: 0.5,
            bucket_high: 1.5,
            min_sstable_size: 50 * 1024 * 1024 / 1024, // 50 KiB for embedded scale
            fanout: 10,
            target_sstable_size: 160 * 1024 * 1024,
            window_seconds: 24 * 3600,
        }
    }
}

/// One selected unit of work.
#[derive(Debug)]
pub struct CompactionTask {
    /// Files to merge.
    pub inputs: Vec<Arc<SSTableReader>>,

    /// Operation flavor for the lifecycle log.
    pub op: OperationType,
}

/// Selection policy contract. Policies never touch disk; they rank the
/// live set and hand back input sets.
pub trait CompactionStrategy: Send {
    /// Pick the next input set, or `None` when nothing is worth doing.
    /// `live` excludes files already claimed by running compactions.
    fn select_compaction(
        &mut self,
        live: &[Arc<SSTableReader>],
        now_seconds: u32,
    ) -> Option<CompactionTask>;

    /// Observe a file entering the live set (flush or streaming).
    fn created_sstable(&mut self, reader: &Arc<SSTableReader>);

    /// Observe a completed replacement.
    fn replaced(&mut self, old: &[Arc<SSTableReader>], new: &[Arc<SSTableReader>]);

    /// True while the strategy refuses to select.
    fn disabled(&self) -> bool;

    /// Re-enable selection.
    fn enable(&mut self);

    /// Disable selection until [`CompactionStrategy::enable`].
    fn disable(&mut self);

    /// Temporarily pause selection (global pause plumbing).
    fn pause(&mut self);

    /// Undo [`CompactionStrategy::pause`].
    fn resume(&mut self);

    /// Files not yet organized into the strategy's steady state (L0 for
    /// leveled; everything-pending for the others).
    fn get_unleveled_sstables(&self) -> usize;

    /// Whether outputs may be opened for reads before the merge finishes.
    /// No current strategy supports it.
    fn supports_early_open(&self) -> bool {
        false
    }
}

// ------------------------------------------------------------------------------------------------
// Strategy enum — the closed set of policies
// ------------------------------------------------------------------------------------------------

/// Which strategy family a table uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Size-tiered buckets.
    SizeTiered,
    /// Levels with non-overlapping runs.
    Leveled,
    /// Time-bucketed windows for append-mostly data.
    TimeWindow,
    /// Scaled tiers unifying the tiered/leveled trade-off.
    Unified,
}

/// The closed set of strategies; adding a policy means extending this
/// enum.
#[derive(Debug)]
pub enum Strategy {
    /// Size-tiered.
    SizeTiered(SizeTieredStrategy),
    /// Leveled.
    Leveled(LeveledStrategy),
    /// Time-window.
    TimeWindow(TimeWindowStrategy),
    /// Unified.
    Unified(UnifiedStrategy),
}

impl Strategy {
    /// Build the strategy a table asked for.
    pub fn new(kind: StrategyKind, config: CompactionConfig) -> Self {
        match kind {
            StrategyKind::SizeTiered => Strategy::SizeTiered(SizeTieredStrategy::new(config)),
            StrategyKind::Leveled => Strategy::Leveled(LeveledStrategy::new(config)),
            StrategyKind::TimeWindow => Strategy::TimeWindow(TimeWindowStrategy::new(config)),
            StrategyKind::Unified => Strategy::Unified(UnifiedStrategy::new(config)),
        }
    }

    fn inner(&mut self) -> &mut dyn CompactionStrategy {
        match self {
            Strategy::SizeTiered(s) => s,
            Strategy::Leveled(s) => s,
            Strategy::TimeWindow(s) => s,
            Strategy::Unified(s) => s,
        }
    }

    fn inner_ref(&self) -> &dyn CompactionStrategy {
        match self {
            Strategy::SizeTiered(s) => s,
            Strategy::Leveled(s) => s,
            Strategy::TimeWindow(s) => s,
            Strategy::Unified(s) => s,
        }
    }
}

impl CompactionStrategy for Strategy {
    fn select_compaction(
        &mut self,
        live: &[Arc<SSTableReader>],
        now_seconds: u32,
    ) -> Option<CompactionTask> {
        self.inner().select_compaction(live, now_seconds)
    }

    fn created_sstable(&mut self, reader: &Arc<SSTableReader>) {
        self.inner().created_sstable(reader);
    }

    fn replaced(&mut self, old: &[Arc<SSTableReader>], new: &[Arc<SSTableReader>]) {
        self.inner().replaced(old, new);
    }

    fn disabled(&self) -> bool {
        self.inner_ref().disabled()
    }

    fn enable(&mut self) {
        self.inner().enable();
    }

    fn disable(&mut self) {
        self.inner().disable();
    }

    fn pause(&mut self) {
        self.inner().pause();
    }

    fn resume(&mut self) {
        self.inner().resume();
    }

    fn get_unleveled_sstables(&self) -> usize {
        self.inner_ref().get_unleveled_sstables()
    }

    fn supports_early_open(&self) -> bool {
        self.inner_ref().supports_early_open()
    }
}

/// On/off/paused switches shared by the concrete strategies.
#[derive(Debug, Default)]
pub(crate) struct StrategyGates {
    disabled: bool,
    paused: bool,
}

impl StrategyGates {
    pub(crate) fn selectable(&self) -> bool {
        !self.disabled && !self.paused
    }
}

// ------------------------------------------------------------------------------------------------
// Purge
// ------------------------------------------------------------------------------------------------

fn purgeable(deletion: &DeletionTime, gc_grace_seconds: u32, now_seconds: u32, floor: i64) -> bool {
    !deletion.is_live()
        && deletion
            .local_deletion_time
            .saturating_add(gc_grace_seconds)
            <= now_seconds
        && deletion.marked_for_delete_at < floor
}

/// Rewrite one merged partition for compaction output: drop data shadowed
/// by deletions, expire dead cells, and garbage-collect tombstones past
/// grace whose timestamps fall below the purge floor.
///
/// Returns `None` when nothing (data or live tombstone) remains.
pub fn purge_partition(
    update: &PartitionUpdate,
    gc_grace_seconds: u32,
    now_seconds: u32,
    purge_floor: i64,
) -> Option<PartitionUpdate> {
    let mut output = PartitionUpdate::new(update.table_id, update.key.clone());
    output.cdc = update.cdc;

    if !purgeable(
        &update.partition_deletion,
        gc_grace_seconds,
        now_seconds,
        purge_floor,
    ) {
        output.partition_deletion = update.partition_deletion;
    }

    for tombstone in &update.range_tombstones {
        if !purgeable(&tombstone.deletion, gc_grace_seconds, now_seconds, purge_floor) {
            output.range_tombstones.push(tombstone.clone());
        }
    }

    let rows = update
        .static_row
        .iter()
        .chain(update.rows.values());
    for row in rows {
        let covering = update.deletion_for(&row.clustering).max(row.deletion);
        let mut kept = crate::data::Row::new(row.clustering.clone());

        if !purgeable(&row.deletion, gc_grace_seconds, now_seconds, purge_floor) {
            kept.deletion = row.deletion;
        }

        for (column, cell) in &row.cells {
            if covering.deletes_timestamp(cell.timestamp) {
                // Shadowed by a deletion that is itself being kept or
                // purged; either way the cell is gone for good.
                continue;
            }
            if cell.is_tombstone() {
                let as_deletion = DeletionTime::new(cell.timestamp, cell.local_deletion_time);
                if purgeable(&as_deletion, gc_grace_seconds, now_seconds, purge_floor) {
                    continue;
                }
                kept.cells.insert(*column, cell.clone());
                continue;
            }
            if !cell.is_live_at(now_seconds) {
                // Expired TTL cell: becomes a tombstone-equivalent; keep
                // it until it too passes grace.
                let as_deletion = DeletionTime::new(cell.timestamp, cell.local_deletion_time);
                if purgeable(&as_deletion, gc_grace_seconds, now_seconds, purge_floor) {
                    continue;
                }
            }
            kept.cells.insert(*column, cell.clone());
        }

        if !kept.is_empty() {
            output.insert_row(kept);
        }
    }

    if output.is_empty() { None } else { Some(output) }
}

/// The smallest timestamp an overlapping non-input source could hold: the
/// bound below which purging a tombstone cannot resurrect data.
pub fn purge_floor(
    view: &crate::tracker::View,
    inputs: &[Arc<SSTableReader>],
    range: &DataRange,
) -> i64 {
    let input_generations: std::collections::HashSet<u64> =
        inputs.iter().map(|r| r.generation()).collect();

    let mut floor = i64::MAX;
    for reader in &view.live {
        if input_generations.contains(&reader.generation()) {
            continue;
        }
        if reader.may_intersect(range) {
            floor = floor.min(reader.stats().min_timestamp);
        }
    }
    for memtable in view.all_memtables() {
        if !memtable.is_clean() {
            floor = floor.min(memtable.min_timestamp());
        }
    }
    floor
}

// ------------------------------------------------------------------------------------------------
// Merge executor
// ------------------------------------------------------------------------------------------------

/// Inputs to one merge execution.
pub struct CompactionJob<'a> {
    /// The table's tracker (inputs must already be claimed).
    pub tracker: &'a Arc<Tracker>,

    /// Files to merge.
    pub inputs: Vec<Arc<SSTableReader>>,

    /// Operation flavor.
    pub op: OperationType,

    /// Generation counter for output files.
    pub generation: &'a AtomicU64,

    /// Directory for output files and the transaction log.
    pub output_dir: std::path::PathBuf,

    /// Interior split tokens; one output file per split range when
    /// non-empty (maximal compaction with shard splitting).
    pub split_points: Vec<crate::data::Token>,

    /// Tombstone grace.
    pub gc_grace_seconds: u32,

    /// Merge time in wall-clock seconds.
    pub now_seconds: u32,

    /// Stop flag polled between partitions.
    pub interrupt: Arc<CompactionInterrupt>,
}

/// Merge `job.inputs` into new files, swap them into the tracker through a
/// lifecycle transaction, and return the outputs.
///
/// The caller must hold the compacting claim on the inputs; on any exit
/// (success or failure) the claim is consumed (released by the tracker
/// swap on success, explicitly on failure).
pub fn compact_files(job: CompactionJob<'_>) -> Result<Vec<Arc<SSTableReader>>, CompactionError> {
    let result = run_merge(&job);
    if result.is_err() {
        job.tracker.unmark_compacting(&job.inputs)?;
    }
    result
}

fn run_merge(job: &CompactionJob<'_>) -> Result<Vec<Arc<SSTableReader>>, CompactionError> {
    if job.inputs.is_empty() {
        return Ok(Vec::new());
    }

    let input_generations: Vec<u64> = job.inputs.iter().map(|r| r.generation()).collect();
    debug!(inputs = ?input_generations, op = %job.op, "compaction starting");

    let union_range = DataRange::full();
    let view = job.tracker.view();
    let floor = purge_floor(&view, &job.inputs, &union_range);

    // Repair metadata: preserved only when every input agrees.
    let repaired_at = job
        .inputs
        .iter()
        .map(|r| r.stats().repaired_at)
        .min()
        .unwrap_or(UNREPAIRED);
    let pending_repair = {
        let first = job.inputs[0].stats().pending_repair;
        if job
            .inputs
            .iter()
            .all(|r| r.stats().pending_repair == first)
        {
            first
        } else {
            None
        }
    };
    let max_data_age = job
        .inputs
        .iter()
        .map(|r| r.stats().max_data_age)
        .max()
        .unwrap_or(0);

    let mut sources: Vec<Box<dyn UnfilteredPartitionIterator>> = Vec::new();
    for reader in &job.inputs {
        let scanner = reader.scan(&union_range)?;
        sources.push(Box::new(SSTableSource::new(
            scanner,
            reader.descriptor().to_string(),
        )));
    }
    let mut merge = MergedPartitionIterator::new(sources)?;

    let mut writers: Vec<Option<SSTableWriter>> = Vec::new();
    writers.resize_with(job.split_points.len() + 1, || None);

    let mut merged_partitions = 0u64;
    let mut kept_partitions = 0u64;

    let outcome = loop {
        let trigger = job.interrupt.triggered();
        if trigger != StopTrigger::None {
            break Err(CompactionError::Interrupted(trigger));
        }

        let Some((key, update)) = merge.next_merged()? else {
            break Ok(());
        };
        merged_partitions += 1;

        let Some(purged) =
            purge_partition(&update, job.gc_grace_seconds, job.now_seconds, floor)
        else {
            continue;
        };
        kept_partitions += 1;

        let shard = job.split_points.partition_point(|t| *t <= key.token);
        let writer = &mut writers[shard];
        if writer.is_none() {
            let generation = job.generation.fetch_add(1, Ordering::AcqRel) + 1;
            let mut fresh = SSTableWriter::create(Descriptor::new(
                job.output_dir.clone(),
                generation,
                SSTableFormat::Big,
            ))?;
            fresh.set_repaired_at(repaired_at);
            fresh.set_pending_repair(pending_repair);
            fresh.set_max_data_age(max_data_age);
            *writer = Some(fresh);
        }
        if let Some(writer) = writer.as_mut() {
            writer.append(&purged)?;
        }
    };

    if let Err(error) = outcome {
        for writer in writers.into_iter().flatten() {
            writer.abort();
        }
        return Err(error);
    }

    // Seal whatever shards produced output.
    let mut sealed = Vec::new();
    for writer in writers.into_iter().flatten() {
        if writer.partition_count() == 0 {
            writer.abort();
            continue;
        }
        sealed.push(writer.finish()?);
    }

    // One transaction for the whole swap; an empty output set is a pure
    // obsoletion (everything purged).
    let txn_id = sealed
        .first()
        .map(|(d, _)| d.generation)
        .unwrap_or_else(|| job.generation.fetch_add(1, Ordering::AcqRel) + 1);
    let mut txn = LifecycleTransaction::new(job.op, job.output_dir.clone(), txn_id);
    for (descriptor, _) in &sealed {
        txn.track_new(descriptor.clone())?;
    }
    for reader in &job.inputs {
        txn.track_obsolete(Arc::clone(reader))?;
    }
    txn.prepare_to_commit()?;

    let mut outputs = Vec::with_capacity(sealed.len());
    for (descriptor, _) in sealed {
        outputs.push(SSTableReader::open(descriptor)?);
    }

    job.tracker.replace_compacted(&job.inputs, outputs.clone())?;
    txn.commit()?;

    info!(
        inputs = ?input_generations,
        outputs = ?outputs.iter().map(|r| r.generation()).collect::<Vec<_>>(),
        merged_partitions,
        kept_partitions,
        op = %job.op,
        "compaction finished"
    );
    Ok(outputs)
}
