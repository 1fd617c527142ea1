//! # Table Store
//!
//! Composition root of the per-table storage engine: owns the memtable
//! lifecycle (through the tracker and flush coordinator), the sorted-file
//! set, the read path, compaction wiring, snapshots, and truncation.
//!
//! ## Construction
//!
//! [`TableStore::open`] recovers the table directories (lifecycle
//! transaction logs first, orphaned component files second), discovers
//! sealed sorted files, restores the truncation record, replays the commit
//! log above the replay floor, and registers with a [`Schema`] namespace.
//! All process-wide collaborators (commit log, compaction manager, cache
//! service) arrive through an explicit [`EngineContext`]; tests substitute
//! no-op implementations.
//!
//! ## Write path
//!
//! `apply` validates the mutation, appends it to the commit log (unless
//! `durable_writes` is off), and merges the update into the current
//! memtable inside a write-order group. When the memtable crosses its size
//! threshold a flush is triggered; when flushes back up, writers stall on
//! the previous flush before growing memory further.
//!
//! ## Read path
//!
//! `read` captures a tracker view inside a read-order group (so memtable
//! reclaim waits for it) and hands the command to the read executor.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod index;
pub mod metrics;
pub mod snapshot;
pub mod truncate;

#[cfg(test)]
mod tests;

pub use index::{SecondaryIndex, SecondaryIndexManager};
pub use metrics::TableMetrics;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::cache::CacheService;
use crate::commitlog::{CommitLog, CommitLogPosition};
use crate::compaction::manager::CompactionHost;
use crate::compaction::{CompactionManager, Strategy, StopTrigger};
use crate::config::TableConfig;
use crate::data::{Mutation, PartitionerRef, TableId, Token};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::error::StorageError;
use crate::flush::{DiskBoundaryManager, FlushCoordinator, FlushFuture, FlushReason};
use crate::lifecycle;
use crate::memtable::PositionBound;
use crate::read::{ReadCommand, ReadExecutor, ReadResponse};
use crate::sstable::{Component, Descriptor, SSTableReader, SSTableWriter};
use crate::tracker::{Tracker, TrackerEvent};

const MAX_PENDING_FLUSHES: usize = 4;
const MAX_VALUE_SIZE: usize = crate::encoding::MAX_BYTE_LEN as usize;
const TRUNCATION_FILENAME: &str = "truncated.meta";

// ------------------------------------------------------------------------------------------------
// Identity and context
// ------------------------------------------------------------------------------------------------

/// Identity of one table within the schema namespace.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    /// Keyspace the table belongs to.
    pub keyspace: String,

    /// Table name.
    pub name: String,

    /// Opaque table id.
    pub id: TableId,

    /// Partitioner placing this table's keys.
    pub partitioner: PartitionerRef,
}

/// Process-wide collaborators, passed explicitly to every table store.
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// The durable write log.
    pub commit_log: Arc<dyn CommitLog>,

    /// The global compaction manager.
    pub compaction: Arc<CompactionManager>,

    /// The cache service.
    pub cache: Arc<CacheService>,
}

/// Schema namespace: the registry table stores attach to.
#[derive(Default)]
pub struct Schema {
    tables: RwLock<HashMap<TableId, Arc<TableStore>>>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.tables.read().map(|t| t.len()).unwrap_or(0);
        f.debug_struct("Schema").field("tables", &count).finish()
    }
}

impl Schema {
    /// Empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its id.
    pub fn register(&self, store: Arc<TableStore>) {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(store.id(), store);
        }
    }

    /// Remove and return a store.
    pub fn unregister(&self, id: TableId) -> Option<Arc<TableStore>> {
        self.tables.write().ok()?.remove(&id)
    }

    /// Look a store up by id.
    pub fn get(&self, id: TableId) -> Option<Arc<TableStore>> {
        self.tables.read().ok()?.get(&id).cloned()
    }

    /// Every registered store.
    pub fn tables(&self) -> Vec<Arc<TableStore>> {
        self.tables
            .read()
            .map(|tables| tables.values().cloned().collect())
            .unwrap_or_default()
    }
}

// ------------------------------------------------------------------------------------------------
// Truncation record
// ------------------------------------------------------------------------------------------------

/// Persisted truncation marker: survives restart so commit-log replay
/// skips everything at or below the recorded position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncationRecord {
    /// Wall-clock milliseconds of the truncation.
    pub truncated_at_millis: u64,

    /// Commit-log position at truncation time; replay starts above it.
    pub position: CommitLogPosition,
}

impl Encode for TruncationRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.truncated_at_millis.encode_to(buf)?;
        self.position.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TruncationRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (truncated_at_millis, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (position, n) = CommitLogPosition::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                truncated_at_millis,
                position,
            },
            offset,
        ))
    }
}

fn read_truncation_record(dir: &Path) -> Option<TruncationRecord> {
    let bytes = fs::read(dir.join(TRUNCATION_FILENAME)).ok()?;
    if bytes.len() < 4 {
        return None;
    }
    let (payload, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    if hasher.finalize().to_le_bytes() != crc_bytes {
        warn!(dir = %dir.display(), "truncation record failed its checksum, ignoring");
        return None;
    }
    encoding::decode_from_slice::<TruncationRecord>(payload)
        .ok()
        .map(|(record, _)| record)
}

fn write_truncation_record(dir: &Path, record: &TruncationRecord) -> Result<(), StorageError> {
    let mut payload = encoding::encode_to_vec(record)
        .map_err(|e| StorageError::FsWrite(e.to_string()))?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    payload.extend_from_slice(&hasher.finalize().to_le_bytes());

    let tmp = dir.join(format!("{TRUNCATION_FILENAME}.tmp"));
    fs::write(&tmp, &payload)?;
    fs::rename(&tmp, dir.join(TRUNCATION_FILENAME))?;
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Table store
// ------------------------------------------------------------------------------------------------

/// The per-table storage engine.
pub struct TableStore {
    metadata: TableMetadata,
    config: TableConfig,
    context: EngineContext,

    /// Table directories, one per data directory.
    dirs: Vec<PathBuf>,

    boundaries: Arc<DiskBoundaryManager>,
    tracker: Arc<Tracker>,
    flush: FlushCoordinator,
    strategy: Arc<Mutex<Strategy>>,
    generation: Arc<AtomicU64>,

    metrics: TableMetrics,
    indexes: Arc<SecondaryIndexManager>,

    truncation: Mutex<Option<TruncationRecord>>,
    truncating: AtomicBool,
    valid: AtomicBool,
}

impl std::fmt::Debug for TableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStore")
            .field("keyspace", &self.metadata.keyspace)
            .field("name", &self.metadata.name)
            .field("id", &self.metadata.id)
            .finish_non_exhaustive()
    }
}

impl TableStore {
    /// Open (or create) a table rooted under the given data directories.
    pub fn open(
        data_dirs: &[PathBuf],
        metadata: TableMetadata,
        config: TableConfig,
        context: EngineContext,
    ) -> Result<Arc<Self>, StorageError> {
        config.validate()?;
        if data_dirs.is_empty() {
            return Err(StorageError::Configuration(
                "at least one data directory is required".into(),
            ));
        }

        // <data-dir>/<keyspace>/<table>-<id>/
        let dirs: Vec<PathBuf> = data_dirs
            .iter()
            .map(|root| {
                root.join(&metadata.keyspace)
                    .join(format!("{}-{}", metadata.name, metadata.id))
            })
            .collect();
        for dir in &dirs {
            fs::create_dir_all(dir)?;
        }

        // 1. Finish or reverse interrupted file swaps.
        for dir in &dirs {
            lifecycle::recover_directory(dir)?;
        }

        // 2. Remove component files that never made it to a sealed set.
        for dir in &dirs {
            clean_orphans(dir)?;
        }

        // 3. Ephemeral snapshots do not survive restarts.
        for dir in &dirs {
            snapshot::clear_ephemeral_snapshots(dir);
        }

        // 4. Truncation record bounds commit-log replay.
        let truncation = read_truncation_record(&dirs[0]);

        // 5. Discover sealed files.
        let mut readers = Vec::new();
        let mut max_generation = 0u64;
        for dir in &dirs {
            for descriptor in Descriptor::discover(dir)? {
                max_generation = max_generation.max(descriptor.generation);
                readers.push(SSTableReader::open(descriptor)?);
            }
        }

        let generation = Arc::new(AtomicU64::new(max_generation));
        let boundaries = Arc::new(DiskBoundaryManager::new(
            Arc::clone(&metadata.partitioner),
            dirs.clone(),
        ));

        // 6. Fresh memtable anchored at the current log head.
        let lower = Arc::new(PositionBound::new(context.commit_log.current_position()));
        let write_order = crate::oporder::OpOrder::new();
        let read_order = crate::oporder::OpOrder::new();
        let initial = Arc::new(crate::memtable::Memtable::new(
            metadata.id,
            Arc::clone(&metadata.partitioner),
            config.memtable_size_limit,
            lower,
        ));
        let tracker = Arc::new(Tracker::new(initial));
        tracker.add_sstables(readers)?;

        let flush = FlushCoordinator::new(
            metadata.id,
            Arc::clone(&metadata.partitioner),
            Arc::clone(&tracker),
            Arc::clone(&context.commit_log),
            write_order,
            read_order,
            Arc::clone(&boundaries),
            Arc::clone(&generation),
            config.memtable_size_limit,
            config.flush_writers,
        );

        let strategy = Arc::new(Mutex::new(Strategy::new(
            config.compaction_strategy,
            config.compaction_config(),
        )));

        let store = Arc::new(Self {
            metadata,
            config,
            context,
            dirs,
            boundaries,
            tracker,
            flush,
            strategy,
            generation,
            metrics: TableMetrics::default(),
            indexes: Arc::new(SecondaryIndexManager::new()),
            truncation: Mutex::new(truncation),
            truncating: AtomicBool::new(false),
            valid: AtomicBool::new(true),
        });

        // 7. Keep metrics and the strategy in step with the tracker.
        store.subscribe_internal();

        // 8. Replay the unflushed commit-log suffix into the memtable.
        store.replay_commit_log()?;

        // 9. Periodic flush timer, when configured.
        store.spawn_periodic_flush();

        info!(
            table = %store.metadata.id,
            keyspace = %store.metadata.keyspace,
            name = %store.metadata.name,
            files = store.tracker.view().live.len(),
            "table store opened"
        );
        Ok(store)
    }

    fn subscribe_internal(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.tracker.subscribe(move |event| {
            let Some(store) = weak.upgrade() else {
                return;
            };
            match event {
                TrackerEvent::SSTablesAdded(generations) => {
                    store
                        .metrics
                        .live_sstables
                        .store(store.tracker.view().live.len() as u64, Ordering::Relaxed);
                    let view = store.tracker.view();
                    let added: Vec<_> = view
                        .live
                        .iter()
                        .filter(|r| generations.contains(&r.generation()))
                        .collect();
                    if let Ok(mut strategy) = store.strategy.lock() {
                        use crate::compaction::CompactionStrategy;
                        for reader in &added {
                            strategy.created_sstable(reader);
                        }
                    }
                    let descriptors: Vec<_> =
                        added.iter().map(|r| r.descriptor().clone()).collect();
                    store.backup_links(&descriptors);
                    let bytes: u64 = added.iter().map(|r| r.data_size()).sum();
                    store.metrics.bytes_flushed.fetch_add(bytes, Ordering::Relaxed);
                }
                TrackerEvent::SSTableListChanged => {
                    store
                        .metrics
                        .live_sstables
                        .store(store.tracker.view().live.len() as u64, Ordering::Relaxed);
                }
                TrackerEvent::MemtableDiscarded => {
                    store.metrics.flushes.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        });
    }

    /// Background timer bounding the time between flushes. Holds only a
    /// weak reference, so dropping the store stops the timer.
    fn spawn_periodic_flush(self: &Arc<Self>) {
        let period_ms = self.config.memtable_flush_period_ms;
        if period_ms == 0 {
            return;
        }
        let weak = Arc::downgrade(self);
        let name = format!("flush-timer-{}", self.metadata.id);
        let spawned = std::thread::Builder::new().name(name).spawn(move || {
            let period = std::time::Duration::from_millis(period_ms);
            let tick = period.min(std::time::Duration::from_millis(500));
            let mut last_flush = std::time::Instant::now();
            loop {
                std::thread::sleep(tick);
                let Some(store) = weak.upgrade() else {
                    return;
                };
                if !store.is_valid() {
                    return;
                }
                if last_flush.elapsed() >= period {
                    last_flush = std::time::Instant::now();
                    if let Err(error) = store.flush(FlushReason::MemtablePeriodExpired) {
                        warn!(table = %store.metadata.id, %error, "periodic flush failed to start");
                    }
                }
            }
        });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn periodic flush timer");
        }
    }

    fn replay_commit_log(&self) -> Result<(), StorageError> {
        let truncated = self
            .truncation
            .lock()
            .ok()
            .and_then(|t| t.map(|r| r.position))
            .unwrap_or(CommitLogPosition::NONE);
        let flushed =
            crate::flush::read_replay_floor(&self.dirs[0]).unwrap_or(CommitLogPosition::NONE);
        let floor = truncated.max(flushed);

        let replayed = self.context.commit_log.replay_from(floor)?;
        if replayed.is_empty() {
            return Ok(());
        }

        let mut applied = 0u64;
        for (position, mutation) in replayed {
            let Some(update) = mutation.update_for(self.metadata.id) else {
                continue;
            };
            let group = self
                .flush
                .write_order()
                .start()
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
            let view = self.tracker.view();
            view.current
                .put(update.clone(), position, self.indexes.as_ref(), &group)?;
            group.close();
            applied += 1;
        }
        info!(table = %self.metadata.id, applied, "commit log replayed");
        Ok(())
    }

    // --------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------

    /// The table's id.
    pub fn id(&self) -> TableId {
        self.metadata.id
    }

    /// The table's identity.
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// The table's configuration.
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// The table's tracker (view capture for advanced callers).
    pub fn tracker_handle(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    /// The table's counters.
    pub fn metrics(&self) -> &TableMetrics {
        &self.metrics
    }

    /// The table's secondary-index registry.
    pub fn secondary_indexes(&self) -> &Arc<SecondaryIndexManager> {
        &self.indexes
    }

    /// The persisted truncation record, if the table was ever truncated.
    pub fn truncation_record(&self) -> Option<TruncationRecord> {
        self.truncation.lock().ok().and_then(|t| *t)
    }

    /// True until the store is invalidated.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Invalidate the disk-boundary cache after a ring change.
    pub fn invalidate_disk_boundaries(&self) {
        self.boundaries.invalidate();
    }

    fn ensure_valid(&self) -> Result<(), StorageError> {
        if !self.is_valid() {
            return Err(StorageError::InvalidRequest(format!(
                "table {} has been invalidated",
                self.metadata.id
            )));
        }
        Ok(())
    }

    // --------------------------------------------------------------------
    // Write path
    // --------------------------------------------------------------------

    /// Apply one mutation. Durable when `durable_writes` is on: the commit
    /// log sees the mutation before the memtable does.
    pub fn apply(&self, mutation: &Mutation) -> Result<(), StorageError> {
        self.ensure_valid()?;

        let update = mutation.update_for(self.metadata.id).ok_or_else(|| {
            StorageError::InvalidRequest(format!(
                "mutation carries no update for table {}",
                self.metadata.id
            ))
        })?;
        for row in update.static_row.iter().chain(update.rows.values()) {
            for cell in row.cells.values() {
                if let Some(value) = &cell.value
                    && value.len() > MAX_VALUE_SIZE
                {
                    return Err(StorageError::InvalidRequest(format!(
                        "value of {} bytes exceeds limit of {MAX_VALUE_SIZE} bytes",
                        value.len()
                    )));
                }
            }
        }

        // Back-pressure: with flushes backed up, wait for the previous
        // flush instead of growing memory further.
        if self.flush.backlogged(MAX_PENDING_FLUSHES)
            && let Some(last) = self.flush.last_flush()
        {
            debug!(table = %self.metadata.id, "write stalling on backlogged flushes");
            let _ = last.wait();
        }

        let mut update = update.clone();
        update.cdc |= self.config.cdc;

        let position = if self.config.durable_writes {
            self.context.commit_log.add(mutation)?
        } else {
            self.context.commit_log.current_position()
        };

        let group = self
            .flush
            .write_order()
            .start()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let view = self.tracker.view();
        let key = update.key.clone();
        let outcome = view
            .current
            .put(update, position, self.indexes.as_ref(), &group);
        group.close();
        let outcome = outcome?;

        self.metrics.on_write(outcome.timestamp_delta_micros);
        self.context.cache.invalidate(self.metadata.id, &key);

        if view.current.approximate_size() >= self.config.memtable_size_limit {
            if let Err(error) = self.flush(FlushReason::MemtableLimit) {
                warn!(table = %self.metadata.id, %error, "size-triggered flush failed to start");
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------------
    // Read path
    // --------------------------------------------------------------------

    /// Execute one read command.
    pub fn read(&self, command: &ReadCommand) -> Result<ReadResponse, StorageError> {
        self.ensure_valid()?;
        if command.table_id != self.metadata.id {
            return Err(StorageError::InvalidRequest(format!(
                "read for table {} routed to table {}",
                command.table_id, self.metadata.id
            )));
        }

        // The read group keeps flushed memtables alive until we finish.
        let group = self
            .flush
            .read_order()
            .start()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let view = self.tracker.view();
        let result = ReadExecutor::execute(&view, &self.context.cache, command);
        group.close();

        self.metrics.on_read();
        Ok(result?)
    }

    // --------------------------------------------------------------------
    // Flush and compaction
    // --------------------------------------------------------------------

    /// Request a flush; see [`FlushCoordinator::flush`] for the future's
    /// semantics.
    ///
    /// Table-backed secondary indexes are frozen with the base table: the
    /// coordinator swaps their memtables under the same write barrier and
    /// seals their files in the same lifecycle transaction.
    pub fn flush(&self, reason: FlushReason) -> Result<FlushFuture, StorageError> {
        self.ensure_valid()?;
        let index_targets = self.indexes.flush_targets();
        Ok(self.flush.flush(reason, &index_targets)?)
    }

    /// Schedule one background compaction round.
    pub fn submit_background_compaction(self: &Arc<Self>) -> Result<bool, StorageError> {
        self.ensure_valid()?;
        Ok(self
            .context
            .compaction
            .submit_background(Arc::clone(self) as Arc<dyn CompactionHost>)?)
    }

    /// Run one major compaction, optionally splitting output by shard.
    pub fn compact_major(self: &Arc<Self>, split: bool) -> Result<(), StorageError> {
        self.ensure_valid()?;
        let host: Arc<dyn CompactionHost> = Arc::clone(self) as Arc<dyn CompactionHost>;
        self.context.compaction.perform_maximal(&host, split)?;
        self.metrics.compactions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Rewrite every live file, skipping partitions whose blocks fail
    /// their checksums. Returns `(files_rewritten, partitions_skipped)`.
    ///
    /// Table-backed secondary indexes are scrubbed too; a scrub failure
    /// on an index's files triggers that index's rebuild from the base
    /// table instead of propagating.
    pub fn scrub(self: &Arc<Self>) -> Result<(u64, u64), StorageError> {
        self.ensure_valid()?;
        let mut rewritten = 0u64;
        let mut skipped = 0u64;

        // Base table first: a failure here propagates.
        let view = self.tracker.view();
        for reader in view.live.iter() {
            if !self.tracker.try_mark_compacting(std::slice::from_ref(reader))? {
                continue;
            }
            match Self::scrub_file(&self.tracker, &self.generation, &self.dirs[0], reader) {
                Ok(bad) => {
                    rewritten += 1;
                    skipped += bad;
                }
                Err(error) => {
                    self.tracker
                        .unmark_compacting(std::slice::from_ref(reader))?;
                    warn!(
                        table = %self.metadata.id,
                        file = %reader.descriptor(),
                        %error,
                        "scrub failed for file"
                    );
                    return Err(error);
                }
            }
        }

        // Index tables second: a failure rebuilds the index from the base
        // table instead of propagating.
        for index in self.indexes.all() {
            let Some(target) = index.backing_table() else {
                continue;
            };
            let mut failed = false;
            let index_view = target.tracker.view();
            for reader in index_view.live.iter() {
                if !target
                    .tracker
                    .try_mark_compacting(std::slice::from_ref(reader))?
                {
                    continue;
                }
                match Self::scrub_file(&target.tracker, &self.generation, &target.dir, reader) {
                    Ok(bad) => {
                        rewritten += 1;
                        skipped += bad;
                    }
                    Err(error) => {
                        target
                            .tracker
                            .unmark_compacting(std::slice::from_ref(reader))?;
                        warn!(
                            table = %self.metadata.id,
                            index = index.name(),
                            file = %reader.descriptor(),
                            %error,
                            "index scrub failed, falling back to rebuild"
                        );
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                self.indexes.rebuild(index.name());
            }
        }
        Ok((rewritten, skipped))
    }

    fn scrub_file(
        tracker: &Arc<Tracker>,
        generation: &AtomicU64,
        log_dir: &Path,
        reader: &Arc<SSTableReader>,
    ) -> Result<u64, StorageError> {
        use crate::lifecycle::{LifecycleTransaction, OperationType};

        let mut skipped = 0u64;
        let generation = generation.fetch_add(1, Ordering::AcqRel) + 1;
        let descriptor = Descriptor::new(
            reader.descriptor().dir.clone(),
            generation,
            reader.descriptor().format,
        );
        let mut writer =
            SSTableWriter::create(descriptor).map_err(|e| StorageError::FsWrite(e.to_string()))?;
        writer.set_repaired_at(reader.stats().repaired_at);
        writer.set_max_data_age(reader.stats().max_data_age);

        for slot in 0..reader.stats().partition_count as usize {
            let Some(entry) = reader.index_entry(slot) else {
                break;
            };
            match reader.read_partition(entry) {
                Ok(update) => {
                    writer
                        .append(&update)
                        .map_err(|e| StorageError::FsWrite(e.to_string()))?;
                }
                Err(error) => {
                    skipped += 1;
                    warn!(
                        file = %reader.descriptor(),
                        slot,
                        %error,
                        "scrub skipping damaged partition"
                    );
                }
            }
        }

        if writer.partition_count() == 0 {
            // Everything was damaged: drop the file outright.
            writer.abort();
            let mut txn =
                LifecycleTransaction::new(OperationType::Scrub, log_dir.to_path_buf(), generation);
            txn.track_obsolete(Arc::clone(reader))
                .map_err(|e| StorageError::FsWrite(e.to_string()))?;
            txn.prepare_to_commit()
                .map_err(|e| StorageError::FsWrite(e.to_string()))?;
            tracker.replace_compacted(std::slice::from_ref(reader), Vec::new())?;
            txn.commit()
                .map_err(|e| StorageError::FsWrite(e.to_string()))?;
            return Ok(skipped);
        }

        let (descriptor, _) = writer
            .finish()
            .map_err(|e| StorageError::FsWrite(e.to_string()))?;

        let mut txn =
            LifecycleTransaction::new(OperationType::Scrub, log_dir.to_path_buf(), generation);
        txn.track_new(descriptor.clone())
            .map_err(|e| StorageError::FsWrite(e.to_string()))?;
        txn.track_obsolete(Arc::clone(reader))
            .map_err(|e| StorageError::FsWrite(e.to_string()))?;
        txn.prepare_to_commit()
            .map_err(|e| StorageError::FsWrite(e.to_string()))?;

        let replacement = SSTableReader::open(descriptor)?;
        tracker.replace_compacted(std::slice::from_ref(reader), vec![replacement])?;
        txn.commit()
            .map_err(|e| StorageError::FsWrite(e.to_string()))?;
        Ok(skipped)
    }

    // --------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------

    /// Flush everything and stop accepting work.
    pub fn close(&self) -> Result<(), StorageError> {
        if !self.is_valid() {
            return Ok(());
        }
        let future = self.flush(FlushReason::Shutdown)?;
        future
            .wait()
            .map_err(|e| StorageError::FsWrite(e.to_string()))?
            .map_err(StorageError::from)?;
        self.valid.store(false, Ordering::Release);
        info!(table = %self.metadata.id, "table store closed");
        Ok(())
    }

    /// Invalidate the store: interrupt its compactions and refuse further
    /// work. The caller unregisters it from the schema.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
        self.context.compaction.interrupt_for(
            &[self.metadata.id],
            |_| true,
            StopTrigger::Shutdown,
        );
        self.context.cache.invalidate_table(self.metadata.id);
        info!(table = %self.metadata.id, "table store invalidated");
    }
}

// ------------------------------------------------------------------------------------------------
// Compaction host wiring
// ------------------------------------------------------------------------------------------------

impl CompactionHost for TableStore {
    fn table_id(&self) -> TableId {
        self.metadata.id
    }

    fn tracker(&self) -> Arc<Tracker> {
        Arc::clone(&self.tracker)
    }

    fn strategy(&self) -> Arc<Mutex<Strategy>> {
        Arc::clone(&self.strategy)
    }

    fn generation_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.generation)
    }

    fn compaction_output_dir(&self) -> PathBuf {
        self.dirs[0].clone()
    }

    fn shard_split_points(&self) -> Vec<Token> {
        self.boundaries.boundaries().boundaries.clone()
    }

    fn gc_grace_seconds(&self) -> u32 {
        self.config.gc_grace_seconds
    }
}

// ------------------------------------------------------------------------------------------------
// Startup helpers
// ------------------------------------------------------------------------------------------------

/// Delete component files whose sealed set never completed (no TOC).
fn clean_orphans(dir: &Path) -> Result<(), StorageError> {
    let complete: Vec<Descriptor> = Descriptor::discover(dir)?;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some((descriptor, component)) = Descriptor::parse(&path) else {
            continue;
        };
        if component == Component::Toc || complete.contains(&descriptor) {
            continue;
        }
        if !descriptor.path(Component::Toc).exists() {
            warn!(file = %path.display(), "removing orphaned component file");
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}
