//! Global compaction manager: worker pool, running-operation registry,
//! pause switch, and cooperative interruption.
//!
//! The manager is an explicit dependency handed to every table store at
//! construction; tables register work through the narrow
//! [`CompactionHost`] trait rather than the manager reaching back into
//! table internals.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, info, warn};

use crate::data::{TableId, Token};
use crate::executor::WorkerPool;
use crate::lifecycle::OperationType;
use crate::sstable::SSTableReader;
use crate::tracker::Tracker;

use super::{
    CompactionError, CompactionInterrupt, CompactionJob, CompactionStrategy, Strategy,
    StopTrigger, compact_files,
};

// ------------------------------------------------------------------------------------------------
// Host contract
// ------------------------------------------------------------------------------------------------

/// What the manager needs from a table to run compactions for it.
///
/// Implemented by the table store; the trait keeps the dependency one-way
/// (tables know the manager, the manager knows only this surface).
pub trait CompactionHost: Send + Sync {
    /// The table's id.
    fn table_id(&self) -> TableId;

    /// The table's tracker.
    fn tracker(&self) -> Arc<Tracker>;

    /// The table's strategy slot.
    fn strategy(&self) -> Arc<Mutex<Strategy>>;

    /// Generation counter for output files.
    fn generation_counter(&self) -> Arc<AtomicU64>;

    /// Directory compaction outputs land in.
    fn compaction_output_dir(&self) -> PathBuf;

    /// Interior split tokens for shard-split maximal compactions.
    fn shard_split_points(&self) -> Vec<Token>;

    /// Tombstone grace for this table.
    fn gc_grace_seconds(&self) -> u32;
}

// ------------------------------------------------------------------------------------------------
// Running-operation registry
// ------------------------------------------------------------------------------------------------

/// One operation the manager is currently executing.
pub struct ActiveCompaction {
    /// Table being compacted.
    pub table: TableId,

    /// Operation flavor.
    pub op: OperationType,

    /// Input generations.
    pub inputs: Vec<u64>,

    /// Cooperative stop flag.
    pub interrupt: Arc<CompactionInterrupt>,
}

impl fmt::Debug for ActiveCompaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveCompaction")
            .field("table", &self.table)
            .field("op", &self.op)
            .field("inputs", &self.inputs)
            .finish()
    }
}

#[derive(Default)]
struct ManagerState {
    running: Vec<Arc<ActiveCompaction>>,
    pending: HashSet<TableId>,
}

// ------------------------------------------------------------------------------------------------
// Manager
// ------------------------------------------------------------------------------------------------

/// Process-wide compaction coordinator.
pub struct CompactionManager {
    pool: WorkerPool,
    state: Mutex<ManagerState>,
    cessation: Condvar,

    /// Nested pause count; compactions start only at zero.
    pause_count: AtomicUsize,
}

impl fmt::Debug for CompactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactionManager")
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

impl CompactionManager {
    /// Manager with `workers` background threads.
    pub fn new(workers: usize) -> Arc<Self> {
        Arc::new(Self {
            pool: WorkerPool::new("compaction", workers.max(1), 128),
            state: Mutex::new(ManagerState::default()),
            cessation: Condvar::new(),
            pause_count: AtomicUsize::new(0),
        })
    }

    /// True while a global pause is held.
    pub fn is_paused(&self) -> bool {
        self.pause_count.load(Ordering::Acquire) > 0
    }

    /// Running operations, for introspection and tests.
    pub fn running(&self) -> Vec<Arc<ActiveCompaction>> {
        self.state
            .lock()
            .map(|state| state.running.clone())
            .unwrap_or_default()
    }

    // --------------------------------------------------------------------
    // Submission
    // --------------------------------------------------------------------

    /// Schedule one background round for `host`'s table. At most one
    /// round is pending per table; duplicates are dropped.
    pub fn submit_background(
        self: &Arc<Self>,
        host: Arc<dyn CompactionHost>,
    ) -> Result<bool, CompactionError> {
        if self.is_paused() {
            return Ok(false);
        }
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| CompactionError::Internal("manager lock poisoned".into()))?;
            if !state.pending.insert(host.table_id()) {
                return Ok(false);
            }
        }

        let table_id = host.table_id();
        let manager = Arc::clone(self);
        let submitted = self.pool.try_submit(move || {
            let table = host.table_id();
            let outcome = manager.run_background_round(&host);
            if let Ok(mut state) = manager.state.lock() {
                state.pending.remove(&table);
            }
            if let Err(error) = outcome {
                warn!(%table, %error, "background compaction failed");
            }
        });

        match submitted {
            Ok(_) => Ok(true),
            Err(error) => {
                if let Ok(mut state) = self.state.lock() {
                    state.pending.remove(&table_id);
                }
                Err(CompactionError::Internal(error.to_string()))
            }
        }
    }

    fn run_background_round(
        self: &Arc<Self>,
        host: &Arc<dyn CompactionHost>,
    ) -> Result<(), CompactionError> {
        if self.is_paused() {
            return Ok(());
        }

        let tracker = host.tracker();
        let candidates = tracker.view().noncompacting_sstables();
        let task = {
            let strategy = host.strategy();
            let mut strategy = strategy
                .lock()
                .map_err(|_| CompactionError::Internal("strategy lock poisoned".into()))?;
            strategy.select_compaction(&candidates, now_seconds())
        };
        let Some(task) = task else {
            debug!(table = %host.table_id(), "strategy found nothing to compact");
            return Ok(());
        };
        if task.inputs.len() < 2 {
            return Ok(());
        }

        self.run_task(host, task.inputs, task.op, Vec::new())
    }

    /// Run one maximal compaction: merge every live, unclaimed file,
    /// optionally splitting outputs by shard boundaries.
    pub fn perform_maximal(
        self: &Arc<Self>,
        host: &Arc<dyn CompactionHost>,
        split_output: bool,
    ) -> Result<(), CompactionError> {
        let inputs = host.tracker().view().noncompacting_sstables();
        if inputs.is_empty() {
            return Ok(());
        }
        let split_points = if split_output {
            host.shard_split_points()
        } else {
            Vec::new()
        };
        self.run_task(host, inputs, OperationType::Compaction, split_points)
    }

    /// Compact exactly the given files.
    pub fn force_user_defined(
        self: &Arc<Self>,
        host: &Arc<dyn CompactionHost>,
        inputs: Vec<Arc<SSTableReader>>,
    ) -> Result<(), CompactionError> {
        if inputs.is_empty() {
            return Ok(());
        }
        self.run_task(host, inputs, OperationType::UserDefined, Vec::new())
    }

    fn run_task(
        self: &Arc<Self>,
        host: &Arc<dyn CompactionHost>,
        inputs: Vec<Arc<SSTableReader>>,
        op: OperationType,
        split_points: Vec<Token>,
    ) -> Result<(), CompactionError> {
        let tracker = host.tracker();
        if !tracker.try_mark_compacting(&inputs)? {
            debug!(table = %host.table_id(), "inputs already claimed, skipping");
            return Ok(());
        }

        let interrupt = Arc::new(CompactionInterrupt::new());
        let active = Arc::new(ActiveCompaction {
            table: host.table_id(),
            op,
            inputs: inputs.iter().map(|r| r.generation()).collect(),
            interrupt: Arc::clone(&interrupt),
        });
        self.register(&active)?;

        let generation = host.generation_counter();
        let replaced_inputs = inputs.clone();
        let job = CompactionJob {
            tracker: &tracker,
            inputs,
            op,
            generation: &generation,
            output_dir: host.compaction_output_dir(),
            split_points,
            gc_grace_seconds: host.gc_grace_seconds(),
            now_seconds: now_seconds(),
            interrupt,
        };
        let outcome = compact_files(job);

        self.unregister(&active);

        match outcome {
            Ok(outputs) => {
                // Tell the strategy what happened so its bookkeeping
                // (levels, tiers) follows the file set.
                let strategy = host.strategy();
                if let Ok(mut strategy) = strategy.lock() {
                    strategy.replaced(&replaced_inputs, &outputs);
                }
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn register(&self, active: &Arc<ActiveCompaction>) -> Result<(), CompactionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CompactionError::Internal("manager lock poisoned".into()))?;
        state.running.push(Arc::clone(active));
        info!(
            table = %active.table,
            inputs = ?active.inputs,
            op = %active.op,
            "compaction registered"
        );
        Ok(())
    }

    fn unregister(&self, active: &Arc<ActiveCompaction>) {
        if let Ok(mut state) = self.state.lock() {
            state
                .running
                .retain(|candidate| !Arc::ptr_eq(candidate, active));
            self.cessation.notify_all();
        }
    }

    // --------------------------------------------------------------------
    // Interruption / pause
    // --------------------------------------------------------------------

    /// Raise the stop flag on running operations of the given tables whose
    /// input set satisfies `predicate`.
    pub fn interrupt_for(
        &self,
        tables: &[TableId],
        predicate: impl Fn(&ActiveCompaction) -> bool,
        trigger: StopTrigger,
    ) {
        if let Ok(state) = self.state.lock() {
            for active in &state.running {
                if tables.contains(&active.table) && predicate(active) {
                    active.interrupt.stop(trigger);
                    debug!(table = %active.table, ?trigger, "compaction interrupted");
                }
            }
        }
    }

    /// Block until no running operation of the given tables satisfies
    /// `predicate`.
    pub fn wait_for_cessation(
        &self,
        tables: &[TableId],
        predicate: impl Fn(&ActiveCompaction) -> bool,
    ) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        loop {
            let still_running = state
                .running
                .iter()
                .any(|active| tables.contains(&active.table) && predicate(active));
            if !still_running {
                return;
            }
            state = match self
                .cessation
                .wait_timeout(state, std::time::Duration::from_millis(100))
            {
                Ok((guard, _)) => guard,
                Err(_) => return,
            };
        }
    }

    /// Hold off new compactions for the guard's lifetime.
    pub fn pause_global(self: &Arc<Self>) -> CompactionPauser {
        self.pause_count.fetch_add(1, Ordering::AcqRel);
        info!("global compaction pause acquired");
        CompactionPauser {
            manager: Arc::clone(self),
        }
    }

    /// Pause globally, interrupt this table's operations, wait for them to
    /// stop, run `body`, then resume.
    pub fn run_with_compactions_disabled<T>(
        self: &Arc<Self>,
        table: TableId,
        trigger: StopTrigger,
        body: impl FnOnce() -> T,
    ) -> T {
        let _pauser = self.pause_global();
        self.interrupt_for(&[table], |_| true, trigger);
        self.wait_for_cessation(&[table], |_| true);
        body()
    }
}

/// Scoped release of a global pause.
pub struct CompactionPauser {
    manager: Arc<CompactionManager>,
}

impl Drop for CompactionPauser {
    fn drop(&mut self) {
        self.manager.pause_count.fetch_sub(1, Ordering::AcqRel);
        info!("global compaction pause released");
    }
}

fn now_seconds() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
