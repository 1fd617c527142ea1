//! Truncation: discard every row of the table, durably.
//!
//! State machine: `idle → running → idle`; a second truncation while one
//! runs is rejected. The whole sequence executes with compactions
//! disabled: the global pause is held, in-flight compactions of this table
//! are interrupted, and the run waits for their cessation first.
//!
//! Sequence inside `running`:
//!
//! 1. Flush (durable tables) or dump (non-durable: the memtable content is
//!    discarded outright, nothing is owed to the commit log).
//! 2. Record the truncation timestamp `t`.
//! 3. Snapshot, when `auto_snapshot` is configured.
//! 4. Obsolete every file whose `max_data_age ≤ t` through a lifecycle
//!    transaction.
//! 5. Invalidate caches.
//! 6. Persist the truncation record so a restart replays the commit log
//!    only from the recorded position.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::compaction::StopTrigger;
use crate::error::StorageError;
use crate::flush::FlushReason;
use crate::lifecycle::{LifecycleTransaction, OperationType};
use crate::memtable::PositionBound;

use super::{TableStore, TruncationRecord, write_truncation_record};

impl TableStore {
    /// Discard every row of the table. Blocks until the truncation is
    /// durable.
    pub fn truncate(self: &Arc<Self>) -> Result<(), StorageError> {
        self.ensure_valid()?;

        // idle → running, or reject.
        if self.truncating.swap(true, Ordering::AcqRel) {
            return Err(StorageError::InvalidRequest(format!(
                "table {} is already truncating",
                self.metadata.id
            )));
        }
        let result = self.context.compaction.clone().run_with_compactions_disabled(
            self.metadata.id,
            StopTrigger::Truncate,
            || self.truncate_inner(),
        );
        self.truncating.store(false, Ordering::Release);
        result
    }

    fn truncate_inner(self: &Arc<Self>) -> Result<(), StorageError> {
        info!(table = %self.metadata.id, "truncate starting");

        // 1. Durable tables flush so the commit log can be bounded; others
        //    dump the memtable wholesale. Index tables freeze with the
        //    base either way.
        if self.config.durable_writes {
            let index_targets = self.indexes.flush_targets();
            let future = self.flush.flush(FlushReason::Truncate, &index_targets)?;
            future
                .wait()
                .map_err(|e| StorageError::FsWrite(e.to_string()))?
                .map_err(StorageError::from)?;
        } else {
            let lower = Arc::new(PositionBound::new(
                self.context.commit_log.current_position(),
            ));
            let fresh = self.flush.new_memtable(lower);
            self.tracker.switch_memtable(true, fresh)?;
        }

        // 2. The truncation point.
        let truncated_at_millis = now_millis();

        // 3. Optional pre-truncate snapshot.
        if self.config.auto_snapshot {
            let tag = format!("truncated-{truncated_at_millis}");
            self.snapshot(&tag, false)?;
        }

        // 4. Obsolete everything older than the truncation point, through
        //    a lifecycle transaction so a crash cannot half-apply it.
        let doomed = self
            .tracker
            .drop_sstables(|reader| reader.stats().max_data_age <= truncated_at_millis)?;
        if !doomed.is_empty() {
            let txn_id = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            let mut txn = LifecycleTransaction::new(
                OperationType::Truncate,
                self.dirs[0].clone(),
                txn_id,
            );
            for reader in &doomed {
                txn.track_obsolete(Arc::clone(reader))
                    .map_err(|e| StorageError::FsWrite(e.to_string()))?;
            }
            txn.prepare_to_commit()
                .map_err(|e| StorageError::FsWrite(e.to_string()))?;
            txn.commit()
                .map_err(|e| StorageError::FsWrite(e.to_string()))?;
        }

        // 5. Caches hold pre-truncation rows.
        self.context.cache.invalidate_table(self.metadata.id);

        // 6. Durable record: replay after restart starts above this
        //    position.
        let record = TruncationRecord {
            truncated_at_millis,
            position: self.context.commit_log.current_position(),
        };
        write_truncation_record(&self.dirs[0], &record)?;
        if let Ok(mut truncation) = self.truncation.lock() {
            *truncation = Some(record);
        }

        self.tracker.notify_truncated(truncated_at_millis);
        info!(table = %self.metadata.id, truncated_at_millis, "truncate finished");
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
