//! # Operation Ordering Primitive
//!
//! An epoch-based barrier that lets a coordinator wait for in-flight
//! operations to finish without ever blocking new ones.
//!
//! ## Model
//!
//! Writers wrap each protected operation in a [`Group`] obtained from
//! [`OpOrder::start`]. Groups are cheap: joining increments the active count
//! of the current epoch, closing decrements it.
//!
//! A coordinator that wants to freeze the world creates a [`Barrier`] and
//! calls [`Barrier::issue`]: every epoch alive at that instant is sealed and
//! a fresh epoch is opened for subsequent writers. [`Barrier::await_completion`]
//! then blocks until every sealed epoch's active count reaches zero.
//!
//! ## Guarantees
//!
//! - After `await_completion` returns, no group that existed at or before
//!   `issue` is still open; any writer inside one has finished its mutation.
//! - Groups started after `issue` join the new epoch and are never awaited
//!   by this barrier.
//! - [`Barrier::mark_blocking`] raises a flag visible through
//!   [`Group::barrier_blocking`]; writers that would grow memory past their
//!   soft limit consult it and stall instead of racing the flush that is
//!   trying to free that memory.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by ordering operations.
#[derive(Debug, Error)]
pub enum OpOrderError {
    /// `await_completion` was called on a barrier that was never issued.
    #[error("barrier awaited before issue")]
    BarrierNotIssued,

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Epoch state
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct EpochState {
    /// Epoch number, monotonically increasing per order.
    epoch: u64,

    /// Number of open groups in this epoch.
    active: AtomicUsize,

    /// Set once a barrier has sealed this epoch; no new groups join it.
    sealed: AtomicBool,

    /// Set when a waiting barrier asked writers to stop growing memory.
    blocking: AtomicBool,
}

impl EpochState {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            active: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
            blocking: AtomicBool::new(false),
        }
    }
}

#[derive(Debug)]
struct OrderShared {
    /// Live epochs, oldest at the front; the back is always the open one.
    epochs: Mutex<VecDeque<Arc<EpochState>>>,

    /// Signalled whenever the last group of a sealed epoch closes.
    completion: Condvar,
}

impl OrderShared {
    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<Arc<EpochState>>>, OpOrderError> {
        self.epochs
            .lock()
            .map_err(|_| OpOrderError::Internal("epoch lock poisoned".into()))
    }
}

// ------------------------------------------------------------------------------------------------
// OpOrder
// ------------------------------------------------------------------------------------------------

/// A family of concurrently-active groups plus the barriers that seal them.
///
/// One order guards one protected structure: a table keeps a write order for
/// memtable puts and a read order for in-flight readers.
#[derive(Debug, Clone)]
pub struct OpOrder {
    shared: Arc<OrderShared>,
}

impl Default for OpOrder {
    fn default() -> Self {
        Self::new()
    }
}

impl OpOrder {
    /// Create an order with a single open epoch.
    pub fn new() -> Self {
        let mut epochs = VecDeque::new();
        epochs.push_back(Arc::new(EpochState::new(0)));
        Self {
            shared: Arc::new(OrderShared {
                epochs: Mutex::new(epochs),
                completion: Condvar::new(),
            }),
        }
    }

    /// Join the current epoch. Callable from any writer thread.
    pub fn start(&self) -> Result<Group, OpOrderError> {
        let epochs = self.shared.lock()?;
        let epoch = Arc::clone(
            epochs
                .back()
                .ok_or_else(|| OpOrderError::Internal("no open epoch".into()))?,
        );
        epoch.active.fetch_add(1, Ordering::AcqRel);
        trace!(epoch = epoch.epoch, "group started");
        Ok(Group {
            shared: Arc::clone(&self.shared),
            epoch,
            open: true,
        })
    }

    /// Create an unissued barrier over this order.
    pub fn new_barrier(&self) -> Barrier {
        Barrier {
            shared: Arc::clone(&self.shared),
            awaited: Arc::new(Mutex::new(None)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Group
// ------------------------------------------------------------------------------------------------

/// Membership of one in-flight operation in its epoch.
///
/// Closing (or dropping) the group releases it; a barrier waiting on the
/// epoch completes once every group has been released.
#[derive(Debug)]
pub struct Group {
    shared: Arc<OrderShared>,
    epoch: Arc<EpochState>,
    open: bool,
}

impl Group {
    /// True while a barrier over this group's epoch is waiting and has
    /// asked writers to respect soft memory limits.
    pub fn barrier_blocking(&self) -> bool {
        self.epoch.blocking.load(Ordering::Acquire)
    }

    /// The epoch this group belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch.epoch
    }

    /// Release the group, possibly completing a waiting barrier.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let remaining = self.epoch.active.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && self.epoch.sealed.load(Ordering::Acquire) {
            // Take the lock before notifying so a barrier between its check
            // and its wait cannot miss the wakeup.
            let guard = self.shared.epochs.lock();
            self.shared.completion.notify_all();
            drop(guard);
        }
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        self.release();
    }
}

// ------------------------------------------------------------------------------------------------
// Barrier
// ------------------------------------------------------------------------------------------------

/// A freeze point over all groups that existed when it was issued.
///
/// Cloneable: every clone is the same barrier. A coordinator freezing
/// several structures at once (a base memtable and its attached index
/// memtables) hands each one a clone and issues the barrier once; all of
/// them are witnessed by the same epoch set.
#[derive(Debug, Clone)]
pub struct Barrier {
    shared: Arc<OrderShared>,
    /// Epochs this barrier waits on; `None` until issued. Shared across
    /// clones.
    awaited: Arc<Mutex<Option<Vec<Arc<EpochState>>>>>,
}

impl Barrier {
    /// Seal every live epoch and open a fresh one for later writers.
    ///
    /// Idempotent: re-issuing an already-issued barrier (or any clone of
    /// it) is a no-op.
    pub fn issue(&self) -> Result<(), OpOrderError> {
        let mut awaited = self
            .awaited
            .lock()
            .map_err(|_| OpOrderError::Internal("barrier lock poisoned".into()))?;
        if awaited.is_some() {
            return Ok(());
        }
        let mut epochs = self.shared.lock()?;
        let next = epochs.back().map_or(0, |e| e.epoch + 1);
        for epoch in epochs.iter() {
            epoch.sealed.store(true, Ordering::Release);
        }
        let sealed: Vec<Arc<EpochState>> = epochs.iter().cloned().collect();
        epochs.push_back(Arc::new(EpochState::new(next)));
        trace!(sealed = sealed.len(), next_epoch = next, "barrier issued");
        *awaited = Some(sealed);
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<Arc<EpochState>>, OpOrderError> {
        self.awaited
            .lock()
            .map_err(|_| OpOrderError::Internal("barrier lock poisoned".into()))?
            .clone()
            .ok_or(OpOrderError::BarrierNotIssued)
    }

    /// True once the barrier has been issued.
    pub fn is_issued(&self) -> bool {
        self.awaited.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    /// Ask writers in sealed epochs to respect soft limits while this
    /// barrier is waiting.
    pub fn mark_blocking(&self) {
        if let Ok(awaited) = self.awaited.lock()
            && let Some(epochs) = awaited.as_ref()
        {
            for epoch in epochs {
                epoch.blocking.store(true, Ordering::Release);
            }
        }
    }

    /// True when every awaited group has been released.
    pub fn all_released(&self) -> Result<bool, OpOrderError> {
        let awaited = self.snapshot()?;
        Ok(awaited
            .iter()
            .all(|epoch| epoch.active.load(Ordering::Acquire) == 0))
    }

    /// Block until every group that existed at or before `issue` is closed.
    pub fn await_completion(&self) -> Result<(), OpOrderError> {
        let awaited = self.snapshot()?;
        let mut epochs = self.shared.lock()?;
        loop {
            let pending = awaited
                .iter()
                .any(|epoch| epoch.active.load(Ordering::Acquire) > 0);
            if !pending {
                break;
            }
            epochs = self
                .shared
                .completion
                .wait_timeout(epochs, Duration::from_millis(100))
                .map_err(|_| OpOrderError::Internal("epoch lock poisoned".into()))?
                .0;
        }

        // Retire fully-drained sealed epochs from the front of the deque.
        while epochs.len() > 1 {
            let drained = epochs.front().is_some_and(|epoch| {
                epoch.sealed.load(Ordering::Acquire) && epoch.active.load(Ordering::Acquire) == 0
            });
            if !drained {
                break;
            }
            epochs.pop_front();
        }
        Ok(())
    }
}
