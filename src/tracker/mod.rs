//! # Tracker / View
//!
//! Atomic registry of a table's live storage sources: the current memtable,
//! the memtables being flushed, the live sorted files, and the files
//! claimed by running compactions.
//!
//! ## Publish-by-replace
//!
//! All state lives in one immutable [`View`] behind the tracker. Every
//! transition builds a new `View` and swaps the reference; readers capture
//! the reference once and are unaffected by later transitions. A reader
//! therefore sees either the pre-transition or the post-transition world,
//! never a mixture, and derived bookkeeping (live sizes) is recomputed from
//! the new view rather than mutated in place.
//!
//! ## Subscriptions
//!
//! Observers (the secondary-index manager, telemetry) register plain
//! callbacks; the tracker never holds typed references back into its
//! observers, keeping the dependency one-way.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tracing::{debug, info};

use crate::data::DataRange;
use crate::memtable::Memtable;
use crate::sstable::SSTableReader;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by tracker transitions.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The memtable or file a transition names is not in the view.
    #[error("{0} not present in tracker view")]
    NotInView(&'static str),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// View
// ------------------------------------------------------------------------------------------------

/// Immutable snapshot of a table's storage sources.
#[derive(Clone)]
pub struct View {
    /// Memtable accepting writes.
    pub current: Arc<Memtable>,

    /// Switched-out memtables awaiting (or undergoing) flush, oldest
    /// first.
    pub flushing: Vec<Arc<Memtable>>,

    /// Live sorted files.
    pub live: Vec<Arc<SSTableReader>>,

    /// Generations currently claimed by compactions.
    pub compacting: HashSet<u64>,
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("flushing", &self.flushing.len())
            .field("live", &self.live.len())
            .field("compacting", &self.compacting.len())
            .finish_non_exhaustive()
    }
}

impl View {
    /// Live files that may hold keys inside `range`.
    pub fn sstables_intersecting(&self, range: &DataRange) -> Vec<Arc<SSTableReader>> {
        self.live
            .iter()
            .filter(|reader| reader.may_intersect(range))
            .cloned()
            .collect()
    }

    /// Every memtable a read consults: flushing first (oldest data), then
    /// current.
    pub fn all_memtables(&self) -> Vec<Arc<Memtable>> {
        let mut memtables = self.flushing.clone();
        memtables.push(Arc::clone(&self.current));
        memtables
    }

    /// Live files not claimed by a compaction.
    pub fn noncompacting_sstables(&self) -> Vec<Arc<SSTableReader>> {
        self.live
            .iter()
            .filter(|reader| !self.compacting.contains(&reader.generation()))
            .cloned()
            .collect()
    }

    /// Total on-disk bytes across live files.
    pub fn live_size(&self) -> u64 {
        self.live.iter().map(|reader| reader.data_size()).sum()
    }
}

// ------------------------------------------------------------------------------------------------
// Events and subscriptions
// ------------------------------------------------------------------------------------------------

/// Transition notifications delivered to subscribers.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// The current memtable was replaced; the old one entered the
    /// flushing set (or was dropped, on truncation).
    MemtableSwitched,

    /// A flushed memtable left the view; its files are live.
    MemtableDiscarded,

    /// New sorted files entered the live set.
    SSTablesAdded(Vec<u64>),

    /// Files left the live set (compaction, obsoletion, truncation).
    SSTableListChanged,

    /// The table was truncated at the given wall-clock milliseconds.
    Truncated(u64),
}

type Subscriber = Box<dyn Fn(&TrackerEvent) + Send + Sync>;

// ------------------------------------------------------------------------------------------------
// Tracker
// ------------------------------------------------------------------------------------------------

/// Owner of the view reference; all transitions go through here.
pub struct Tracker {
    view: RwLock<Arc<View>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("view", &*self.view())
            .finish_non_exhaustive()
    }
}

impl Tracker {
    /// Tracker starting with an empty table: one active memtable, no
    /// files.
    pub fn new(initial: Arc<Memtable>) -> Self {
        Self {
            view: RwLock::new(Arc::new(View {
                current: initial,
                flushing: Vec::new(),
                live: Vec::new(),
                compacting: HashSet::new(),
            })),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Capture the current view. Cheap; the snapshot stays valid for the
    /// reader's whole lifetime.
    pub fn view(&self) -> Arc<View> {
        match self.view.read() {
            Ok(view) => Arc::clone(&view),
            // A poisoned lock still holds a coherent Arc; reads go on.
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Register a transition observer.
    pub fn subscribe(&self, subscriber: impl Fn(&TrackerEvent) + Send + Sync + 'static) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(Box::new(subscriber));
        }
    }

    fn notify(&self, event: TrackerEvent) {
        if let Ok(subscribers) = self.subscribers.lock() {
            for subscriber in subscribers.iter() {
                subscriber(&event);
            }
        }
    }

    fn swap<F>(&self, transition: F) -> Result<Arc<View>, TrackerError>
    where
        F: FnOnce(&View) -> Result<View, TrackerError>,
    {
        let mut guard = self
            .view
            .write()
            .map_err(|_| TrackerError::Internal("view lock poisoned".into()))?;
        let next = Arc::new(transition(&guard)?);
        let previous = std::mem::replace(&mut *guard, Arc::clone(&next));
        drop(previous);
        Ok(next)
    }

    // --------------------------------------------------------------------
    // Memtable transitions
    // --------------------------------------------------------------------

    /// Replace the current memtable. Unless `truncate`, the old one moves
    /// to the flushing set. Returns the old memtable.
    pub fn switch_memtable(
        &self,
        truncate: bool,
        new: Arc<Memtable>,
    ) -> Result<Arc<Memtable>, TrackerError> {
        let mut old = None;
        self.swap(|view| {
            let previous = Arc::clone(&view.current);
            let mut flushing = view.flushing.clone();
            if !truncate {
                flushing.push(Arc::clone(&previous));
            }
            old = Some(previous);
            Ok(View {
                current: new.clone(),
                flushing,
                live: view.live.clone(),
                compacting: view.compacting.clone(),
            })
        })?;
        self.notify(TrackerEvent::MemtableSwitched);
        old.ok_or_else(|| TrackerError::Internal("switch produced no old memtable".into()))
    }

    /// Transition a switched-out memtable (already in the flushing set)
    /// into its flushing state.
    pub fn mark_flushing(&self, memtable: &Arc<Memtable>) -> Result<(), TrackerError> {
        let view = self.view();
        if !view
            .flushing
            .iter()
            .any(|candidate| Arc::ptr_eq(candidate, memtable))
        {
            return Err(TrackerError::NotInView("memtable"));
        }
        memtable
            .mark_flushing()
            .map_err(|e| TrackerError::Internal(e.to_string()))
    }

    /// Finish a flush: drop `memtable` from the flushing set and make
    /// `produced` live.
    pub fn replace_flushed(
        &self,
        memtable: &Arc<Memtable>,
        produced: Vec<Arc<SSTableReader>>,
    ) -> Result<(), TrackerError> {
        let generations: Vec<u64> = produced.iter().map(|r| r.generation()).collect();
        self.swap(|view| {
            let flushing: Vec<Arc<Memtable>> = view
                .flushing
                .iter()
                .filter(|candidate| !Arc::ptr_eq(candidate, memtable))
                .cloned()
                .collect();
            if flushing.len() == view.flushing.len() {
                return Err(TrackerError::NotInView("memtable"));
            }
            let mut live = view.live.clone();
            live.extend(produced.iter().cloned());
            Ok(View {
                current: Arc::clone(&view.current),
                flushing,
                live,
                compacting: view.compacting.clone(),
            })
        })?;
        debug!(files = ?generations, "flushed memtable replaced by sorted files");
        if !generations.is_empty() {
            self.notify(TrackerEvent::SSTablesAdded(generations));
        }
        self.notify(TrackerEvent::MemtableDiscarded);
        Ok(())
    }

    // --------------------------------------------------------------------
    // Sorted-file transitions
    // --------------------------------------------------------------------

    /// Add files to the live set (streaming, startup discovery).
    pub fn add_sstables(&self, files: Vec<Arc<SSTableReader>>) -> Result<(), TrackerError> {
        if files.is_empty() {
            return Ok(());
        }
        let generations: Vec<u64> = files.iter().map(|r| r.generation()).collect();
        self.swap(|view| {
            let mut live = view.live.clone();
            live.extend(files.iter().cloned());
            Ok(View {
                current: Arc::clone(&view.current),
                flushing: view.flushing.clone(),
                live,
                compacting: view.compacting.clone(),
            })
        })?;
        self.notify(TrackerEvent::SSTablesAdded(generations));
        Ok(())
    }

    /// Remove every live file matching `predicate`, returning the removed
    /// readers. The caller decides obsoletion (usually via a lifecycle
    /// transaction).
    pub fn drop_sstables(
        &self,
        predicate: impl Fn(&SSTableReader) -> bool,
    ) -> Result<Vec<Arc<SSTableReader>>, TrackerError> {
        let mut dropped = Vec::new();
        self.swap(|view| {
            let mut live = Vec::with_capacity(view.live.len());
            for reader in &view.live {
                if predicate(reader) {
                    dropped.push(Arc::clone(reader));
                } else {
                    live.push(Arc::clone(reader));
                }
            }
            Ok(View {
                current: Arc::clone(&view.current),
                flushing: view.flushing.clone(),
                live,
                compacting: view.compacting.clone(),
            })
        })?;
        if !dropped.is_empty() {
            self.notify(TrackerEvent::SSTableListChanged);
        }
        Ok(dropped)
    }

    /// Swap compaction inputs for outputs in one transition.
    ///
    /// Emits only a list-change event: compaction outputs reach the
    /// strategy through its `replaced` callback, not `created_sstable`,
    /// and are not candidates for incremental backup.
    pub fn replace_compacted(
        &self,
        inputs: &[Arc<SSTableReader>],
        outputs: Vec<Arc<SSTableReader>>,
    ) -> Result<(), TrackerError> {
        let input_generations: HashSet<u64> = inputs.iter().map(|r| r.generation()).collect();
        self.swap(|view| {
            let mut live: Vec<Arc<SSTableReader>> = view
                .live
                .iter()
                .filter(|reader| !input_generations.contains(&reader.generation()))
                .cloned()
                .collect();
            live.extend(outputs.iter().cloned());
            let mut compacting = view.compacting.clone();
            for generation in &input_generations {
                compacting.remove(generation);
            }
            Ok(View {
                current: Arc::clone(&view.current),
                flushing: view.flushing.clone(),
                live,
                compacting,
            })
        })?;
        self.notify(TrackerEvent::SSTableListChanged);
        Ok(())
    }

    /// Atomically claim files for a compaction. Fails (returning false)
    /// when any of them is already claimed.
    pub fn try_mark_compacting(
        &self,
        files: &[Arc<SSTableReader>],
    ) -> Result<bool, TrackerError> {
        let generations: Vec<u64> = files.iter().map(|r| r.generation()).collect();
        let mut claimed = false;
        self.swap(|view| {
            if generations
                .iter()
                .any(|generation| view.compacting.contains(generation))
            {
                claimed = false;
                return Ok(view.clone());
            }
            // Every claimed file must still be live.
            let live: HashSet<u64> = view.live.iter().map(|r| r.generation()).collect();
            if !generations.iter().all(|g| live.contains(g)) {
                claimed = false;
                return Ok(view.clone());
            }
            let mut compacting = view.compacting.clone();
            compacting.extend(generations.iter().copied());
            claimed = true;
            Ok(View {
                current: Arc::clone(&view.current),
                flushing: view.flushing.clone(),
                live: view.live.clone(),
                compacting,
            })
        })?;
        Ok(claimed)
    }

    /// Release a compaction claim without replacing the files (abort
    /// path).
    pub fn unmark_compacting(&self, files: &[Arc<SSTableReader>]) -> Result<(), TrackerError> {
        let generations: HashSet<u64> = files.iter().map(|r| r.generation()).collect();
        self.swap(|view| {
            let mut compacting = view.compacting.clone();
            for generation in &generations {
                compacting.remove(generation);
            }
            Ok(View {
                current: Arc::clone(&view.current),
                flushing: view.flushing.clone(),
                live: view.live.clone(),
                compacting,
            })
        })?;
        Ok(())
    }

    // --------------------------------------------------------------------
    // Wholesale transitions
    // --------------------------------------------------------------------

    /// Reset to an empty view around `new`: used by truncate-without-flush
    /// and drop.
    pub fn reset(&self, new: Arc<Memtable>) -> Result<(), TrackerError> {
        self.swap(|_| {
            Ok(View {
                current: new.clone(),
                flushing: Vec::new(),
                live: Vec::new(),
                compacting: HashSet::new(),
            })
        })?;
        self.notify(TrackerEvent::MemtableSwitched);
        self.notify(TrackerEvent::SSTableListChanged);
        Ok(())
    }

    /// Announce a completed truncation.
    pub fn notify_truncated(&self, truncated_at_millis: u64) {
        info!(truncated_at_millis, "table truncated");
        self.notify(TrackerEvent::Truncated(truncated_at_millis));
    }
}
