//! # Worker Pools
//!
//! Fixed-size thread pools with bounded queues, used by the flush pipeline
//! (coordinator pool, per-disk writer pools, reclaim pool) and the
//! compaction manager.
//!
//! ## Rules
//!
//! - Submission is non-blocking: a full queue rejects the task with
//!   [`ExecutorError::Rejected`] instead of stalling the submitter.
//! - [`SerialExecutor`] is a single-thread pool whose FIFO queue makes task
//!   completion order equal submission order; the post-flush lane relies on
//!   this for its ordering guarantee.
//! - Results travel through a [`TaskFuture`], which any number of holders
//!   may wait on.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, error};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by pool submission and future collection.
#[derive(Debug, Error, Clone)]
pub enum ExecutorError {
    /// The pool's queue was full or the pool is shutting down.
    #[error("task rejected by pool '{0}'")]
    Rejected(String),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// TaskFuture
// ------------------------------------------------------------------------------------------------

struct FutureState<T> {
    slot: Mutex<Option<Result<T, ExecutorError>>>,
    done: Condvar,
}

/// Handle to a pool task's eventual result.
///
/// Cloneable; every holder observes the same outcome.
pub struct TaskFuture<T> {
    state: Arc<FutureState<T>>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> std::fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture").finish_non_exhaustive()
    }
}

impl<T: Clone> TaskFuture<T> {
    fn new() -> Self {
        Self {
            state: Arc::new(FutureState {
                slot: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    /// Pre-completed future.
    pub fn ready(value: T) -> Self {
        let future = Self::new();
        future.fill(Ok(value));
        future
    }

    fn fill(&self, value: Result<T, ExecutorError>) {
        if let Ok(mut slot) = self.state.slot.lock() {
            *slot = Some(value);
            self.state.done.notify_all();
        }
    }

    /// Block until the task finishes and return its result.
    pub fn wait(&self) -> Result<T, ExecutorError> {
        let mut slot = self
            .state
            .slot
            .lock()
            .map_err(|_| ExecutorError::Internal("future lock poisoned".into()))?;
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self
                .state
                .done
                .wait(slot)
                .map_err(|_| ExecutorError::Internal("future lock poisoned".into()))?;
        }
    }

    /// Wait up to `timeout`; `None` when the task is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, ExecutorError>> {
        let mut slot = self.state.slot.lock().ok()?;
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(result) = slot.as_ref() {
                return Some(result.clone());
            }
            let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
            let (guard, timed_out) = self.state.done.wait_timeout(slot, remaining).ok()?;
            slot = guard;
            if timed_out.timed_out() && slot.is_none() {
                return None;
            }
        }
    }

    /// Non-blocking probe.
    pub fn peek(&self) -> Option<Result<T, ExecutorError>> {
        self.state.slot.lock().ok()?.clone()
    }
}

// ------------------------------------------------------------------------------------------------
// WorkerPool
// ------------------------------------------------------------------------------------------------

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool with a bounded FIFO queue.
pub struct WorkerPool {
    name: String,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn `threads` workers draining a queue of depth `queue_depth`.
    pub fn new(name: impl Into<String>, threads: usize, queue_depth: usize) -> Self {
        let name = name.into();
        let (sender, receiver) = channel::bounded::<Job>(queue_depth.max(1));

        let mut workers = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let receiver = receiver.clone();
            let thread_name = format!("{name}-{i}");
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
                .unwrap_or_else(|e| {
                    // Thread spawn failure at pool construction is fatal
                    // for the process anyway; surface it loudly.
                    error!(thread = %thread_name, error = %e, "failed to spawn pool worker");
                    panic!("failed to spawn pool worker {thread_name}: {e}");
                });
            workers.push(handle);
        }

        debug!(pool = %name, threads, queue_depth, "worker pool started");
        Self {
            name,
            sender: Some(sender),
            workers,
        }
    }

    /// The pool's name, used in rejection errors and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit a task without blocking. Returns a future for its result, or
    /// [`ExecutorError::Rejected`] when the queue is full.
    pub fn try_submit<T, F>(&self, task: F) -> Result<TaskFuture<T>, ExecutorError>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ExecutorError::Rejected(self.name.clone()))?;

        let future = TaskFuture::new();
        let completion = future.clone();
        let pool_name = self.name.clone();

        let job: Job = Box::new(move || {
            let value = task();
            completion.fill(Ok(value));
        });

        match sender.try_send(job) {
            Ok(()) => Ok(future),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(ExecutorError::Rejected(pool_name))
            }
        }
    }

    /// Close the queue and wait for in-flight tasks to finish.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!(pool = %self.name, "pool worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ------------------------------------------------------------------------------------------------
// SerialExecutor
// ------------------------------------------------------------------------------------------------

/// Single-thread pool: completion order equals submission order.
///
/// The queue is deep rather than bounded-small because rejecting a
/// post-flush task would break the flush ordering contract.
#[derive(Debug)]
pub struct SerialExecutor {
    pool: WorkerPool,
}

impl SerialExecutor {
    /// Start the single worker.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            pool: WorkerPool::new(name, 1, 1024),
        }
    }

    /// Submit a task to the ordered lane.
    pub fn try_submit<T, F>(&self, task: F) -> Result<TaskFuture<T>, ExecutorError>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.pool.try_submit(task)
    }

    /// Close the lane and wait for queued tasks.
    pub fn shutdown(&mut self) {
        self.pool.shutdown();
    }
}
