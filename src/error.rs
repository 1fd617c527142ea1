//! Crate-level error taxonomy.
//!
//! Subsystem errors are precise; what callers observe collapses into the
//! closed set here. The mapping rules: bad input never mutates state and
//! surfaces as `InvalidRequest`; anything that questions on-disk integrity
//! is `Corrupt`; unfinished startup recovery is `StartupFailure`; I/O
//! splits by direction into `FsRead` / `FsWrite`; deadline misses are
//! `Timeout`.

use thiserror::Error;

use crate::commitlog::CommitLogError;
use crate::compaction::CompactionError;
use crate::config::ConfigError;
use crate::data::DataError;
use crate::flush::FlushError;
use crate::lifecycle::LifecycleError;
use crate::memtable::MemtableError;
use crate::read::ReadError;
use crate::sstable::SSTableError;
use crate::tracker::TrackerError;

/// The observable error taxonomy of the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The request was malformed; nothing was mutated.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A configuration value is outside its legal range.
    #[error("configuration: {0}")]
    Configuration(String),

    /// Startup recovery found a state it cannot repair.
    #[error("startup failure: {0}")]
    StartupFailure(String),

    /// Read-side filesystem failure.
    #[error("filesystem read: {0}")]
    FsRead(String),

    /// Write-side filesystem failure.
    #[error("filesystem write: {0}")]
    FsWrite(String),

    /// On-disk or in-memory state failed an integrity check.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// A deadline passed before the operation finished.
    #[error("timeout: {0}")]
    Timeout(String),
}

impl From<DataError> for StorageError {
    fn from(error: DataError) -> Self {
        StorageError::InvalidRequest(error.to_string())
    }
}

impl From<ConfigError> for StorageError {
    fn from(error: ConfigError) -> Self {
        StorageError::Configuration(error.to_string())
    }
}

impl From<MemtableError> for StorageError {
    fn from(error: MemtableError) -> Self {
        match error {
            MemtableError::TableMismatch { .. } => StorageError::InvalidRequest(error.to_string()),
            other => StorageError::Corrupt(other.to_string()),
        }
    }
}

impl From<CommitLogError> for StorageError {
    fn from(error: CommitLogError) -> Self {
        match error {
            CommitLogError::Io(e) => StorageError::FsWrite(e.to_string()),
            CommitLogError::ChecksumMismatch { .. } | CommitLogError::InvalidHeader(_) => {
                StorageError::Corrupt(error.to_string())
            }
            other => StorageError::Corrupt(other.to_string()),
        }
    }
}

impl From<SSTableError> for StorageError {
    fn from(error: SSTableError) -> Self {
        match error {
            SSTableError::Io(e) => StorageError::FsRead(e.to_string()),
            SSTableError::ChecksumMismatch(_) | SSTableError::Corrupt(_) => {
                StorageError::Corrupt(error.to_string())
            }
            other => StorageError::Corrupt(other.to_string()),
        }
    }
}

impl From<LifecycleError> for StorageError {
    fn from(error: LifecycleError) -> Self {
        match error {
            LifecycleError::StartupFailure(message) => StorageError::StartupFailure(message),
            LifecycleError::Io(e) => StorageError::FsWrite(e.to_string()),
            other => StorageError::Corrupt(other.to_string()),
        }
    }
}

impl From<ReadError> for StorageError {
    fn from(error: ReadError) -> Self {
        match error {
            ReadError::Timeout(message) => StorageError::Timeout(message),
            ReadError::SSTable { .. } => StorageError::FsRead(error.to_string()),
            other => StorageError::Corrupt(other.to_string()),
        }
    }
}

impl From<FlushError> for StorageError {
    fn from(error: FlushError) -> Self {
        StorageError::FsWrite(error.to_string())
    }
}

impl From<CompactionError> for StorageError {
    fn from(error: CompactionError) -> Self {
        match error {
            CompactionError::SSTable(e) => e.into(),
            CompactionError::Lifecycle(e) => e.into(),
            other => StorageError::FsWrite(other.to_string()),
        }
    }
}

impl From<TrackerError> for StorageError {
    fn from(error: TrackerError) -> Self {
        StorageError::Corrupt(error.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        StorageError::FsWrite(error.to_string())
    }
}
