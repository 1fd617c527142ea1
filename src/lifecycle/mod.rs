//! # Lifecycle Transactions
//!
//! Crash-safe multi-file mutation: "replace these sorted files with those".
//! Flush, compaction, scrub, and truncate all move files through one of
//! these transactions so a crash at any point leaves the table in either
//! the pre-commit or the post-commit state, never a mixture.
//!
//! ## Protocol
//!
//! 1. New files are written and fsynced (the sorted-file writer does this).
//! 2. [`LifecycleTransaction::prepare_to_commit`] writes a log file with
//!    one checksummed `ADD` record per new file and one `REMOVE` record per
//!    replaced file, then fsyncs the log and its directory.
//! 3. The caller swaps the tracker.
//! 4. [`LifecycleTransaction::commit`] appends a final `COMMIT` record,
//!    obsoletes the replaced files (waiting for in-flight readers to
//!    drain), and deletes the log.
//!
//! [`LifecycleTransaction::abort`] before commit deletes the new files,
//! keeps the old ones, and removes the log. Dropping an uncommitted
//! transaction aborts it.
//!
//! ## Crash recovery
//!
//! [`recover_directory`] runs at startup for every table directory. A log
//! whose `COMMIT` record is present and valid rolls forward (delete the
//! `REMOVE` set, delete the log); a log without one rolls back (delete the
//! `ADD` set, keep the `REMOVE` set). A committed log whose `ADD` set is
//! incomplete on disk is a startup failure: the bytes the commit promised
//! are gone. Recovery is idempotent; running it twice changes nothing.
//!
//! # On-disk layout
//!
//! One file per operation, `txn-<op>-<id>.log`:
//!
//! ```text
//! [REC_LEN_LE][RECORD_BYTES][REC_CRC32_LE]     ADD / REMOVE ...
//! [REC_LEN_LE][RECORD_BYTES][REC_CRC32_LE]     COMMIT
//! ```

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::sstable::{Descriptor, SSTableFormat, SSTableReader};

const U32_SIZE: usize = std::mem::size_of::<u32>();
const REF_DRAIN_WARN: Duration = Duration::from_secs(1);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by lifecycle transactions and recovery.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Operation not legal in the transaction's current state.
    #[error("illegal transaction state: {0}")]
    IllegalState(&'static str),

    /// Recovery found a committed log whose promised files are missing.
    #[error("startup failure: {0}")]
    StartupFailure(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Operation types
// ------------------------------------------------------------------------------------------------

/// What kind of operation a transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// Memtable flush producing new files.
    Flush,

    /// Background or requested compaction.
    Compaction,

    /// Corruption-skipping rewrite of one file.
    Scrub,

    /// Truncation obsoleting files wholesale.
    Truncate,

    /// User-supplied input set.
    UserDefined,
}

impl OperationType {
    /// Filename tag.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Flush => "flush",
            OperationType::Compaction => "compaction",
            OperationType::Scrub => "scrub",
            OperationType::Truncate => "truncate",
            OperationType::UserDefined => "user",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ------------------------------------------------------------------------------------------------
// Log records
// ------------------------------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum TxnRecord {
    Add {
        dir: String,
        generation: u64,
        format: SSTableFormat,
    },
    Remove {
        dir: String,
        generation: u64,
        format: SSTableFormat,
    },
    Commit,
}

fn format_tag(format: SSTableFormat) -> u8 {
    match format {
        SSTableFormat::Big => 0,
        SSTableFormat::Indexed => 1,
    }
}

fn format_from_tag(tag: u8) -> Result<SSTableFormat, EncodingError> {
    match tag {
        0 => Ok(SSTableFormat::Big),
        1 => Ok(SSTableFormat::Indexed),
        tag => Err(EncodingError::InvalidTag {
            tag,
            type_name: "SSTableFormat",
        }),
    }
}

impl Encode for TxnRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            TxnRecord::Add {
                dir,
                generation,
                format,
            } => {
                0u8.encode_to(buf)?;
                dir.encode_to(buf)?;
                generation.encode_to(buf)?;
                format_tag(*format).encode_to(buf)?;
            }
            TxnRecord::Remove {
                dir,
                generation,
                format,
            } => {
                1u8.encode_to(buf)?;
                dir.encode_to(buf)?;
                generation.encode_to(buf)?;
                format_tag(*format).encode_to(buf)?;
            }
            TxnRecord::Commit => {
                2u8.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for TxnRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (tag, n) = u8::decode_from(&buf[offset..])?;
        offset += n;
        match tag {
            0 | 1 => {
                let (dir, n) = String::decode_from(&buf[offset..])?;
                offset += n;
                let (generation, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (format_byte, n) = u8::decode_from(&buf[offset..])?;
                offset += n;
                let format = format_from_tag(format_byte)?;
                let record = if tag == 0 {
                    TxnRecord::Add {
                        dir,
                        generation,
                        format,
                    }
                } else {
                    TxnRecord::Remove {
                        dir,
                        generation,
                        format,
                    }
                };
                Ok((record, offset))
            }
            2 => Ok((TxnRecord::Commit, offset)),
            tag => Err(EncodingError::InvalidTag {
                tag,
                type_name: "TxnRecord",
            }),
        }
    }
}

fn record_for(descriptor: &Descriptor, add: bool) -> TxnRecord {
    let dir = descriptor.dir.to_string_lossy().into_owned();
    if add {
        TxnRecord::Add {
            dir,
            generation: descriptor.generation,
            format: descriptor.format,
        }
    } else {
        TxnRecord::Remove {
            dir,
            generation: descriptor.generation,
            format: descriptor.format,
        }
    }
}

fn descriptor_of(dir: &str, generation: u64, format: SSTableFormat) -> Descriptor {
    Descriptor::new(PathBuf::from(dir), generation, format)
}

// ------------------------------------------------------------------------------------------------
// Transaction
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Pending,
    Prepared,
    Committed,
    Aborted,
}

/// One crash-safe replace-files operation.
pub struct LifecycleTransaction {
    op: OperationType,
    log_path: PathBuf,
    log_dir: PathBuf,
    adds: Vec<Descriptor>,
    removes: Vec<Arc<SSTableReader>>,
    state: TxnState,
}

impl fmt::Debug for LifecycleTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleTransaction")
            .field("op", &self.op)
            .field("log", &self.log_path)
            .field("adds", &self.adds.len())
            .field("removes", &self.removes.len())
            .finish()
    }
}

impl LifecycleTransaction {
    /// Start a transaction whose log lives in `log_dir`.
    ///
    /// `id` must be unique within the directory; callers use the first new
    /// file's generation (or a fresh generation for remove-only
    /// operations).
    pub fn new(op: OperationType, log_dir: impl Into<PathBuf>, id: u64) -> Self {
        let log_dir = log_dir.into();
        let log_path = log_dir.join(format!("txn-{}-{id}.log", op.as_str()));
        Self {
            op,
            log_path,
            log_dir,
            adds: Vec::new(),
            removes: Vec::new(),
            state: TxnState::Pending,
        }
    }

    /// The operation this transaction belongs to.
    pub fn operation(&self) -> OperationType {
        self.op
    }

    /// Register a newly-written file (the out-set).
    pub fn track_new(&mut self, descriptor: Descriptor) -> Result<(), LifecycleError> {
        if self.state != TxnState::Pending {
            return Err(LifecycleError::IllegalState("track_new after prepare"));
        }
        self.adds.push(descriptor);
        Ok(())
    }

    /// Register a file this operation replaces (the in-set).
    pub fn track_obsolete(&mut self, reader: Arc<SSTableReader>) -> Result<(), LifecycleError> {
        if self.state != TxnState::Pending {
            return Err(LifecycleError::IllegalState("track_obsolete after prepare"));
        }
        self.removes.push(reader);
        Ok(())
    }

    /// Write the transaction log: every `ADD`, every `REMOVE`, fsynced.
    ///
    /// The new files themselves must already be durable (the writer seals
    /// and fsyncs them).
    pub fn prepare_to_commit(&mut self) -> Result<(), LifecycleError> {
        if self.state != TxnState::Pending {
            return Err(LifecycleError::IllegalState("prepare called twice"));
        }

        fs::create_dir_all(&self.log_dir)?;
        let mut log = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&self.log_path)?;

        for descriptor in &self.adds {
            append_record(&mut log, &record_for(descriptor, true))?;
        }
        for reader in &self.removes {
            append_record(&mut log, &record_for(reader.descriptor(), false))?;
        }
        log.sync_all()?;
        File::open(&self.log_dir)?.sync_all()?;

        debug!(
            log = %self.log_path.display(),
            adds = self.adds.len(),
            removes = self.removes.len(),
            "lifecycle transaction prepared"
        );
        self.state = TxnState::Prepared;
        Ok(())
    }

    /// Seal the swap: write the `COMMIT` record, obsolete the replaced
    /// files (waiting for readers to drain), and delete the log.
    ///
    /// The caller must have removed the in-set from the tracker first, so
    /// no new reader can acquire a replaced file.
    pub fn commit(mut self) -> Result<(), LifecycleError> {
        if self.state != TxnState::Prepared {
            return Err(LifecycleError::IllegalState("commit before prepare"));
        }

        {
            let mut log = OpenOptions::new().append(true).open(&self.log_path)?;
            append_record(&mut log, &TxnRecord::Commit)?;
            log.sync_all()?;
        }

        // Old files: deletion is deferred until in-flight readers finish.
        for reader in self.removes.drain(..) {
            reader.mark_obsolete();
            reader.await_released(REF_DRAIN_WARN);
        }

        fs::remove_file(&self.log_path)?;
        File::open(&self.log_dir)?.sync_all()?;

        info!(op = %self.op, log = %self.log_path.display(), "lifecycle transaction committed");
        self.state = TxnState::Committed;
        Ok(())
    }

    /// Undo: delete the new files, keep the old ones live, drop the log.
    pub fn abort(mut self) {
        self.abort_in_place();
    }

    fn abort_in_place(&mut self) {
        if matches!(self.state, TxnState::Committed | TxnState::Aborted) {
            return;
        }
        for descriptor in &self.adds {
            if let Err(e) = descriptor.delete_all() {
                warn!(file = %descriptor, error = %e, "failed to delete aborted transaction output");
            }
        }
        if self.log_path.exists()
            && let Err(e) = fs::remove_file(&self.log_path)
        {
            warn!(log = %self.log_path.display(), error = %e, "failed to delete aborted transaction log");
        }
        debug!(op = %self.op, "lifecycle transaction aborted");
        self.state = TxnState::Aborted;
    }
}

impl Drop for LifecycleTransaction {
    fn drop(&mut self) {
        // An uncommitted transaction cleans up after itself; crash paths
        // that never run this are covered by startup recovery.
        self.abort_in_place();
    }
}

fn append_record(log: &mut File, record: &TxnRecord) -> Result<(), LifecycleError> {
    let bytes = encoding::encode_to_vec(record)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| LifecycleError::Internal("oversized transaction record".into()))?;
    let len_bytes = len.to_le_bytes();

    let mut hasher = Crc32::new();
    hasher.update(&len_bytes);
    hasher.update(&bytes);
    let crc = hasher.finalize();

    log.write_all(&len_bytes)?;
    log.write_all(&bytes)?;
    log.write_all(&crc.to_le_bytes())?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Recovery
// ------------------------------------------------------------------------------------------------

/// Outcome of recovering one directory.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Logs rolled forward (commit record present, swap finished).
    pub rolled_forward: Vec<PathBuf>,

    /// Logs rolled back (no commit record, outputs deleted).
    pub rolled_back: Vec<PathBuf>,
}

/// Finish or reverse every unfinished transaction log in `dir`.
pub fn recover_directory(dir: &Path) -> Result<RecoveryReport, LifecycleError> {
    let mut report = RecoveryReport::default();
    if !dir.exists() {
        return Ok(report);
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !is_txn_log(&path) {
            continue;
        }
        recover_log(&path, &mut report)?;
    }
    Ok(report)
}

fn is_txn_log(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.starts_with("txn-") && name.ends_with(".log"))
}

fn recover_log(path: &Path, report: &mut RecoveryReport) -> Result<(), LifecycleError> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let mut adds = Vec::new();
    let mut removes = Vec::new();
    let mut committed = false;

    let mut offset = 0usize;
    while offset + U32_SIZE <= bytes.len() {
        let len = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        let payload_start = offset + U32_SIZE;
        let crc_start = payload_start + len;
        if crc_start + U32_SIZE > bytes.len() {
            warn!(log = %path.display(), "torn transaction record, treating as pre-commit");
            break;
        }

        let mut hasher = Crc32::new();
        hasher.update(&bytes[offset..payload_start]);
        hasher.update(&bytes[payload_start..crc_start]);
        let stored = u32::from_le_bytes([
            bytes[crc_start],
            bytes[crc_start + 1],
            bytes[crc_start + 2],
            bytes[crc_start + 3],
        ]);
        if hasher.finalize() != stored {
            warn!(log = %path.display(), offset, "damaged transaction record, treating as pre-commit");
            break;
        }

        let (record, _) = encoding::decode_from_slice::<TxnRecord>(
            &bytes[payload_start..crc_start],
        )?;
        match record {
            TxnRecord::Add {
                dir,
                generation,
                format,
            } => adds.push(descriptor_of(&dir, generation, format)),
            TxnRecord::Remove {
                dir,
                generation,
                format,
            } => removes.push(descriptor_of(&dir, generation, format)),
            TxnRecord::Commit => {
                committed = true;
                break;
            }
        }
        offset = crc_start + U32_SIZE;
    }

    if committed {
        // The swap happened: the ADD set is the truth. If any promised
        // file is incomplete the durable copies the commit relied on are
        // gone, and startup cannot silently continue.
        for descriptor in &adds {
            if !descriptor.is_complete() {
                return Err(LifecycleError::StartupFailure(format!(
                    "committed transaction {} references incomplete file {descriptor}",
                    path.display()
                )));
            }
        }
        for descriptor in &removes {
            if let Err(e) = descriptor.delete_all() {
                warn!(file = %descriptor, error = %e, "roll-forward failed to delete replaced file");
            }
        }
        fs::remove_file(path)?;
        info!(log = %path.display(), "transaction rolled forward");
        report.rolled_forward.push(path.to_path_buf());
    } else {
        // Pre-commit: the swap never happened. The REMOVE set stays; the
        // outputs go.
        for descriptor in &adds {
            if let Err(e) = descriptor.delete_all() {
                warn!(file = %descriptor, error = %e, "roll-back failed to delete output file");
            }
        }
        fs::remove_file(path)?;
        info!(log = %path.display(), "transaction rolled back");
        report.rolled_back.push(path.to_path_buf());
    }
    Ok(())
}
