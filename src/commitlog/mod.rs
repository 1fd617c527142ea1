//! # Commit Log
//!
//! Segment-based write-ahead log consumed by the table store. Every durable
//! mutation is appended here before it is acknowledged; the memtable flush
//! pipeline later tells the log which prefix has been persisted to sorted
//! files so segments can be reclaimed.
//!
//! The engine only depends on the [`CommitLog`] trait: an opaque monotonic
//! [`CommitLogPosition`] cursor, an append operation, a replay iterator for
//! startup, and the "discard through position" contract. The file-backed
//! [`SegmentedCommitLog`] is the production implementation; tables created
//! with `durable_writes = false` use [`NoopCommitLog`].
//!
//! # On-disk layout
//!
//! Each segment file `segment-<id>.log` is:
//!
//! ```text
//! [HEADER_BYTES][HEADER_CRC32_LE]
//! [REC_LEN_LE][MUTATION_BYTES][REC_CRC32_LE]
//! [REC_LEN_LE][MUTATION_BYTES][REC_CRC32_LE]
//! ...
//! ```
//!
//! The header carries magic, version, and the segment id; each record CRC
//! covers `len || bytes`. Replay stops at the first damaged record of the
//! newest segment (a torn tail write) and reports corruption anywhere else.
//!
//! # Positions
//!
//! A position is `(segment id, byte offset)`, compared lexicographically.
//! [`CommitLog::add`] returns the position just *after* the appended record,
//! so a memtable's final position is ≥ the position of every mutation it
//! holds.
//!
//! # Dirty tracking
//!
//! The log remembers, per segment, the highest position at which each table
//! wrote. `discard_completed_segments(table, lower, upper)` clears that
//! table's claim on all segments wholly at or below `upper`; a segment whose
//! last claim disappears is deleted. The call is idempotent.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::data::{Mutation, TableId};
use crate::encoding::{self, Decode, Encode, EncodingError};

const U32_SIZE: usize = std::mem::size_of::<u32>();

/// Default size at which the active segment rotates (32 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 32 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by commit-log operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommitLogError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A record or header failed its checksum.
    #[error("Checksum mismatch in segment {segment} at offset {offset}")]
    ChecksumMismatch {
        /// Segment the damage was found in.
        segment: u64,
        /// Byte offset of the damaged record.
        offset: u64,
    },

    /// A segment header did not validate.
    #[error("Invalid segment header: {0}")]
    InvalidHeader(String),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Positions
// ------------------------------------------------------------------------------------------------

/// Opaque monotonic cursor into the commit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitLogPosition {
    /// Segment the position falls in.
    pub segment: u64,

    /// Byte offset within the segment.
    pub offset: u64,
}

impl CommitLogPosition {
    /// Position before any record ever written.
    pub const NONE: CommitLogPosition = CommitLogPosition {
        segment: 0,
        offset: 0,
    };
}

impl fmt::Display for CommitLogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.offset)
    }
}

impl Encode for CommitLogPosition {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.segment.encode_to(buf)?;
        self.offset.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for CommitLogPosition {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut n = 0;
        let (segment, used) = u64::decode_from(&buf[n..])?;
        n += used;
        let (offset, used) = u64::decode_from(&buf[n..])?;
        n += used;
        Ok((CommitLogPosition { segment, offset }, n))
    }
}

// ------------------------------------------------------------------------------------------------
// CommitLog contract
// ------------------------------------------------------------------------------------------------

/// The write-log contract the storage engine consumes.
pub trait CommitLog: Send + Sync + fmt::Debug {
    /// Cheap, monotonic: the position the next append would land at.
    fn current_position(&self) -> CommitLogPosition;

    /// Append a mutation, returning the position just after its record.
    fn add(&self, mutation: &Mutation) -> Result<CommitLogPosition, CommitLogError>;

    /// Release this table's claim on all segments wholly at or below
    /// `upper`; segments left with no claims are deleted. Idempotent.
    fn discard_completed_segments(
        &self,
        table: TableId,
        lower: CommitLogPosition,
        upper: CommitLogPosition,
    ) -> Result<(), CommitLogError>;

    /// Replay every surviving record with a position strictly above `from`,
    /// in log order.
    fn replay_from(
        &self,
        from: CommitLogPosition,
    ) -> Result<Vec<(CommitLogPosition, Mutation)>, CommitLogError>;
}

// ------------------------------------------------------------------------------------------------
// Segment header
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct SegmentHeader {
    magic: [u8; 4],
    version: u32,
    segment: u64,
}

impl SegmentHeader {
    const MAGIC: [u8; 4] = *b"CLSG";
    const VERSION: u32 = 1;

    /// `magic(4) + version(4) + segment(8)` plus the trailing CRC.
    const DISK_SIZE: usize = 16 + U32_SIZE;

    fn new(segment: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            segment,
        }
    }
}

impl Encode for SegmentHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.segment.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for SegmentHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut n = 0;
        let (magic, used) = <[u8; 4]>::decode_from(&buf[n..])?;
        n += used;
        let (version, used) = u32::decode_from(&buf[n..])?;
        n += used;
        let (segment, used) = u64::decode_from(&buf[n..])?;
        n += used;
        Ok((
            Self {
                magic,
                version,
                segment,
            },
            n,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Segmented commit log
// ------------------------------------------------------------------------------------------------

struct ActiveSegment {
    id: u64,
    file: File,
    offset: u64,
}

struct LogInner {
    active: ActiveSegment,

    /// Per segment: the highest position each table wrote at.
    dirty: BTreeMap<u64, HashMap<TableId, u64>>,
}

/// File-backed, segment-rotating commit log.
pub struct SegmentedCommitLog {
    dir: PathBuf,
    segment_size: u64,
    inner: Mutex<LogInner>,
}

impl fmt::Debug for SegmentedCommitLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentedCommitLog")
            .field("dir", &self.dir)
            .field("segment_size", &self.segment_size)
            .finish_non_exhaustive()
    }
}

impl SegmentedCommitLog {
    /// Open (or create) a commit log rooted at `dir`.
    ///
    /// Existing segments are scanned to rebuild per-table dirty claims; a
    /// fresh active segment is then started so recovery never appends into
    /// a possibly-torn file.
    pub fn open(dir: impl AsRef<Path>, segment_size: u64) -> Result<Self, CommitLogError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let existing = Self::list_segments(&dir)?;
        let next_id = existing.last().map_or(1, |&id| id + 1);

        let mut dirty: BTreeMap<u64, HashMap<TableId, u64>> = BTreeMap::new();
        for &segment in &existing {
            let claims = Self::scan_segment_claims(&dir, segment)?;
            if claims.is_empty() {
                // Fully-clean leftover segment, reclaim it now.
                let path = Self::segment_path(&dir, segment);
                if let Err(e) = fs::remove_file(&path) {
                    warn!(segment, error = %e, "failed to remove clean segment");
                }
            } else {
                dirty.insert(segment, claims);
            }
        }

        let active = Self::create_segment(&dir, next_id)?;
        info!(dir = %dir.display(), segment = next_id, "commit log opened");

        Ok(Self {
            dir,
            segment_size,
            inner: Mutex::new(LogInner { active, dirty }),
        })
    }

    fn segment_path(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("segment-{id:08}.log"))
    }

    fn parse_segment_id(path: &Path) -> Option<u64> {
        let name = path.file_name().and_then(OsStr::to_str)?;
        name.strip_prefix("segment-")?
            .strip_suffix(".log")?
            .parse()
            .ok()
    }

    fn list_segments(dir: &Path) -> Result<Vec<u64>, CommitLogError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(id) = Self::parse_segment_id(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn create_segment(dir: &Path, id: u64) -> Result<ActiveSegment, CommitLogError> {
        let path = Self::segment_path(dir, id);
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let header_bytes = encoding::encode_to_vec(&SegmentHeader::new(id))?;
        let checksum = compute_crc(&[&header_bytes]);
        file.write_all(&header_bytes)?;
        file.write_all(&checksum.to_le_bytes())?;
        file.sync_all()?;

        debug!(path = %path.display(), "commit log segment created");
        Ok(ActiveSegment {
            id,
            file,
            offset: SegmentHeader::DISK_SIZE as u64,
        })
    }

    /// Walk one segment and collect the highest write position per table.
    fn scan_segment_claims(
        dir: &Path,
        segment: u64,
    ) -> Result<HashMap<TableId, u64>, CommitLogError> {
        let mut claims = HashMap::new();
        Self::walk_segment(dir, segment, |position, mutation| {
            for table in mutation.updates.keys() {
                claims
                    .entry(*table)
                    .and_modify(|o: &mut u64| *o = (*o).max(position.offset))
                    .or_insert(position.offset);
            }
        })?;
        Ok(claims)
    }

    /// Iterate a segment's records, calling `visit` with the position just
    /// after each record. Stops quietly at a torn tail.
    fn walk_segment(
        dir: &Path,
        segment: u64,
        mut visit: impl FnMut(CommitLogPosition, Mutation),
    ) -> Result<(), CommitLogError> {
        let path = Self::segment_path(dir, segment);
        let mut file = File::open(&path)?;

        let mut header_bytes = vec![0u8; SegmentHeader::DISK_SIZE - U32_SIZE];
        file.read_exact(&mut header_bytes)?;
        let mut crc_bytes = [0u8; U32_SIZE];
        file.read_exact(&mut crc_bytes)?;
        if compute_crc(&[&header_bytes]) != u32::from_le_bytes(crc_bytes) {
            return Err(CommitLogError::InvalidHeader(format!(
                "segment {segment} header checksum mismatch"
            )));
        }
        let (header, _) = encoding::decode_from_slice::<SegmentHeader>(&header_bytes)?;
        if header.magic != SegmentHeader::MAGIC {
            return Err(CommitLogError::InvalidHeader("bad magic".into()));
        }
        if header.version != SegmentHeader::VERSION {
            return Err(CommitLogError::InvalidHeader(format!(
                "unsupported version {}",
                header.version
            )));
        }
        if header.segment != segment {
            return Err(CommitLogError::InvalidHeader("segment id mismatch".into()));
        }

        let mut offset = SegmentHeader::DISK_SIZE as u64;
        loop {
            file.seek(SeekFrom::Start(offset))?;

            let mut len_bytes = [0u8; U32_SIZE];
            match file.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(CommitLogError::Io(e)),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;

            let mut record_bytes = vec![0u8; len];
            if let Err(e) = file.read_exact(&mut record_bytes) {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    warn!(segment, offset, "torn record at segment tail");
                    break;
                }
                return Err(CommitLogError::Io(e));
            }
            let mut crc_bytes = [0u8; U32_SIZE];
            if let Err(e) = file.read_exact(&mut crc_bytes) {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    warn!(segment, offset, "torn checksum at segment tail");
                    break;
                }
                return Err(CommitLogError::Io(e));
            }

            if compute_crc(&[&len_bytes, &record_bytes]) != u32::from_le_bytes(crc_bytes) {
                warn!(segment, offset, "damaged commit log record, stopping");
                return Err(CommitLogError::ChecksumMismatch { segment, offset });
            }

            offset = file.stream_position()?;
            let (mutation, _) = encoding::decode_from_slice::<Mutation>(&record_bytes)?;
            visit(
                CommitLogPosition {
                    segment,
                    offset,
                },
                mutation,
            );
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LogInner>, CommitLogError> {
        self.inner
            .lock()
            .map_err(|_| CommitLogError::Internal("commit log lock poisoned".into()))
    }
}

impl CommitLog for SegmentedCommitLog {
    fn current_position(&self) -> CommitLogPosition {
        match self.inner.lock() {
            Ok(inner) => CommitLogPosition {
                segment: inner.active.id,
                offset: inner.active.offset,
            },
            Err(_) => CommitLogPosition::NONE,
        }
    }

    fn add(&self, mutation: &Mutation) -> Result<CommitLogPosition, CommitLogError> {
        let record_bytes = encoding::encode_to_vec(mutation)?;
        let len = u32::try_from(record_bytes.len())
            .map_err(|_| CommitLogError::Internal("mutation exceeds 4 GiB".into()))?;
        let len_bytes = len.to_le_bytes();
        let checksum = compute_crc(&[&len_bytes, &record_bytes]);

        let mut inner = self.lock()?;

        if inner.active.offset >= self.segment_size {
            let next = inner.active.id + 1;
            inner.active.file.sync_all()?;
            inner.active = Self::create_segment(&self.dir, next)?;
        }

        inner.active.file.write_all(&len_bytes)?;
        inner.active.file.write_all(&record_bytes)?;
        inner.active.file.write_all(&checksum.to_le_bytes())?;
        inner.active.file.sync_all()?;

        inner.active.offset += (U32_SIZE + record_bytes.len() + U32_SIZE) as u64;
        let position = CommitLogPosition {
            segment: inner.active.id,
            offset: inner.active.offset,
        };

        let segment = inner.active.id;
        for table in mutation.updates.keys() {
            inner
                .dirty
                .entry(segment)
                .or_default()
                .entry(*table)
                .and_modify(|o| *o = (*o).max(position.offset))
                .or_insert(position.offset);
        }

        trace!(%position, len, "mutation appended to commit log");
        Ok(position)
    }

    fn discard_completed_segments(
        &self,
        table: TableId,
        lower: CommitLogPosition,
        upper: CommitLogPosition,
    ) -> Result<(), CommitLogError> {
        let mut inner = self.lock()?;
        let active_id = inner.active.id;

        let mut emptied = Vec::new();
        for (&segment, claims) in inner.dirty.iter_mut() {
            if segment > upper.segment {
                break;
            }
            let covered = match claims.get(&table) {
                None => false,
                Some(&max_offset) => segment < upper.segment || max_offset <= upper.offset,
            };
            if covered {
                claims.remove(&table);
                if claims.is_empty() {
                    emptied.push(segment);
                }
            }
        }

        for segment in emptied {
            inner.dirty.remove(&segment);
            if segment == active_id {
                continue;
            }
            let path = Self::segment_path(&self.dir, segment);
            match fs::remove_file(&path) {
                Ok(()) => debug!(segment, %table, "commit log segment discarded"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(CommitLogError::Io(e)),
            }
        }

        debug!(%table, %lower, %upper, "commit log discard processed");
        Ok(())
    }

    fn replay_from(
        &self,
        from: CommitLogPosition,
    ) -> Result<Vec<(CommitLogPosition, Mutation)>, CommitLogError> {
        let segments = {
            let inner = self.lock()?;
            let mut ids: Vec<u64> = inner.dirty.keys().copied().collect();
            if !ids.contains(&inner.active.id) {
                ids.push(inner.active.id);
            }
            ids.sort_unstable();
            ids
        };

        let mut replayed = Vec::new();
        for segment in segments {
            if segment < from.segment {
                continue;
            }
            Self::walk_segment(&self.dir, segment, |position, mutation| {
                if position > from {
                    replayed.push((position, mutation));
                }
            })?;
        }

        info!(count = replayed.len(), %from, "commit log replay complete");
        Ok(replayed)
    }
}

// ------------------------------------------------------------------------------------------------
// No-op commit log
// ------------------------------------------------------------------------------------------------

/// Commit log for tables with `durable_writes = false` and for tests.
///
/// Positions still advance monotonically so flush bookkeeping behaves, but
/// nothing touches disk and replay finds nothing.
#[derive(Debug, Default)]
pub struct NoopCommitLog {
    counter: AtomicU64,
}

impl NoopCommitLog {
    /// A fresh no-op log starting at position 1:0.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommitLog for NoopCommitLog {
    fn current_position(&self) -> CommitLogPosition {
        CommitLogPosition {
            segment: 1,
            offset: self.counter.load(Ordering::Acquire),
        }
    }

    fn add(&self, _mutation: &Mutation) -> Result<CommitLogPosition, CommitLogError> {
        let offset = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(CommitLogPosition { segment: 1, offset })
    }

    fn discard_completed_segments(
        &self,
        _table: TableId,
        _lower: CommitLogPosition,
        _upper: CommitLogPosition,
    ) -> Result<(), CommitLogError> {
        Ok(())
    }

    fn replay_from(
        &self,
        _from: CommitLogPosition,
    ) -> Result<Vec<(CommitLogPosition, Mutation)>, CommitLogError> {
        Ok(Vec::new())
    }
}

// ------------------------------------------------------------------------------------------------
// CRC helpers
// ------------------------------------------------------------------------------------------------

fn compute_crc(parts: &[&[u8]]) -> u32 {
    let mut hasher = Crc32::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}
