//! # Sorted File Module
//!
//! Immutable on-disk representation of flushed or compacted partitions,
//! sorted by partition key (token, then bytes). A sorted file is a set of
//! component files sharing a [`Descriptor`]: partition data, a primary
//! index, a bloom filter, statistics, and a table of contents.
//!
//! ## Design Overview
//!
//! The data component is a sequence of CRC-framed partition blocks; the
//! index component maps `(token, key)` to block offsets, so point lookups
//! binary-search the index and range scans walk a contiguous index slice.
//! The bloom filter answers "definitely absent" for point reads before any
//! data I/O happens.
//!
//! Readers memory-map the data component. All reads are lock-free; the file
//! is immutable once sealed.
//!
//! ## Reference counting and obsoletion
//!
//! A reader starts with one self-reference held on behalf of the tracker.
//! Scanners and pinned readers take additional references via
//! [`SSTableReader::try_ref`]; [`SSTableReader::mark_obsolete`] drops the
//! self-reference. Component files are deleted when the last reference
//! goes, never earlier, so an in-flight scan keeps bytes alive after the
//! file has left the live set.
//!
//! # On-disk layout (Data component)
//!
//! ```text
//! [MAGIC(4)][VERSION_LE(4)][HEADER_CRC32_LE(4)]
//! [BLOCK_LEN_LE][PARTITION_BYTES][BLOCK_CRC32_LE]
//! [BLOCK_LEN_LE][PARTITION_BYTES][BLOCK_CRC32_LE]
//! ...
//! ```
//!
//! Index, Filter, and Statistics carry the same header followed by a single
//! checksummed block. TOC is a plain text list of component names.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;
pub mod descriptor;
pub mod iterator;

#[cfg(test)]
pub(crate) mod tests;

pub use builder::SSTableWriter;
pub use descriptor::{Component, Descriptor, SSTableFormat};
pub use iterator::SSTableScanner;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::data::{DataRange, DecoratedKey, PartitionUpdate, Token};
use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const COMPONENT_MAGIC: [u8; 4] = *b"SSTC";
const COMPONENT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 12;
const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;
const U32_SIZE: usize = std::mem::size_of::<u32>();

/// Timestamp meaning "never repaired".
pub const UNREPAIRED: u64 = 0;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by sorted-file operations.
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A block or header failed its checksum.
    #[error("Checksum mismatch in {0}")]
    ChecksumMismatch(String),

    /// The file set is damaged beyond a single bad checksum.
    #[error("Corrupt sorted file: {0}")]
    Corrupt(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Statistics component
// ------------------------------------------------------------------------------------------------

/// Metadata describing one sealed sorted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsMetadata {
    /// Smallest partition key in the file.
    pub first_key: DecoratedKey,

    /// Largest partition key in the file.
    pub last_key: DecoratedKey,

    /// Smallest write timestamp in the file.
    pub min_timestamp: i64,

    /// Largest write timestamp in the file.
    pub max_timestamp: i64,

    /// Smallest tombstone local deletion time; `u32::MAX` when the file
    /// holds no tombstones. Drives tombstone GC scheduling.
    pub min_local_deletion_time: u32,

    /// Number of partitions.
    pub partition_count: u64,

    /// Number of rows across all partitions.
    pub row_count: u64,

    /// Number of tombstones of any kind.
    pub tombstone_count: u64,

    /// Repair grace timestamp; [`UNREPAIRED`] when never repaired.
    pub repaired_at: u64,

    /// Session id of an in-progress repair, if any.
    pub pending_repair: Option<u128>,

    /// Wall-clock milliseconds bounding the age of the newest data;
    /// truncation obsoletes files whose `max_data_age` falls at or below
    /// the truncation point.
    pub max_data_age: u64,
}

impl Encode for StatsMetadata {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.first_key.encode_to(buf)?;
        self.last_key.encode_to(buf)?;
        self.min_timestamp.encode_to(buf)?;
        self.max_timestamp.encode_to(buf)?;
        self.min_local_deletion_time.encode_to(buf)?;
        self.partition_count.encode_to(buf)?;
        self.row_count.encode_to(buf)?;
        self.tombstone_count.encode_to(buf)?;
        self.repaired_at.encode_to(buf)?;
        self.pending_repair.encode_to(buf)?;
        self.max_data_age.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for StatsMetadata {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (first_key, n) = DecoratedKey::decode_from(&buf[offset..])?;
        offset += n;
        let (last_key, n) = DecoratedKey::decode_from(&buf[offset..])?;
        offset += n;
        let (min_timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (max_timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (min_local_deletion_time, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (partition_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (row_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (tombstone_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (repaired_at, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (pending_repair, n) = Option::<u128>::decode_from(&buf[offset..])?;
        offset += n;
        let (max_data_age, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                first_key,
                last_key,
                min_timestamp,
                max_timestamp,
                min_local_deletion_time,
                partition_count,
                row_count,
                tombstone_count,
                repaired_at,
                pending_repair,
                max_data_age,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Index component
// ------------------------------------------------------------------------------------------------

/// One primary-index entry: partition location within the data component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Token of the partition key.
    pub token: Token,

    /// Raw partition-key bytes.
    pub key: Vec<u8>,

    /// Offset of the partition block within the data component.
    pub offset: u64,

    /// Length of the partition block including framing.
    pub length: u64,
}

impl Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.token.encode_to(buf)?;
        self.key.encode_to(buf)?;
        self.offset.encode_to(buf)?;
        self.length.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (token, n) = Token::decode_from(&buf[offset..])?;
        offset += n;
        let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (block_offset, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (length, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                token,
                key,
                offset: block_offset,
                length,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Component I/O helpers (shared with the builder)
// ------------------------------------------------------------------------------------------------

pub(crate) fn component_header_bytes() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE);
    bytes.extend_from_slice(&COMPONENT_MAGIC);
    bytes.extend_from_slice(&COMPONENT_VERSION.to_le_bytes());
    let mut hasher = Crc32::new();
    hasher.update(&bytes);
    let crc = hasher.finalize();
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes
}

pub(crate) fn validate_component_header(
    bytes: &[u8],
    what: &str,
) -> Result<(), SSTableError> {
    if bytes.len() < HEADER_SIZE {
        return Err(SSTableError::Corrupt(format!("{what}: truncated header")));
    }
    if bytes[..4] != COMPONENT_MAGIC {
        return Err(SSTableError::Corrupt(format!("{what}: bad magic")));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != COMPONENT_VERSION {
        return Err(SSTableError::Corrupt(format!(
            "{what}: unsupported version {version}"
        )));
    }
    let mut hasher = Crc32::new();
    hasher.update(&bytes[..8]);
    let stored = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    if hasher.finalize() != stored {
        return Err(SSTableError::ChecksumMismatch(format!("{what} header")));
    }
    Ok(())
}

/// Parse one `[len][bytes][crc]` block starting at `offset` of `bytes`.
pub(crate) fn read_block<'a>(
    bytes: &'a [u8],
    offset: usize,
    what: &str,
) -> Result<(&'a [u8], usize), SSTableError> {
    if bytes.len() < offset + U32_SIZE {
        return Err(SSTableError::Corrupt(format!("{what}: truncated length")));
    }
    let len = u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]) as usize;

    let payload_start = offset + U32_SIZE;
    let crc_start = payload_start + len;
    if bytes.len() < crc_start + U32_SIZE {
        return Err(SSTableError::Corrupt(format!("{what}: truncated block")));
    }
    let payload = &bytes[payload_start..crc_start];
    let stored = u32::from_le_bytes([
        bytes[crc_start],
        bytes[crc_start + 1],
        bytes[crc_start + 2],
        bytes[crc_start + 3],
    ]);

    let mut hasher = Crc32::new();
    hasher.update(&bytes[offset..payload_start]);
    hasher.update(payload);
    if hasher.finalize() != stored {
        return Err(SSTableError::ChecksumMismatch(what.to_string()));
    }

    Ok((payload, crc_start + U32_SIZE))
}

fn read_single_block_component(path: &Path, what: &str) -> Result<Vec<u8>, SSTableError> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    validate_component_header(&bytes, what)?;
    let (payload, _) = read_block(&bytes, HEADER_SIZE, what)?;
    Ok(payload.to_vec())
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Open handle on one sealed sorted file.
pub struct SSTableReader {
    descriptor: Descriptor,
    stats: StatsMetadata,
    bloom: Bloom<[u8]>,
    data: Mmap,
    index: Vec<IndexEntry>,

    /// Reference count. Starts at 1 (the tracker's self-reference); hits
    /// zero only after obsoletion plus every scanner release, at which
    /// point the component files are deleted.
    refs: AtomicUsize,
}

impl fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SSTableReader")
            .field("descriptor", &self.descriptor.to_string())
            .field("partitions", &self.stats.partition_count)
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SSTableReader {
    /// Open every component of `descriptor` and validate integrity.
    pub fn open(descriptor: Descriptor) -> Result<Arc<Self>, SSTableError> {
        // TOC first: a missing TOC means the set was never sealed.
        let toc = std::fs::read_to_string(descriptor.path(Component::Toc))?;
        for component in Component::ALL {
            if !toc.lines().any(|line| line == component.as_str()) {
                return Err(SSTableError::Corrupt(format!(
                    "{descriptor}: TOC missing {}",
                    component.as_str()
                )));
            }
        }

        let stats_bytes =
            read_single_block_component(&descriptor.path(Component::Statistics), "Statistics")?;
        let (stats, _) = encoding::decode_from_slice::<StatsMetadata>(&stats_bytes)?;

        let filter_bytes =
            read_single_block_component(&descriptor.path(Component::Filter), "Filter")?;
        let bloom = Bloom::from_slice(&filter_bytes)
            .map_err(|e| SSTableError::Corrupt(format!("{descriptor}: bloom: {e}")))?;

        let index_bytes =
            read_single_block_component(&descriptor.path(Component::Index), "Index")?;
        let (index, _) = encoding::decode_vec::<IndexEntry>(&index_bytes)?;

        let data_file = File::open(descriptor.path(Component::Data))?;
        // Safety: the mapping is read-only and the component files of a
        // sealed sorted file are never modified in place.
        let data = unsafe { Mmap::map(&data_file)? };
        if data.len() < HEADER_SIZE {
            return Err(SSTableError::Corrupt(format!("{descriptor}: empty data")));
        }
        validate_component_header(&data[..HEADER_SIZE], "Data")?;

        debug!(
            file = %descriptor,
            partitions = stats.partition_count,
            "sorted file opened"
        );

        Ok(Arc::new(Self {
            descriptor,
            stats,
            bloom,
            data,
            index,
            refs: AtomicUsize::new(1),
        }))
    }

    /// The file's identity.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Generation number, monotonic within the table.
    pub fn generation(&self) -> u64 {
        self.descriptor.generation
    }

    /// Statistics captured at seal time.
    pub fn stats(&self) -> &StatsMetadata {
        &self.stats
    }

    /// On-disk size of the data component.
    pub fn data_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// True when the file's key span may hold keys inside `range`.
    pub fn may_intersect(&self, range: &DataRange) -> bool {
        range.intersects(self.stats.first_key.token, self.stats.last_key.token)
    }

    /// Bloom-filter probe: false means the key is definitely absent.
    pub fn may_contain(&self, key: &DecoratedKey) -> bool {
        self.bloom.check(key.key.as_slice())
    }

    // --------------------------------------------------------------------
    // Reference counting
    // --------------------------------------------------------------------

    /// Acquire a reference, failing once the count has already drained to
    /// zero (file deletion is underway or done).
    pub fn try_ref(self: &Arc<Self>) -> Option<SSTableRef> {
        let mut current = self.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return None;
            }
            match self.refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(SSTableRef {
                        reader: Arc::clone(self),
                    });
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Current reference count.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// True once obsoletion released the self-reference and every reader
    /// has finished.
    pub fn is_released(&self) -> bool {
        self.refs.load(Ordering::Acquire) == 0
    }

    /// Drop the tracker's self-reference: the file leaves the live set and
    /// its bytes are deleted as soon as the last reader releases.
    ///
    /// Idempotent at the caller level only; the tracker guarantees a file
    /// is obsoleted once.
    pub fn mark_obsolete(&self) {
        trace!(file = %self.descriptor, "sorted file marked obsolete");
        self.release();
    }

    fn release(&self) {
        if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.delete_files();
        }
    }

    fn delete_files(&self) {
        debug!(file = %self.descriptor, "deleting obsolete sorted file");
        if let Err(e) = self.descriptor.delete_all() {
            warn!(file = %self.descriptor, error = %e, "failed to delete sorted file components");
        }
    }

    /// Wait until the last reference drains, warning every `warn_after`.
    ///
    /// Used by truncate and tests; the normal obsoletion path never blocks.
    pub fn await_released(&self, warn_after: Duration) {
        let mut last_warn = Instant::now();
        while !self.is_released() {
            if last_warn.elapsed() >= warn_after {
                warn!(
                    file = %self.descriptor,
                    refs = self.ref_count(),
                    "still waiting for sorted file references to drain"
                );
                last_warn = Instant::now();
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // --------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------

    /// Point lookup of one partition.
    pub fn get(&self, key: &DecoratedKey) -> Result<Option<PartitionUpdate>, SSTableError> {
        if key < &self.stats.first_key || key > &self.stats.last_key {
            return Ok(None);
        }
        if !self.may_contain(key) {
            return Ok(None);
        }

        let slot = self.index.binary_search_by(|entry| {
            (entry.token, entry.key.as_slice()).cmp(&(key.token, key.key.as_slice()))
        });
        let Ok(slot) = slot else {
            return Ok(None);
        };

        let entry = &self.index[slot];
        let update = self.read_partition(entry)?;
        Ok(Some(update))
    }

    /// Index entry at `slot`, if in range.
    pub(crate) fn index_entry(&self, slot: usize) -> Option<&IndexEntry> {
        self.index.get(slot)
    }

    /// Decode the partition block an index entry points at.
    pub(crate) fn read_partition(
        &self,
        entry: &IndexEntry,
    ) -> Result<PartitionUpdate, SSTableError> {
        let (payload, _) = read_block(&self.data, entry.offset as usize, "Data")?;
        let (update, _) = encoding::decode_from_slice::<PartitionUpdate>(payload)?;
        Ok(update)
    }

    /// Index positions of partitions intersecting `range`.
    pub(crate) fn index_range(&self, range: &DataRange) -> std::ops::Range<usize> {
        use crate::data::TokenBound;

        let start = match range.start {
            TokenBound::Unbounded => 0,
            TokenBound::Inclusive(token) => {
                self.index.partition_point(|e| e.token < token)
            }
            TokenBound::Exclusive(token) => {
                self.index.partition_point(|e| e.token <= token)
            }
        };
        let end = match range.end {
            TokenBound::Unbounded => self.index.len(),
            TokenBound::Inclusive(token) => {
                self.index.partition_point(|e| e.token <= token)
            }
            TokenBound::Exclusive(token) => {
                self.index.partition_point(|e| e.token < token)
            }
        };
        start..end.max(start)
    }

    /// Streaming scan over partitions intersecting `range`.
    ///
    /// The scanner holds a reference, keeping the bytes alive even if the
    /// file is obsoleted mid-scan. Fails when the file is already gone.
    pub fn scan(self: &Arc<Self>, range: &DataRange) -> Result<SSTableScanner, SSTableError> {
        let guard = self.try_ref().ok_or_else(|| {
            SSTableError::Internal(format!("{}: file already released", self.descriptor))
        })?;
        let positions = self.index_range(range);
        Ok(SSTableScanner::new(guard, positions))
    }
}

// ------------------------------------------------------------------------------------------------
// Reference guard
// ------------------------------------------------------------------------------------------------

/// A held reference to a sorted file; the bytes outlive the guard.
pub struct SSTableRef {
    reader: Arc<SSTableReader>,
}

impl SSTableRef {
    /// The guarded reader.
    pub fn reader(&self) -> &Arc<SSTableReader> {
        &self.reader
    }
}

impl fmt::Debug for SSTableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SSTableRef")
            .field("file", &self.reader.descriptor.to_string())
            .finish()
    }
}

impl Drop for SSTableRef {
    fn drop(&mut self) {
        self.reader.release();
    }
}

/// Bloom-filter sizing shared by the builder.
pub(crate) fn new_bloom(expected_keys: usize) -> Result<Bloom<[u8]>, SSTableError> {
    Bloom::new_for_fp_rate(expected_keys.max(1), BLOOM_FALSE_POSITIVE_RATE)
        .map_err(|e| SSTableError::Internal(e.to_string()))
}
