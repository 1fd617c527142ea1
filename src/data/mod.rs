//! # Partition Data Model
//!
//! Core value types shared by every engine layer: partition keys and their
//! partitioner-derived tokens, clustering prefixes, cells, rows, deletion
//! markers, partition updates, and mutations.
//!
//! ## Design Invariants
//!
//! - Two partition keys compare first by token, then by raw key bytes.
//! - Clustering prefixes order across kinds so that range-tombstone bounds
//!   sort correctly against the rows they bracket; a boundary compares as
//!   both an end and a start at the same position.
//! - A [`PartitionUpdate`](update::PartitionUpdate) only ever grows under
//!   merge; merging is commutative for cells at distinct (clustering, column)
//!   coordinates, and per-cell reconciliation is last-write-wins with a
//!   tombstone beating a value at equal timestamps.
//! - A [`Mutation`](update::Mutation) carries at most one update per table,
//!   all sharing the same partition key and keyspace.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod cells;
pub mod clustering;
mod encoding_impls;
pub mod filter;
pub mod update;

pub use cells::{Cell, ColumnId, DeletionTime, Row};
pub use clustering::{Clustering, ClusteringKind};
pub use filter::{ClusteringFilter, ColumnFilter, DataLimits, DataRange, TokenBound};
pub use update::{Mutation, PartitionUpdate, RangeTombstone};

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors raised while constructing or combining data-model values.
///
/// These surface to callers as invalid requests: nothing has been mutated
/// when one is returned.
#[derive(Debug, Error)]
pub enum DataError {
    /// A mutation was given an update whose partition key differs from the
    /// mutation's key.
    #[error("partition key mismatch within mutation")]
    KeyMismatch,

    /// A mutation already carries an update for this table.
    #[error("duplicate update for table {0}")]
    DuplicateTableUpdate(TableId),

    /// Empty partition keys are not addressable.
    #[error("empty partition key")]
    EmptyKey,

    /// A value exceeded the configured maximum cell size.
    #[error("value of {got} bytes exceeds limit of {limit} bytes")]
    OversizedValue {
        /// Size of the offending value.
        got: usize,
        /// Configured limit.
        limit: usize,
    },
}

// ------------------------------------------------------------------------------------------------
// Table identity
// ------------------------------------------------------------------------------------------------

/// Opaque identifier of a table within the schema namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ------------------------------------------------------------------------------------------------
// Tokens and partitioners
// ------------------------------------------------------------------------------------------------

/// A partitioner-derived position on the token ring.
///
/// Tokens are totally ordered; they are the primary sort dimension for
/// partition keys and the unit in which disk shard boundaries are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub i64);

impl Token {
    /// Smallest possible token.
    pub const MIN: Token = Token(i64::MIN);

    /// Largest possible token.
    pub const MAX: Token = Token(i64::MAX);
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps raw partition-key bytes onto the token ring.
///
/// The engine never interprets key bytes itself; all placement and range
/// pruning goes through the partitioner.
pub trait Partitioner: Send + Sync + fmt::Debug {
    /// Compute the token for a raw key.
    fn token(&self, key: &[u8]) -> Token;

    /// Short name used in logs and the snapshot schema file.
    fn name(&self) -> &'static str;

    /// Whether [`Partitioner::split_evenly`] produces meaningful boundaries.
    ///
    /// Order-preserving partitioners with unknown key distribution return
    /// false and are flushed as a single shard.
    fn supports_splitting(&self) -> bool {
        true
    }

    /// Split the full token span into `parts` weighted-equal ranges,
    /// returning the `parts - 1` interior boundaries in ascending order.
    fn split_evenly(&self, parts: usize) -> Vec<Token> {
        if parts <= 1 || !self.supports_splitting() {
            return Vec::new();
        }
        let span = u64::MAX / parts as u64;
        (1..parts)
            .map(|i| Token((i64::MIN as i128 + (span as i128 * i as i128)) as i64))
            .collect()
    }
}

/// Default partitioner: hashes key bytes to a uniformly distributed token.
///
/// The hash is a chunked mix over 8-byte little-endian blocks finished with
/// a 64-bit avalanche, so single-byte key differences move the token across
/// the whole ring.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashPartitioner;

impl HashPartitioner {
    fn avalanche(mut k: u64) -> u64 {
        k ^= k >> 33;
        k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
        k ^= k >> 33;
        k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        k ^= k >> 33;
        k
    }
}

impl Partitioner for HashPartitioner {
    fn token(&self, key: &[u8]) -> Token {
        let mut h: u64 = 0x9e37_79b9_7f4a_7c15 ^ (key.len() as u64);
        for chunk in key.chunks(8) {
            let mut block = [0u8; 8];
            block[..chunk.len()].copy_from_slice(chunk);
            h ^= Self::avalanche(u64::from_le_bytes(block));
            h = h.rotate_left(27).wrapping_mul(0x0000_0100_0000_01b3);
        }
        Token(Self::avalanche(h) as i64)
    }

    fn name(&self) -> &'static str {
        "hash"
    }
}

/// Order-preserving partitioner: the token is the first eight key bytes,
/// big-endian, offset so that byte order equals token order.
///
/// Useful when range scans over raw keys must map onto contiguous token
/// ranges (and in tests, where deterministic placement matters).
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderPreservingPartitioner;

impl Partitioner for OrderPreservingPartitioner {
    fn token(&self, key: &[u8]) -> Token {
        let mut block = [0u8; 8];
        let take = key.len().min(8);
        block[..take].copy_from_slice(&key[..take]);
        // Flip the sign bit so unsigned byte order maps onto signed order.
        Token((u64::from_be_bytes(block) ^ (1 << 63)) as i64)
    }

    fn name(&self) -> &'static str {
        "order-preserving"
    }

    fn supports_splitting(&self) -> bool {
        false
    }
}

/// Shared partitioner handle, stored once per table.
pub type PartitionerRef = Arc<dyn Partitioner>;

// ------------------------------------------------------------------------------------------------
// Decorated keys
// ------------------------------------------------------------------------------------------------

/// A partition key paired with its token.
///
/// Ordering is `(token, key bytes)`, which is the global sort order of
/// partitions in memtables and sorted files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecoratedKey {
    /// Partitioner-derived ring position.
    pub token: Token,

    /// Raw partition-key bytes.
    pub key: Vec<u8>,
}

impl DecoratedKey {
    /// Decorate raw key bytes with the given partitioner.
    pub fn new(partitioner: &dyn Partitioner, key: Vec<u8>) -> Result<Self, DataError> {
        if key.is_empty() {
            return Err(DataError::EmptyKey);
        }
        let token = partitioner.token(&key);
        Ok(Self { token, key })
    }

    /// Rebuild a decorated key from parts already read off disk.
    pub fn from_parts(token: Token, key: Vec<u8>) -> Self {
        Self { token, key }
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl fmt::Display for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.token)?;
        let shown = self.key.len().min(16);
        for byte in &self.key[..shown] {
            write!(f, "{byte:02x}")?;
        }
        if self.key.len() > shown {
            write!(f, "…[{} bytes]", self.key.len())?;
        }
        Ok(())
    }
}
