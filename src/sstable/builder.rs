//! Sorted-file writer: builds a complete component set from a sorted
//! partition stream.
//!
//! # Input Requirements
//!
//! - Partitions must be appended in strictly increasing key order; each
//!   key at most once (the flush and compaction paths merge beforehand).
//! - Empty updates must be filtered out by the caller.
//!
//! # Output Guarantees
//!
//! - Every block is CRC-framed; every component carries a validated header.
//! - All components are fsynced, then the directory is fsynced, before
//!   [`SSTableWriter::finish`] returns. A crash before the enclosing
//!   lifecycle transaction commits leaves files that startup recovery
//!   deletes; a crash after leaves a complete, valid set.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::data::{DecoratedKey, PartitionUpdate};
use crate::encoding;

use super::{
    Component, Descriptor, IndexEntry, SSTableError, StatsMetadata, UNREPAIRED,
    component_header_bytes, new_bloom,
};

// ------------------------------------------------------------------------------------------------
// Build statistics accumulator
// ------------------------------------------------------------------------------------------------

struct BuildStats {
    first_key: Option<DecoratedKey>,
    last_key: Option<DecoratedKey>,
    min_timestamp: i64,
    max_timestamp: i64,
    min_local_deletion_time: u32,
    partition_count: u64,
    row_count: u64,
    tombstone_count: u64,
}

impl BuildStats {
    fn new() -> Self {
        Self {
            first_key: None,
            last_key: None,
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            min_local_deletion_time: u32::MAX,
            partition_count: 0,
            row_count: 0,
            tombstone_count: 0,
        }
    }

    fn track(&mut self, key: &DecoratedKey, update: &PartitionUpdate) {
        if self.first_key.is_none() {
            self.first_key = Some(key.clone());
        }
        self.last_key = Some(key.clone());
        self.partition_count += 1;
        self.row_count += update.rows.len() as u64 + u64::from(update.static_row.is_some());
        self.tombstone_count += update.tombstone_count();
        self.min_timestamp = self.min_timestamp.min(update.min_timestamp());
        self.max_timestamp = self.max_timestamp.max(update.max_timestamp());
        self.min_local_deletion_time = self
            .min_local_deletion_time
            .min(update.min_local_deletion_time());
    }
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Streaming builder for one sorted file.
pub struct SSTableWriter {
    descriptor: Descriptor,
    data: BufWriter<File>,
    data_offset: u64,
    index: Vec<IndexEntry>,
    keys: Vec<Vec<u8>>,
    stats: BuildStats,
    repaired_at: u64,
    pending_repair: Option<u128>,
    max_data_age: u64,
}

impl SSTableWriter {
    /// Create the data component and start writing.
    pub fn create(descriptor: Descriptor) -> Result<Self, SSTableError> {
        fs::create_dir_all(&descriptor.dir)?;
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(descriptor.path(Component::Data))?;
        let mut data = BufWriter::new(file);

        let header = component_header_bytes();
        data.write_all(&header)?;

        trace!(file = %descriptor, "sorted file writer opened");
        Ok(Self {
            descriptor,
            data,
            data_offset: header.len() as u64,
            index: Vec::new(),
            keys: Vec::new(),
            stats: BuildStats::new(),
            repaired_at: UNREPAIRED,
            pending_repair: None,
            max_data_age: now_millis(),
        })
    }

    /// The descriptor being written.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Carry a repair timestamp into the statistics (compaction of
    /// repaired inputs preserves it).
    pub fn set_repaired_at(&mut self, repaired_at: u64) {
        self.repaired_at = repaired_at;
    }

    /// Tag the file with an in-progress repair session.
    pub fn set_pending_repair(&mut self, session: Option<u128>) {
        self.pending_repair = session;
    }

    /// Override the data-age bound (compaction outputs inherit the maximum
    /// of their inputs rather than the build time).
    pub fn set_max_data_age(&mut self, max_data_age: u64) {
        self.max_data_age = max_data_age;
    }

    /// Append one partition. Keys must arrive in strictly increasing order.
    pub fn append(&mut self, update: &PartitionUpdate) -> Result<(), SSTableError> {
        if update.is_empty() {
            return Ok(());
        }
        let key = &update.key;
        if let Some(last) = &self.stats.last_key
            && key <= last
        {
            return Err(SSTableError::Internal(format!(
                "partitions appended out of order: {key} after {last}"
            )));
        }

        let payload = encoding::encode_to_vec(update)?;
        let length = self.write_block(&payload)?;

        self.index.push(IndexEntry {
            token: key.token,
            key: key.key.clone(),
            offset: self.data_offset,
            length,
        });
        self.data_offset += length;
        self.keys.push(key.key.clone());
        self.stats.track(key, update);
        Ok(())
    }

    /// Number of partitions appended so far.
    pub fn partition_count(&self) -> u64 {
        self.stats.partition_count
    }

    fn write_block(&mut self, payload: &[u8]) -> Result<u64, SSTableError> {
        let len = u32::try_from(payload.len())
            .map_err(|_| SSTableError::Internal("partition exceeds 4 GiB".into()))?;
        let len_bytes = len.to_le_bytes();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_bytes);
        hasher.update(payload);
        let crc = hasher.finalize();

        self.data.write_all(&len_bytes)?;
        self.data.write_all(payload)?;
        self.data.write_all(&crc.to_le_bytes())?;

        Ok((len_bytes.len() + payload.len() + 4) as u64)
    }

    /// Seal the file: write the remaining components and fsync everything.
    ///
    /// Fails on an empty writer; callers skip shards with no content.
    pub fn finish(mut self) -> Result<(Descriptor, StatsMetadata), SSTableError> {
        let (first_key, last_key) = match (self.stats.first_key.take(), self.stats.last_key.take())
        {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(SSTableError::Internal(
                    "cannot seal a sorted file with no partitions".into(),
                ));
            }
        };

        // Data: flush and sync.
        self.data.flush()?;
        self.data.get_ref().sync_all()?;

        // Filter.
        let mut bloom = new_bloom(self.keys.len())?;
        for key in &self.keys {
            bloom.set(key.as_slice());
        }
        write_single_block_component(
            &self.descriptor,
            Component::Filter,
            bloom.as_slice(),
        )?;

        // Statistics.
        let stats = StatsMetadata {
            first_key,
            last_key,
            min_timestamp: self.stats.min_timestamp,
            max_timestamp: self.stats.max_timestamp,
            min_local_deletion_time: self.stats.min_local_deletion_time,
            partition_count: self.stats.partition_count,
            row_count: self.stats.row_count,
            tombstone_count: self.stats.tombstone_count,
            repaired_at: self.repaired_at,
            pending_repair: self.pending_repair,
            max_data_age: self.max_data_age,
        };
        let stats_bytes = encoding::encode_to_vec(&stats)?;
        write_single_block_component(&self.descriptor, Component::Statistics, &stats_bytes)?;

        // Index.
        let mut index_bytes = Vec::new();
        encoding::encode_vec(&self.index, &mut index_bytes)?;
        write_single_block_component(&self.descriptor, Component::Index, &index_bytes)?;

        // TOC last: its presence marks the set complete.
        let mut toc = String::new();
        for component in Component::ALL {
            toc.push_str(component.as_str());
            toc.push('\n');
        }
        let toc_path = self.descriptor.path(Component::Toc);
        {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&toc_path)?;
            file.write_all(toc.as_bytes())?;
            file.sync_all()?;
        }

        // Directory entry durability for every component.
        let dir = File::open(&self.descriptor.dir)?;
        dir.sync_all()?;

        debug!(
            file = %self.descriptor,
            partitions = stats.partition_count,
            rows = stats.row_count,
            "sorted file sealed"
        );
        Ok((self.descriptor, stats))
    }

    /// Abandon the build and remove everything written so far.
    pub fn abort(self) {
        let descriptor = self.descriptor.clone();
        drop(self);
        if let Err(e) = descriptor.delete_all() {
            tracing::warn!(file = %descriptor, error = %e, "failed to clean aborted writer");
        }
    }
}

fn write_single_block_component(
    descriptor: &Descriptor,
    component: Component,
    payload: &[u8],
) -> Result<(), SSTableError> {
    let path = descriptor.path(component);
    let mut file = OpenOptions::new().create_new(true).write(true).open(&path)?;

    file.write_all(&component_header_bytes())?;

    let len = u32::try_from(payload.len())
        .map_err(|_| SSTableError::Internal("component exceeds 4 GiB".into()))?;
    let len_bytes = len.to_le_bytes();
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&len_bytes);
    hasher.update(payload);
    let crc = hasher.finalize();

    file.write_all(&len_bytes)?;
    file.write_all(payload)?;
    file.write_all(&crc.to_le_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
