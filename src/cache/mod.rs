//! # Row Cache Service
//!
//! Keeps the head of hot partitions in memory so point reads can skip the
//! merge entirely when the cached slice provably covers the filter.
//!
//! Entries hold at most `rows_per_partition` leading rows of the
//! reconciled, live partition; an entry that holds *every* live row is
//! marked complete. The cover check in the read path serves from cache
//! only when completeness (or an explicit-names subset, or a row limit
//! within the cached head) guarantees no missing row.
//!
//! Per-table invalidation bumps an epoch embedded in the cache key; stale
//! entries become unreachable and age out of the LRU.
//!
//! The engine context can be built with the cache disabled, which turns
//! every operation into a no-op (the substitution unit tests rely on).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use quick_cache::sync::Cache;
use tracing::trace;

use crate::data::{ClusteringFilter, DataLimits, DecoratedKey, PartitionUpdate, Row, TableId};

// ------------------------------------------------------------------------------------------------
// Keys and entries
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowCacheKey {
    table: TableId,
    epoch: u64,
    key: Vec<u8>,
}

/// Cached head of one partition.
#[derive(Debug)]
pub struct CachedPartition {
    /// Leading live rows, already reconciled and filtered for liveness.
    pub rows: Vec<Row>,

    /// True when `rows` holds every live row of the partition.
    pub complete: bool,
}

impl CachedPartition {
    /// True when serving `rows` alone cannot miss data the filter wants.
    pub fn covers(&self, filter: &ClusteringFilter, limits: &DataLimits) -> bool {
        if self.complete {
            return true;
        }
        if let Some(wanted) = filter.selected_count() {
            // Explicit names: covered when every wanted clustering is in
            // the cached head.
            let hits = self
                .rows
                .iter()
                .filter(|row| filter.selects(&row.clustering))
                .count();
            return hits >= wanted;
        }
        // Unbounded filter: only a row limit inside the cached head makes
        // the head sufficient.
        filter.is_all() && limits.row_limit <= self.rows.len()
    }
}

// ------------------------------------------------------------------------------------------------
// Service
// ------------------------------------------------------------------------------------------------

struct RowCache {
    cache: Cache<RowCacheKey, Arc<CachedPartition>>,
    rows_per_partition: usize,
    epochs: RwLock<HashMap<TableId, u64>>,
}

/// Cache dependency handed to every table store through the engine
/// context.
pub struct CacheService {
    row_cache: Option<RowCache>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("row_cache_enabled", &self.row_cache.is_some())
            .finish()
    }
}

impl CacheService {
    /// Service with a row cache of `capacity` partitions keeping
    /// `rows_per_partition` rows each.
    pub fn new(capacity: usize, rows_per_partition: usize) -> Self {
        Self {
            row_cache: Some(RowCache {
                cache: Cache::new(capacity.max(1)),
                rows_per_partition: rows_per_partition.max(1),
                epochs: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Service with caching off; every operation is a no-op.
    pub fn disabled() -> Self {
        Self { row_cache: None }
    }

    /// True when the row cache is usable.
    pub fn enabled(&self) -> bool {
        self.row_cache.is_some()
    }

    fn epoch(cache: &RowCache, table: TableId) -> u64 {
        cache
            .epochs
            .read()
            .ok()
            .and_then(|epochs| epochs.get(&table).copied())
            .unwrap_or(0)
    }

    /// Cached head for `(table, key)`, if present.
    pub fn lookup(&self, table: TableId, key: &DecoratedKey) -> Option<Arc<CachedPartition>> {
        let cache = self.row_cache.as_ref()?;
        let entry = cache.cache.get(&RowCacheKey {
            table,
            epoch: Self::epoch(cache, table),
            key: key.key.clone(),
        });
        if entry.is_some() {
            trace!(%table, %key, "row cache hit");
        }
        entry
    }

    /// Store the reconciled partition's head after a read miss.
    pub fn populate(
        &self,
        table: TableId,
        key: &DecoratedKey,
        update: &PartitionUpdate,
        now_seconds: u32,
    ) {
        let Some(cache) = self.row_cache.as_ref() else {
            return;
        };
        let live = update.live_rows(now_seconds);
        let complete = live.len() <= cache.rows_per_partition;
        let rows: Vec<Row> = live.into_iter().take(cache.rows_per_partition).collect();

        cache.cache.insert(
            RowCacheKey {
                table,
                epoch: Self::epoch(cache, table),
                key: key.key.clone(),
            },
            Arc::new(CachedPartition { rows, complete }),
        );
    }

    /// Drop one partition's entry (write path, after a put).
    pub fn invalidate(&self, table: TableId, key: &DecoratedKey) {
        if let Some(cache) = self.row_cache.as_ref() {
            cache.cache.remove(&RowCacheKey {
                table,
                epoch: Self::epoch(cache, table),
                key: key.key.clone(),
            });
        }
    }

    /// Drop every entry of a table (truncate, drop, invalidate).
    pub fn invalidate_table(&self, table: TableId) {
        if let Some(cache) = self.row_cache.as_ref()
            && let Ok(mut epochs) = cache.epochs.write()
        {
            *epochs.entry(table).or_insert(0) += 1;
        }
    }
}
