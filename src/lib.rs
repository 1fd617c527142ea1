//! # ColumnaDB
//!
//! The per-table storage engine of a wide-column database: an embeddable
//! core that accepts partition-update mutations on a hot write path,
//! serves them from memory immediately, persists them to immutable sorted
//! files eventually, and keeps a strict ordering with the commit log so
//! that crash recovery is lossless.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       TableStore                           │
//! │  ┌────────────┐   ┌──────────────┐   ┌────────────────┐   │
//! │  │  Current    │   │  Flushing    │   │  Sorted files  │   │
//! │  │  memtable   │   │  memtables   │   │  (on disk)     │   │
//! │  └─────┬───────┘   └──────┬───────┘   └───────┬────────┘   │
//! │        │  switch + barrier│    flush          │            │
//! │        └──────────►       └─────────►         │            │
//! │                                               │            │
//! │  ┌────────────────────────────────────────────┘            │
//! │  │   Compaction (size-tiered / leveled / time-window /     │
//! │  │               unified), lifecycle transactions          │
//! │  └─────────────────────────────────────────────────────────│
//! │                                                            │
//! │  Tracker: immutable View published by replace              │
//! │  Commit log: positions, replay, discard-through            │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`table`] | Composition root — open, apply, read, flush, compact, snapshot, truncate |
//! | [`data`] | Partition keys, tokens, clusterings, cells, rows, updates, mutations |
//! | [`memtable`] | Sorted in-memory write buffer with commit-log position bounds |
//! | [`sstable`] | Immutable sorted files — descriptor, writer, mmap reader, refcounts |
//! | [`tracker`] | Atomic registry of live storage sources, publish-by-replace views |
//! | [`lifecycle`] | Crash-safe replace-set-of-files transactions with on-disk logs |
//! | [`flush`] | Memtable-to-disk pipeline with shard splitting and ordered post-flush |
//! | [`compaction`] | Strategy selection, merge execution, tombstone garbage collection |
//! | [`read`] | Merging read path with filters, limits, row cache, error containment |
//! | [`commitlog`] | Segment-based write-ahead log consumed by the engine |
//! | [`oporder`] | Epoch-based operation ordering barrier |
//! | [`executor`] | Bounded worker pools and the strictly-ordered serial lane |
//! | [`cache`] | Row cache service with cover checks |
//! | [`config`] | Recognized per-table options and validation |
//! | [`encoding`] | Deterministic wire format for everything on disk |
//!
//! ## Guarantees
//!
//! - **Durability** — with `durable_writes`, every acknowledged mutation
//!   is in the commit log and survives a process kill; replay restores it.
//! - **Flush ordering** — flush futures complete strictly in submission
//!   order; consecutive memtables are contiguous in the commit log.
//! - **View atomicity** — readers capture an immutable view; each write is
//!   entirely visible or entirely absent, whatever flushes and compactions
//!   run concurrently.
//! - **File lifecycle** — sorted files are reference-counted and swapped
//!   through crash-safe lifecycle transactions; recovery rolls every
//!   interrupted swap forward or back, never halfway.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! use columnadb::cache::CacheService;
//! use columnadb::commitlog::{DEFAULT_SEGMENT_SIZE, SegmentedCommitLog};
//! use columnadb::compaction::CompactionManager;
//! use columnadb::config::TableConfig;
//! use columnadb::data::cells::Cell;
//! use columnadb::data::clustering::Clustering;
//! use columnadb::data::{
//!     DecoratedKey, HashPartitioner, Mutation, PartitionUpdate, Row, TableId,
//! };
//! use columnadb::read::ReadCommand;
//! use columnadb::table::{EngineContext, TableMetadata, TableStore};
//!
//! let commit_log = Arc::new(
//!     SegmentedCommitLog::open("/var/data/commitlog", DEFAULT_SEGMENT_SIZE).unwrap(),
//! );
//! let context = EngineContext {
//!     commit_log,
//!     compaction: CompactionManager::new(2),
//!     cache: Arc::new(CacheService::new(1024, 100)),
//! };
//! let metadata = TableMetadata {
//!     keyspace: "ks".into(),
//!     name: "events".into(),
//!     id: TableId(1),
//!     partitioner: Arc::new(HashPartitioner),
//! };
//! let store = TableStore::open(
//!     &[PathBuf::from("/var/data")],
//!     metadata,
//!     TableConfig::default(),
//!     context,
//! )
//! .unwrap();
//!
//! // Write one row.
//! let key = DecoratedKey::new(&HashPartitioner, b"user-1".to_vec()).unwrap();
//! let update = PartitionUpdate::new(TableId(1), key.clone()).with_row(
//!     Row::new(Clustering::row(vec![b"2026-08-01".to_vec()]))
//!         .with_cell(1, Cell::live(1_000, b"payload".to_vec())),
//! );
//! let mutation = Mutation::new("ks", key.clone()).with(update).unwrap();
//! store.apply(&mutation).unwrap();
//!
//! // Read it back.
//! let response = store.read(&ReadCommand::point(TableId(1), key, 1_000)).unwrap();
//! assert_eq!(response.row_count(), 1);
//! ```

pub mod cache;
pub mod commitlog;
pub mod compaction;
pub mod config;
pub mod data;
pub mod encoding;
pub mod error;
pub mod executor;
pub mod flush;
pub mod lifecycle;
pub mod memtable;
pub mod oporder;
pub mod read;
pub mod sstable;
pub mod table;
pub mod tracker;

pub use error::StorageError;
