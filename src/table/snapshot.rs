//! Snapshots: hard-link trees of the canonical live file set.
//!
//! A snapshot lives at `<table-dir>/snapshots/<tag>/` and holds one hard
//! link per component of every live sorted file, a `manifest.json` listing
//! the relative filenames, and a schema-reproducing text file. Ephemeral
//! snapshots add an empty `ephemeral.snapshot` marker and are deleted on
//! the next startup.
//!
//! Hard-link creation is rate-limited by `snapshot_links_per_second`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::flush::FlushReason;
use crate::sstable::Component;

use super::TableStore;

const SNAPSHOT_DIR: &str = "snapshots";
const BACKUP_DIR: &str = "backups";
const EPHEMERAL_MARKER: &str = "ephemeral.snapshot";
const MANIFEST_NAME: &str = "manifest.json";
const SCHEMA_NAME: &str = "schema.cql";

#[derive(Serialize)]
struct SnapshotManifest {
    files: Vec<String>,
}

/// Paces hard-link creation to a links-per-second budget.
struct LinkRateLimiter {
    interval: Option<Duration>,
    last: Instant,
}

impl LinkRateLimiter {
    fn new(links_per_second: usize) -> Self {
        Self {
            interval: (links_per_second > 0)
                .then(|| Duration::from_secs(1) / links_per_second as u32),
            last: Instant::now(),
        }
    }

    fn pace(&mut self) {
        if let Some(interval) = self.interval {
            let elapsed = self.last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
            self.last = Instant::now();
        }
    }
}

impl TableStore {
    /// Create a snapshot named `tag`.
    ///
    /// The memtable is flushed first so the snapshot covers everything
    /// applied before the call. Returns the snapshot directory.
    pub fn snapshot(&self, tag: &str, ephemeral: bool) -> Result<PathBuf, StorageError> {
        self.ensure_valid()?;
        if tag.is_empty() || tag.contains(std::path::is_separator) {
            return Err(StorageError::InvalidRequest(format!(
                "illegal snapshot tag {tag:?}"
            )));
        }

        // Everything in memory lands on disk before we link.
        let future = self.flush(FlushReason::Snapshot)?;
        future
            .wait()
            .map_err(|e| StorageError::FsWrite(e.to_string()))?
            .map_err(StorageError::from)?;

        let target = self.dirs[0].join(SNAPSHOT_DIR).join(tag);
        if target.exists() {
            return Err(StorageError::InvalidRequest(format!(
                "snapshot {tag:?} already exists"
            )));
        }
        fs::create_dir_all(&target)?;

        let mut limiter = LinkRateLimiter::new(self.config.snapshot_links_per_second);
        let mut manifest_files = Vec::new();

        // Canonical view: the live set as of now. Readers of the snapshot
        // see exactly these files regardless of later compactions.
        let view = self.tracker.view();
        for reader in &view.live {
            for component in Component::ALL {
                let source = reader.descriptor().path(component);
                let name = reader.descriptor().filename(component);
                limiter.pace();
                fs::hard_link(&source, target.join(&name))?;
                if component == Component::Data {
                    manifest_files.push(name);
                }
            }
        }

        let manifest = SnapshotManifest {
            files: manifest_files,
        };
        let manifest_json = serde_json::to_string(&manifest)
            .map_err(|e| StorageError::FsWrite(e.to_string()))?;
        fs::write(target.join(MANIFEST_NAME), manifest_json)?;

        fs::write(target.join(SCHEMA_NAME), self.schema_text())?;

        if ephemeral {
            fs::write(target.join(EPHEMERAL_MARKER), b"")?;
        }

        info!(
            table = %self.metadata.id,
            tag,
            files = view.live.len(),
            ephemeral,
            "snapshot created"
        );
        Ok(target)
    }

    /// Hard-link freshly flushed files into `backups/` when incremental
    /// backups are enabled.
    pub(crate) fn backup_links(&self, descriptors: &[crate::sstable::Descriptor]) {
        if !self.config.incremental_backups {
            return;
        }
        let target = self.dirs[0].join(BACKUP_DIR);
        if let Err(e) = fs::create_dir_all(&target) {
            warn!(error = %e, "failed to create backup directory");
            return;
        }
        for descriptor in descriptors {
            for component in Component::ALL {
                let source = descriptor.path(component);
                let link = target.join(descriptor.filename(component));
                if let Err(e) = fs::hard_link(&source, &link) {
                    warn!(file = %descriptor, error = %e, "incremental backup link failed");
                }
            }
        }
    }

    /// Reproduction of the table definition, written into each snapshot.
    fn schema_text(&self) -> String {
        format!(
            "-- table: {}.{}\n-- id: {}\n-- partitioner: {}\n",
            self.metadata.keyspace,
            self.metadata.name,
            self.metadata.id,
            self.metadata.partitioner.name()
        )
    }
}

/// Delete snapshots carrying the ephemeral marker (startup pass).
pub(crate) fn clear_ephemeral_snapshots(table_dir: &Path) {
    let root = table_dir.join(SNAPSHOT_DIR);
    let Ok(entries) = fs::read_dir(&root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.join(EPHEMERAL_MARKER).exists() {
            info!(snapshot = %path.display(), "removing ephemeral snapshot");
            if let Err(e) = fs::remove_dir_all(&path) {
                warn!(snapshot = %path.display(), error = %e, "failed to remove ephemeral snapshot");
            }
        }
    }
}
