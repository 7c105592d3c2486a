//! Durable single-file snapshots of the embedding cache.
//!
//! A [`Snapshot`] is a versioned JSON document. [`FileSnapshotStore`] writes it
//! to `<path>.tmp` and renames it over the target, so a reader never sees a
//! partially written file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::types::CachedEmbedding;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: CachedEmbedding,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn new(created_at: DateTime<Utc>, entries: Vec<SnapshotEntry>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            created_at,
            entries,
        }
    }
}

/// Durable storage for cache snapshots.
///
/// Methods are blocking; the cache calls them from `spawn_blocking`.
pub trait SnapshotStore: Send + Sync {
    /// Returns `Ok(None)` when no snapshot has been written yet.
    fn load(&self) -> Result<Option<Snapshot>>;

    fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Snapshot store backed by one JSON file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read snapshot: {}", self.path.display()))?;
        let snapshot: Snapshot =
            serde_json::from_str(&json).context("failed to parse snapshot JSON")?;

        anyhow::ensure!(
            snapshot.version == SNAPSHOT_VERSION,
            "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
            snapshot.version
        );

        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let json = serde_json::to_vec(snapshot).context("failed to serialize snapshot")?;
        let tmp_path = self.tmp_path();
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("failed to write temp file: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path).context("failed to rename temp snapshot")?;

        tracing::debug!(
            path = %self.path.display(),
            entries = snapshot.entries.len(),
            bytes = json.len(),
            "snapshot written"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
