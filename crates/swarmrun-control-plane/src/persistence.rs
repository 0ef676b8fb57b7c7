//! Durable colony snapshots.
//!
//! A snapshot is the whole [`ColonyState`] as JSON. It is written to a
//! sibling temp file and renamed over the target, so a crash mid-write leaves
//! the previous snapshot intact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::colony::ColonyState;

/// Current snapshot file format.
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("unsupported snapshot format {0}")]
    UnsupportedFormat(u32),
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    format: u32,
    taken_at: DateTime<Utc>,
    state: ColonyState,
}

/// Reads and writes colony snapshots at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write `state` atomically.
    pub async fn save(&self, state: &ColonyState, now: DateTime<Utc>) -> Result<(), SnapshotError> {
        let file = SnapshotFile {
            format: FORMAT_VERSION,
            taken_at: now,
            state: state.clone(),
        };
        let bytes = serde_json::to_vec(&file)?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!(
            path = %self.path.display(),
            tasks = state.tasks.len(),
            workers = state.workers.len(),
            bytes = bytes.len(),
            "Snapshot written"
        );
        Ok(())
    }

    /// Load and recover the last snapshot. `None` if there is none yet.
    pub async fn load(&self, now: DateTime<Utc>) -> Result<Option<ColonyState>, SnapshotError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: SnapshotFile = serde_json::from_slice(&bytes)?;
        if file.format != FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedFormat(file.format));
        }

        let mut state = file.state;
        state.recover(now);
        info!(
            path = %self.path.display(),
            taken_at = %file.taken_at,
            tasks = state.tasks.len(),
            "Snapshot loaded"
        );
        Ok(Some(state))
    }
}
