//! Usage persistence
//!
//! State is stored as a single JSON document holding every user's history
//! and totals. Writes go to a sibling temp file that is then renamed over
//! the target, so a crash mid-write leaves the previous snapshot intact.
//! Storage failures never reach the metering path: `load` degrades to
//! `None` and `save` to `false`, both with a log line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokmeter_core::aggregation_types::UserAggregate;
use tokmeter_core::error::Result;
use tokmeter_core::{UsageRecord, UserId};
use tracing::{debug, error, warn};

/// On-disk document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSnapshot {
    #[serde(default)]
    pub history: HashMap<UserId, Vec<UsageRecord>>,
    #[serde(default)]
    pub totals: HashMap<UserId, UserAggregate>,
    pub last_saved: DateTime<Utc>,
}

/// Reads and writes the usage snapshot
#[derive(Debug, Clone)]
pub struct UsageStorage {
    /// `None` keeps everything in memory
    path: Option<PathBuf>,
}

impl UsageStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Storage that never touches disk
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the snapshot, or `None` if it is missing or unreadable
    pub fn load(&self) -> Option<StorageSnapshot> {
        let path = self.path.as_ref()?;

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No usage data at {}", path.display());
                return None;
            }
            Err(e) => {
                warn!("Failed to read usage data {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<StorageSnapshot>(&content) {
            Ok(snapshot) => {
                debug!(
                    "Loaded usage data for {} users from {}",
                    snapshot.totals.len().max(snapshot.history.len()),
                    path.display()
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(
                    "Ignoring incompatible usage data {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Write a snapshot; returns whether it reached disk
    ///
    /// In-memory storage always reports success.
    pub fn save(
        &self,
        history: &HashMap<UserId, Vec<UsageRecord>>,
        totals: &HashMap<UserId, UserAggregate>,
    ) -> bool {
        let Some(path) = &self.path else {
            return true;
        };

        match Self::write_snapshot(path, history, totals) {
            Ok(()) => {
                debug!("Saved usage data to {}", path.display());
                true
            }
            Err(e) => {
                error!("Failed to save usage data to {}: {}", path.display(), e);
                false
            }
        }
    }

    fn write_snapshot(
        path: &Path,
        history: &HashMap<UserId, Vec<UsageRecord>>,
        totals: &HashMap<UserId, UserAggregate>,
    ) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SnapshotRef<'a> {
            history: &'a HashMap<UserId, Vec<UsageRecord>>,
            totals: &'a HashMap<UserId, UserAggregate>,
            last_saved: DateTime<Utc>,
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&SnapshotRef {
            history,
            totals,
            last_saved: Utc::now(),
        })?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
