//! Snapshot naming and retention.
//!
//! The backup directory listing is the only record of which snapshots exist.
//! A snapshot is a regular file named `minecraft-backup-<unix-seconds>.tar.gz`;
//! anything else in the directory is left alone.

use crate::utils::errors::{ManagerError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SNAPSHOT_PREFIX: &str = "minecraft-backup-";
pub const SNAPSHOT_SUFFIX: &str = ".tar.gz";

/// A snapshot archive found in the backup directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotRecord {
    // Field order gives the (timestamp, path) ordering retention relies on.
    pub timestamp: u64,
    pub path: PathBuf,
}

impl SnapshotRecord {
    /// Build a record from a path whose file name follows the snapshot pattern.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let timestamp = parse_snapshot_name(name)?;
        Some(Self {
            timestamp,
            path: path.to_path_buf(),
        })
    }
}

/// File name for a snapshot taken at `timestamp`.
pub fn snapshot_file_name(timestamp: u64) -> String {
    format!("{}{}{}", SNAPSHOT_PREFIX, timestamp, SNAPSHOT_SUFFIX)
}

/// Parse the timestamp out of a snapshot file name.
///
/// Returns `None` unless the name is exactly prefix, decimal seconds, suffix.
pub fn parse_snapshot_name(name: &str) -> Option<u64> {
    let digits = name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// List the snapshots in `backup_dir`, oldest first.
pub fn list_snapshots(backup_dir: &Path) -> Result<Vec<SnapshotRecord>> {
    let mut snapshots = Vec::new();

    for entry in fs::read_dir(backup_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(record) = SnapshotRecord::from_path(&entry.path()) {
            snapshots.push(record);
        }
    }

    snapshots.sort();
    Ok(snapshots)
}

/// The most recent snapshot in `backup_dir`, if any.
pub fn latest_snapshot(backup_dir: &Path) -> Result<Option<SnapshotRecord>> {
    Ok(list_snapshots(backup_dir)?.pop())
}

/// Choose which snapshots to delete so at most `max_keep` remain.
///
/// Returns the `len - max_keep` oldest paths, ordered by timestamp and then
/// by path. Returns nothing when there are `max_keep` or fewer snapshots.
pub fn select_for_deletion(snapshots: &[SnapshotRecord], max_keep: usize) -> Vec<PathBuf> {
    if snapshots.len() <= max_keep {
        return Vec::new();
    }

    let mut ordered: Vec<&SnapshotRecord> = snapshots.iter().collect();
    ordered.sort();
    ordered
        .into_iter()
        .take(snapshots.len() - max_keep)
        .map(|record| record.path.clone())
        .collect()
}

/// Delete `paths`, continuing past failures. Returns how many were deleted.
pub fn delete_snapshots(paths: &[PathBuf]) -> usize {
    let mut deleted = 0;

    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => deleted += 1,
            Err(source) => {
                let err = ManagerError::RetentionDelete {
                    path: path.clone(),
                    source,
                };
                warn!("{}", err);
            }
        }
    }

    deleted
}

/// Apply retention to `backup_dir`, returning the number of deleted snapshots.
pub fn enforce(backup_dir: &Path, max_keep: usize) -> Result<usize> {
    let snapshots = list_snapshots(backup_dir)?;
    let doomed = select_for_deletion(&snapshots, max_keep);
    if doomed.is_empty() {
        return Ok(0);
    }

    info!("Deleting {} old backup(s)...", doomed.len());
    let deleted = delete_snapshots(&doomed);
    info!(deleted, requested = doomed.len(), "Deleted old backup(s)");
    Ok(deleted)
}
