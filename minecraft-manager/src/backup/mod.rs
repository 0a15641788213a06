//! Snapshot backups of the server directory.

pub mod retention;
pub mod scheduler;
pub mod service;

pub use retention::SnapshotRecord;
pub use scheduler::BackupScheduler;
pub use service::BackupService;

use crate::archive::{normalize_suffixes, SnapshotFilter};
use crate::config::Config;
use std::fs;
use std::path::{Path, PathBuf};

/// Extension of the server executables copied next to the snapshots.
pub const SERVER_EXECUTABLE_EXTENSION: &str = "jar";

/// Settings for one snapshot or restore, built fresh for every operation.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Server directory being captured
    pub source_dir: PathBuf,

    /// Directory holding snapshots and executable copies
    pub dest_dir: PathBuf,

    /// Paths, relative to `source_dir`, left out of snapshots
    pub excluded_paths: Vec<String>,

    /// Normalised extensions (always starting with `.`) left out of snapshots
    pub excluded_suffixes: Vec<String>,

    /// Snapshots kept before the oldest are deleted
    pub max_keep: usize,
}

impl BackupConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_dir: config.server.server_dir(),
            dest_dir: config.backup.dir.clone(),
            excluded_paths: config
                .backup
                .excluded_files
                .iter()
                .filter(|p| !p.trim().is_empty())
                .cloned()
                .collect(),
            excluded_suffixes: normalize_suffixes(&config.backup.excluded_file_types),
            max_keep: config.backup.max_backups,
        }
    }

    /// The archive filter for a snapshot, given the current executable names.
    pub fn filter(&self, executable_names: &[String]) -> SnapshotFilter {
        SnapshotFilter::new(&self.excluded_paths, &self.excluded_suffixes, executable_names)
    }
}

/// Server executables (`*.jar`) directly inside `server_dir`.
pub fn server_executables(server_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut executables = Vec::new();

    for entry in fs::read_dir(server_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_jar = path
            .extension()
            .is_some_and(|ext| ext == SERVER_EXECUTABLE_EXTENSION);
        if is_jar && entry.file_type()?.is_file() {
            executables.push(path);
        }
    }

    executables.sort();
    Ok(executables)
}

/// File names of `paths`.
pub fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .collect()
}
