//! Compressed snapshot archives (gzip-compressed tar).
//!
//! Archives are rooted at the base name of the archived directory, so a
//! snapshot of `/srv/minecraft` contains `minecraft/server.properties`,
//! `minecraft/world/level.dat` and so on. Files are streamed into the
//! encoder one at a time; nothing buffers a whole tree in memory.

pub mod filter;

pub use filter::{normalize_suffix, normalize_suffixes, SnapshotFilter};

use crate::utils::errors::{ManagerError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extension added to an archive while it is being written.
const PARTIAL_EXTENSION: &str = "partial";

/// Summary of a finished archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Archive `source_dir` into `dest_path`, keeping only entries accepted by `keep`.
///
/// `keep` receives each path relative to `source_dir` and whether that entry
/// is a directory. The archive is first written
/// next to `dest_path` with a `.partial` extension and renamed once complete;
/// on failure the partial file is removed.
pub fn create_archive<F>(source_dir: &Path, dest_path: &Path, keep: F) -> Result<ArchiveStats>
where
    F: Fn(&Path, bool) -> bool,
{
    if !source_dir.is_dir() {
        return Err(ManagerError::Archive(format!(
            "source is not a directory: {}",
            source_dir.display()
        )));
    }

    let root_name = source_dir
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        .or_else(|| source_dir.file_name().map(|n| n.to_os_string()))
        .ok_or_else(|| {
            ManagerError::Archive(format!("cannot name archive root for {}", source_dir.display()))
        })?;
    let root = PathBuf::from(root_name);

    let partial_path = partial_path(dest_path);
    let result = write_archive(source_dir, &root, &partial_path, &keep)
        .and_then(|stats| {
            fs::rename(&partial_path, dest_path)
                .map_err(|e| ManagerError::archive(format!("rename {}", dest_path.display()), e))?;
            Ok(stats)
        });

    if result.is_err() && partial_path.exists() {
        if let Err(e) = fs::remove_file(&partial_path) {
            warn!("Failed to remove partial archive {}: {}", partial_path.display(), e);
        }
    }

    result
}

fn write_archive<F>(source_dir: &Path, root: &Path, partial_path: &Path, keep: &F) -> Result<ArchiveStats>
where
    F: Fn(&Path, bool) -> bool,
{
    let file = File::create(partial_path)
        .map_err(|e| ManagerError::archive(format!("create {}", partial_path.display()), e))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut stats = ArchiveStats {
        files: 0,
        directories: 0,
        bytes: 0,
    };

    let walker = WalkDir::new(source_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(source_dir) {
            Ok(relative) if relative.as_os_str().is_empty() => true,
            Ok(relative) => keep(relative, entry.file_type().is_dir()),
            Err(_) => false,
        });

    for entry in walker {
        let entry = entry.map_err(|e| ManagerError::archive("read source tree", e))?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| ManagerError::archive(entry.path().display(), e))?;
        let name = root.join(relative);

        if entry.file_type().is_dir() {
            builder
                .append_dir(&name, entry.path())
                .map_err(|e| ManagerError::archive(format!("add directory {}", entry.path().display()), e))?;
            stats.directories += 1;
        } else {
            builder
                .append_path_with_name(entry.path(), &name)
                .map_err(|e| ManagerError::archive(format!("add file {}", entry.path().display()), e))?;
            if entry.file_type().is_file() {
                stats.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
            stats.files += 1;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| ManagerError::archive("finish tar stream", e))?;
    let mut writer = encoder
        .finish()
        .map_err(|e| ManagerError::archive("finish gzip stream", e))?;
    writer
        .flush()
        .map_err(|e| ManagerError::archive(format!("flush {}", partial_path.display()), e))?;

    debug!(
        files = stats.files,
        directories = stats.directories,
        bytes = stats.bytes,
        "Archive written to {}",
        partial_path.display()
    );

    Ok(stats)
}

/// Extract the archive at `archive_path` into `dest_dir`, creating it if needed.
///
/// Entries that would land outside `dest_dir` are rejected by the tar reader.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .map_err(|e| ManagerError::archive(format!("open {}", archive_path.display()), e))?;

    fs::create_dir_all(dest_dir)
        .map_err(|e| ManagerError::archive(format!("create {}", dest_dir.display()), e))?;

    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive
        .unpack(dest_dir)
        .map_err(|e| ManagerError::archive(format!("extract {}", archive_path.display()), e))?;

    Ok(())
}

fn partial_path(dest_path: &Path) -> PathBuf {
    let mut name = dest_path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_EXTENSION);
    dest_path.with_file_name(name)
}
