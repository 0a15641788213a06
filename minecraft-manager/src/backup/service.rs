//! Snapshot and restore orchestration.
//!
//! Archive work is blocking file I/O and runs on the blocking thread pool.
//! Only one snapshot or restore runs at a time.

use super::retention::{self, SnapshotRecord};
use super::{file_names, server_executables, BackupConfig};
use crate::archive;
use crate::supervisor::ServerControl;
use crate::utils::errors::{ManagerError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use walkdir::WalkDir;

#[derive(Default)]
pub struct BackupService {
    op_lock: Mutex<()>,
}

impl BackupService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of `config.source_dir`.
    ///
    /// Returns the archive path, or `None` if anything went wrong (already
    /// logged). A failed snapshot never leaves a partial archive behind.
    pub async fn snapshot(&self, config: &BackupConfig) -> Option<PathBuf> {
        let _op = self.op_lock.lock().await;

        let config = config.clone();
        match tokio::task::spawn_blocking(move || take_snapshot(&config)).await {
            Ok(Ok(Some(path))) => Some(path),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                error!("Failed to create snapshot: {}", e);
                None
            }
            Err(e) => {
                error!("Snapshot task panicked: {}", e);
                None
            }
        }
    }

    /// Replace the server directory with the most recent snapshot.
    ///
    /// Stops the server first and starts it again afterwards. Returns whether
    /// the restore succeeded. With no snapshot available nothing is touched.
    pub async fn restore_last<S: ServerControl>(&self, config: &BackupConfig, server: &S) -> bool {
        let _op = self.op_lock.lock().await;

        let plan = {
            let config = config.clone();
            tokio::task::spawn_blocking(move || plan_restore(&config)).await
        };
        let plan = match plan {
            Ok(Ok(plan)) => plan,
            Ok(Err(ManagerError::NoSnapshots(dir))) => {
                warn!(
                    "No snapshots in {}. Please take a snapshot before trying to restore to one...",
                    dir.display()
                );
                return false;
            }
            Ok(Err(e)) => {
                error!("Cannot restore: {}", e);
                return false;
            }
            Err(e) => {
                error!("Restore task panicked: {}", e);
                return false;
            }
        };

        info!("Restoring snapshot {}", plan.snapshot.path.display());

        if server.is_running().await {
            server.send_command("say Performing restore...").await;
        }
        server.stop_server().await;

        let result = {
            let config = config.clone();
            let plan = plan.clone();
            tokio::task::spawn_blocking(move || apply_restore(&config, &plan)).await
        };
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("restore task panicked: {}", e)),
        };
        if let Some(reason) = failure {
            error!(
                server_dir = %config.source_dir.display(),
                snapshot = %plan.snapshot.path.display(),
                "RESTORE FAILED after the server directory was cleared: {}. \
                 The server directory is incomplete and the server will not be restarted; \
                 manual intervention required",
                reason
            );
            return false;
        }

        info!("Restore Successful! Starting Minecraft Server...");
        if let Err(e) = server.start_server().await {
            error!("Restore completed but the server failed to start: {}", e);
            return false;
        }
        true
    }
}

/// What a restore needs, captured before anything is deleted.
#[derive(Debug, Clone)]
struct RestorePlan {
    snapshot: SnapshotRecord,
    /// Base name of the server directory; the archive root
    root_name: String,
    executable_names: Vec<String>,
}

fn take_snapshot(config: &BackupConfig) -> Result<Option<PathBuf>> {
    fs::create_dir_all(&config.dest_dir)?;

    let executables = server_executables(&config.source_dir)?;
    let executable_names = file_names(&executables);

    retention::enforce(&config.dest_dir, config.max_keep)?;

    for executable in &executables {
        if let Some(name) = executable.file_name() {
            fs::copy(executable, config.dest_dir.join(name))?;
        }
    }

    info!("Taking snapshot of Minecraft Server...");
    let timestamp = next_timestamp(&config.dest_dir)?;
    let save_path = config
        .dest_dir
        .join(retention::snapshot_file_name(timestamp));
    let filter = config.filter(&executable_names);
    let stats = archive::create_archive(&config.source_dir, &save_path, |p, is_dir| {
        filter.keep(p, is_dir)
    })?;

    let size = match fs::metadata(&save_path) {
        Ok(meta) => meta.len(),
        Err(_) => {
            error!("Failed to create snapshot! File not found: {}", save_path.display());
            return Ok(None);
        }
    };
    if size == 0 {
        error!("Failed to create snapshot! Archive is empty: {}", save_path.display());
        let _ = fs::remove_file(&save_path);
        return Ok(None);
    }

    info!(
        files = stats.files,
        bytes = size,
        "Successfully took snapshot of the Minecraft Server"
    );
    Ok(Some(save_path))
}

/// Current unix time, bumped past the newest snapshot so names stay unique.
fn next_timestamp(dest_dir: &Path) -> Result<u64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let newest = retention::latest_snapshot(dest_dir)?.map(|s| s.timestamp);
    Ok(match newest {
        Some(newest) if newest >= now => newest + 1,
        _ => now,
    })
}

fn plan_restore(config: &BackupConfig) -> Result<RestorePlan> {
    if !config.dest_dir.is_dir() {
        return Err(ManagerError::NoSnapshots(config.dest_dir.clone()));
    }
    let snapshot = retention::latest_snapshot(&config.dest_dir)?
        .ok_or_else(|| ManagerError::NoSnapshots(config.dest_dir.clone()))?;

    let source = config
        .source_dir
        .canonicalize()
        .unwrap_or_else(|_| config.source_dir.clone());
    let root_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            ManagerError::Archive(format!(
                "cannot determine archive root for {}",
                config.source_dir.display()
            ))
        })?;

    let executable_names = match server_executables(&config.source_dir) {
        Ok(executables) => file_names(&executables),
        Err(e) => {
            warn!("Could not list server executables: {}", e);
            Vec::new()
        }
    };
    for name in &executable_names {
        if !config.dest_dir.join(name).is_file() {
            return Err(ManagerError::Archive(format!(
                "no backup copy of server executable {} in {}",
                name,
                config.dest_dir.display()
            )));
        }
    }

    Ok(RestorePlan {
        snapshot,
        root_name,
        executable_names,
    })
}

fn apply_restore(config: &BackupConfig, plan: &RestorePlan) -> Result<()> {
    let server_dir = &config.source_dir;
    if server_dir.exists() {
        fs::remove_dir_all(server_dir)?;
    }
    fs::create_dir_all(server_dir)?;

    let staging = staging_dir(&plan.snapshot.path);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    let result = restore_from_staging(config, plan, &staging);

    // The staging directory goes whether or not the restore worked.
    if staging.exists() {
        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!("Failed to clean up {}: {}", staging.display(), e);
        }
    }

    result
}

fn restore_from_staging(config: &BackupConfig, plan: &RestorePlan, staging: &Path) -> Result<()> {
    archive::extract_archive(&plan.snapshot.path, staging)?;

    let extracted = staging.join(&plan.root_name);
    if !extracted.is_dir() {
        return Err(ManagerError::Archive(format!(
            "snapshot {} does not contain {}/",
            plan.snapshot.path.display(),
            plan.root_name
        )));
    }
    move_contents(&extracted, &config.source_dir)?;

    for name in &plan.executable_names {
        fs::copy(config.dest_dir.join(name), config.source_dir.join(name))?;
    }

    Ok(())
}

/// Extraction directory next to the archive: the archive path minus `.tar.gz`.
fn staging_dir(archive_path: &Path) -> PathBuf {
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(retention::SNAPSHOT_SUFFIX)
        .unwrap_or(&name);
    archive_path.with_file_name(format!("{}.restore", stem))
}

fn move_contents(from: &Path, to: &Path) -> Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        // rename may fail across filesystems, fall back to copy+remove
        if let Err(rename_err) = fs::rename(entry.path(), &target) {
            copy_recursively(&entry.path(), &target).map_err(|copy_err| {
                ManagerError::Archive(format!(
                    "move {} -> {}: {} (rename: {})",
                    entry.path().display(),
                    target.display(),
                    copy_err,
                    rename_err
                ))
            })?;
        }
    }
    Ok(())
}

fn copy_recursively(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| ManagerError::archive(from.display(), e))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| ManagerError::archive(entry.path().display(), e))?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeServer {
        running: AtomicBool,
        stops: AtomicUsize,
        starts: AtomicUsize,
        commands: std::sync::Mutex<Vec<String>>,
    }

    impl ServerControl for FakeServer {
        async fn stop_server(&self) {
            self.running.store(false, Ordering::SeqCst);
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        async fn start_server(&self) -> Result<()> {
            self.running.store(true, Ordering::SeqCst);
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        async fn send_command(&self, text: &str) -> bool {
            self.commands.lock().unwrap().push(text.to_string());
            true
        }
    }

    struct Fixture {
        _temp_dir: TempDir,
        config: BackupConfig,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let server = temp_dir.path().join("minecraft");
        fs::create_dir_all(server.join("world")).unwrap();
        fs::create_dir_all(server.join("cache")).unwrap();
        fs::write(server.join("server.jar"), b"jar v1").unwrap();
        fs::write(server.join("server.properties"), b"motd=hello").unwrap();
        fs::write(server.join("world/level.dat"), b"level v1").unwrap();
        fs::write(server.join("cache/blob"), b"cache").unwrap();
        fs::write(server.join("debug.log"), b"log").unwrap();

        let config = BackupConfig {
            source_dir: server,
            dest_dir: temp_dir.path().join("backups"),
            excluded_paths: Vec::new(),
            excluded_suffixes: vec![".log".to_string()],
            max_keep: 10,
        };
        Fixture {
            _temp_dir: temp_dir,
            config,
        }
    }

    fn snapshot_names(dir: &Path) -> Vec<String> {
        retention::list_snapshots(dir)
            .unwrap()
            .iter()
            .map(|s| s.path.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_snapshot_copies_executables_and_archives_tree() {
        let f = fixture();
        let service = BackupService::new();

        let path = service.snapshot(&f.config).await.expect("snapshot failed");
        assert!(path.starts_with(&f.config.dest_dir));
        assert!(retention::SnapshotRecord::from_path(&path).is_some());
        assert_eq!(fs::read(f.config.dest_dir.join("server.jar")).unwrap(), b"jar v1");

        let out = f.config.dest_dir.join("check");
        archive::extract_archive(&path, &out).unwrap();
        let root = out.join("minecraft");
        assert_eq!(fs::read(root.join("world/level.dat")).unwrap(), b"level v1");
        assert!(root.join("server.properties").exists());
        assert!(!root.join("server.jar").exists());
        assert!(!root.join("cache").exists());
        assert!(!root.join("debug.log").exists());
    }

    #[tokio::test]
    async fn test_snapshot_applies_retention_first() {
        let mut f = fixture();
        f.config.max_keep = 2;
        fs::create_dir_all(&f.config.dest_dir).unwrap();
        for ts in [100, 200, 300] {
            fs::write(f.config.dest_dir.join(retention::snapshot_file_name(ts)), b"old").unwrap();
        }

        let service = BackupService::new();
        let path = service.snapshot(&f.config).await.expect("snapshot failed");

        let names = snapshot_names(&f.config.dest_dir);
        assert!(!names.contains(&"minecraft-backup-100.tar.gz".to_string()));
        assert!(names.contains(&"minecraft-backup-200.tar.gz".to_string()));
        assert!(names.contains(&"minecraft-backup-300.tar.gz".to_string()));
        assert_eq!(names.len(), 3);

        let created = retention::SnapshotRecord::from_path(&path).unwrap();
        assert!(created.timestamp >= 300);
    }

    #[tokio::test]
    async fn test_snapshots_in_same_second_get_distinct_names() {
        let f = fixture();
        let service = BackupService::new();

        let first = service.snapshot(&f.config).await.unwrap();
        let second = service.snapshot(&f.config).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(snapshot_names(&f.config.dest_dir).len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_source_reports_failure() {
        let mut f = fixture();
        f.config.source_dir = f.config.source_dir.join("nope");

        let service = BackupService::new();
        assert!(service.snapshot(&f.config).await.is_none());
    }

    #[tokio::test]
    async fn test_restore_without_snapshots_touches_nothing() {
        let f = fixture();
        let server = FakeServer::default();
        server.running.store(true, Ordering::SeqCst);

        let service = BackupService::new();
        assert!(!service.restore_last(&f.config, &server).await);

        assert_eq!(server.stops.load(Ordering::SeqCst), 0);
        assert_eq!(server.starts.load(Ordering::SeqCst), 0);
        assert!(server.commands.lock().unwrap().is_empty());
        assert!(!f.config.dest_dir.exists());
        assert_eq!(fs::read(f.config.source_dir.join("world/level.dat")).unwrap(), b"level v1");
    }

    #[tokio::test]
    async fn test_restore_last_replaces_server_dir() {
        let f = fixture();
        let service = BackupService::new();
        let server = FakeServer::default();
        server.running.store(true, Ordering::SeqCst);

        service.snapshot(&f.config).await.expect("snapshot failed");

        let dir = &f.config.source_dir;
        fs::write(dir.join("world/level.dat"), b"level v2").unwrap();
        fs::write(dir.join("world/griefed.dat"), b"oops").unwrap();
        fs::remove_file(dir.join("server.properties")).unwrap();
        fs::write(dir.join("server.jar"), b"jar v2").unwrap();

        assert!(service.restore_last(&f.config, &server).await);

        assert_eq!(fs::read(dir.join("world/level.dat")).unwrap(), b"level v1");
        assert_eq!(fs::read(dir.join("server.properties")).unwrap(), b"motd=hello");
        assert!(!dir.join("world/griefed.dat").exists());
        assert_eq!(fs::read(dir.join("server.jar")).unwrap(), b"jar v1");

        assert_eq!(server.stops.load(Ordering::SeqCst), 1);
        assert_eq!(server.starts.load(Ordering::SeqCst), 1);
        assert_eq!(
            *server.commands.lock().unwrap(),
            vec!["say Performing restore...".to_string()]
        );

        let leftovers: Vec<_> = fs::read_dir(&f.config.dest_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_restore_of_corrupt_snapshot_does_not_restart() {
        let f = fixture();
        fs::create_dir_all(&f.config.dest_dir).unwrap();
        fs::copy(f.config.source_dir.join("server.jar"), f.config.dest_dir.join("server.jar")).unwrap();
        fs::write(
            f.config.dest_dir.join(retention::snapshot_file_name(500)),
            b"not an archive",
        )
        .unwrap();

        let service = BackupService::new();
        let server = FakeServer::default();
        assert!(!service.restore_last(&f.config, &server).await);

        assert_eq!(server.stops.load(Ordering::SeqCst), 1);
        assert_eq!(server.starts.load(Ordering::SeqCst), 0);
        assert!(!f.config.dest_dir.join("minecraft-backup-500.restore").exists());
    }

    #[tokio::test]
    async fn test_failed_restore_removes_staging_dir() {
        let f = fixture();
        let service = BackupService::new();
        let server = FakeServer::default();

        // A snapshot of some other directory has the wrong archive root.
        let other = f.config.dest_dir.parent().unwrap().join("elsewhere");
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("level.dat"), b"other").unwrap();
        fs::create_dir_all(&f.config.dest_dir).unwrap();
        fs::copy(f.config.source_dir.join("server.jar"), f.config.dest_dir.join("server.jar")).unwrap();
        let snapshot = f.config.dest_dir.join(retention::snapshot_file_name(700));
        archive::create_archive(&other, &snapshot, |_, _| true).unwrap();

        assert!(!service.restore_last(&f.config, &server).await);

        assert!(f.config.dest_dir.join("minecraft-backup-700.tar.gz").exists());
        let leftovers: Vec<_> = fs::read_dir(&f.config.dest_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(server.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_staging_dir() {
        assert_eq!(
            staging_dir(Path::new("/b/minecraft-backup-42.tar.gz")),
            PathBuf::from("/b/minecraft-backup-42.restore")
        );
    }

    #[test]
    fn test_copy_recursively() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let from = temp_dir.path().join("from");
        fs::create_dir_all(from.join("a/b"))?;
        fs::write(from.join("a/b/c.txt"), b"c")?;
        fs::write(from.join("top.txt"), b"top")?;

        let to = temp_dir.path().join("to");
        copy_recursively(&from, &to)?;
        assert_eq!(fs::read(to.join("a/b/c.txt"))?, b"c");
        assert_eq!(fs::read(to.join("top.txt"))?, b"top");
        Ok(())
    }
}
