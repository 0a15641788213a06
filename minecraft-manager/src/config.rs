//! Configuration management for the manager.
//!
//! Loads configuration from an optional TOML file with environment variable
//! overrides (`MC_MANAGER__SECTION__KEY`). Command-line flags are applied on
//! top by the binary before [`Config::validate`] runs.

use crate::utils::errors::{ManagerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "MC_MANAGER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub backup: BackupSettings,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the server jar. Its parent directory is the server directory.
    #[serde(default)]
    pub jar_path: PathBuf,

    /// Java executable used to launch the jar
    #[serde(default = "default_java_bin")]
    pub java_bin: String,

    /// Initial JVM heap (`-Xms`)
    #[serde(default = "default_memory")]
    pub min_memory: String,

    /// Maximum JVM heap (`-Xmx`)
    #[serde(default = "default_memory")]
    pub max_memory: String,

    /// How long `stop` waits for the server to exit before signalling it
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// How long to wait after SIGTERM before killing the server
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Directory snapshots are written to
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,

    /// Paths, relative to the server directory, left out of snapshots
    #[serde(default)]
    pub excluded_files: Vec<String>,

    /// File extensions left out of snapshots (`log`, `.log` and `*.log` are equivalent)
    #[serde(default)]
    pub excluded_file_types: Vec<String>,

    /// Seconds between scheduled backups
    #[serde(default = "default_frequency_secs")]
    pub frequency_secs: u64,

    /// Number of snapshots kept before the oldest are deleted
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_java_bin() -> String {
    "java".to_string()
}

fn default_memory() -> String {
    "2G".to_string()
}

fn default_stop_timeout_secs() -> u64 {
    60
}

fn default_kill_grace_secs() -> u64 {
    10
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_frequency_secs() -> u64 {
    6 * 60 * 60
}

fn default_max_backups() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            jar_path: PathBuf::new(),
            java_bin: default_java_bin(),
            min_memory: default_memory(),
            max_memory: default_memory(),
            stop_timeout_secs: default_stop_timeout_secs(),
            kill_grace_secs: default_kill_grace_secs(),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            excluded_files: Vec::new(),
            excluded_file_types: Vec::new(),
            frequency_secs: default_frequency_secs(),
            max_backups: default_max_backups(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Directory the server runs in and that snapshots capture.
    pub fn server_dir(&self) -> PathBuf {
        match self.jar_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Arguments passed to `java_bin`.
    pub fn command_args(&self) -> Vec<String> {
        vec![
            format!("-Xms{}", self.min_memory),
            format!("-Xmx{}", self.max_memory),
            "-jar".to_string(),
            self.jar_path.to_string_lossy().to_string(),
            "--nogui".to_string(),
        ]
    }

    /// Full command line, for log messages.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.java_bin.clone()];
        parts.extend(self.command_args());
        parts.join(" ")
    }
}

impl Config {
    /// Load configuration from an optional TOML file plus environment overrides.
    ///
    /// The result is not validated; call [`Config::validate`] once all
    /// overrides are applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            if !path.is_file() {
                return Err(ManagerError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(::config::File::from(path));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("backup.excluded_files")
                .with_list_parse_key("backup.excluded_file_types")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ManagerError::Config(e.to_string()))
    }

    /// Resolve relative paths against `cwd` so they survive the server's
    /// working directory being recreated by a restore.
    pub fn resolve_paths(&mut self, cwd: &Path) {
        if self.server.jar_path.is_relative() && !self.server.jar_path.as_os_str().is_empty() {
            self.server.jar_path = cwd.join(&self.server.jar_path);
        }
        if self.backup.dir.is_relative() {
            self.backup.dir = cwd.join(&self.backup.dir);
        }
    }

    /// Reject settings that would make the manager unusable.
    pub fn validate(&self) -> Result<()> {
        if self.server.jar_path.as_os_str().is_empty() {
            return Err(ManagerError::Config(
                "required setting `server.jar_path` does not have a value".to_string(),
            ));
        }
        if !self.server.jar_path.is_file() {
            return Err(ManagerError::Config(format!(
                "server jar not found: {}",
                self.server.jar_path.display()
            )));
        }
        if self.server.java_bin.trim().is_empty() {
            return Err(ManagerError::Config(
                "required setting `server.java_bin` does not have a value".to_string(),
            ));
        }
        for (key, value) in [
            ("server.min_memory", &self.server.min_memory),
            ("server.max_memory", &self.server.max_memory),
        ] {
            if !is_memory_size(value) {
                return Err(ManagerError::Config(format!(
                    "`{}` is not a valid memory size: {:?}",
                    key, value
                )));
            }
        }
        if self.backup.frequency_secs == 0 {
            return Err(ManagerError::Config(
                "`backup.frequency_secs` must be greater than zero".to_string(),
            ));
        }
        if self.backup.max_backups == 0 {
            return Err(ManagerError::Config(
                "`backup.max_backups` must be greater than zero".to_string(),
            ));
        }

        let server_dir = absolute(&self.server.server_dir());
        let backup_dir = absolute(&self.backup.dir);
        if backup_dir.starts_with(&server_dir) {
            return Err(ManagerError::Config(format!(
                "backup directory {} must not be inside the server directory {}",
                backup_dir.display(),
                server_dir.display()
            )));
        }

        Ok(())
    }
}

/// Split a comma-separated command-line list, dropping empty items.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// JVM memory sizes: digits with an optional K/M/G unit.
fn is_memory_size(value: &str) -> bool {
    let digits = value.trim_end_matches(['k', 'K', 'm', 'M', 'g', 'G']);
    let unit_len = value.len() - digits.len();
    !digits.is_empty() && unit_len <= 1 && digits.chars().all(|c| c.is_ascii_digit())
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
