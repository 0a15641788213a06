//! Error types for the manager.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Failed to delete snapshot {}: {source}", path.display())]
    RetentionDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed: {0}")]
    CommandDispatch(String),

    #[error("Minecraft server is already running")]
    AlreadyRunning,

    #[error("No snapshots found in {}", .0.display())]
    NoSnapshots(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManagerError {
    /// Wrap an I/O failure raised while reading or writing an archive.
    pub fn archive(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        ManagerError::Archive(format!("{}: {}", context, err))
    }
}

impl From<::config::ConfigError> for ManagerError {
    fn from(err: ::config::ConfigError) -> Self {
        ManagerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;
