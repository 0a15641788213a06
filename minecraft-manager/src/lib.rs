//! Minecraft Manager Library
//!
//! Supervises a Minecraft server process, routes operator commands to it and
//! keeps rotating snapshot backups of the server directory.

pub mod archive;
pub mod backup;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod supervisor;
pub mod utils;

// Re-export commonly used types
pub use commands::{ChatBridge, CommandRouter};
pub use config::Config;
pub use supervisor::{ManagerState, ProcessSupervisor};
pub use utils::errors::{ManagerError, Result};
