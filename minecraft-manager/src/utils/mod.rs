//! Utility modules for the manager.

pub mod errors;
pub mod logger;

pub use errors::{ManagerError, Result};
