//! Long-running manager plumbing: signals and the operator console.

pub mod console;
pub mod shutdown;

pub use shutdown::{ShutdownCoordinator, ShutdownReason};
