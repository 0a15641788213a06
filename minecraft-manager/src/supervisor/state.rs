//! Manager lifecycle state.

use std::fmt;

/// Lifecycle of the supervised server, owned by a single
/// [`ProcessSupervisor`](super::ProcessSupervisor).
///
/// `Inactive -> Running -> Stopping -> Inactive`, or
/// `Running -> Quitting` when the whole manager is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagerState {
    #[default]
    Inactive,
    Running,
    Stopping,
    Quitting,
}

impl ManagerState {
    /// Whether the manager is on its way down.
    pub fn is_shutting_down(self) -> bool {
        matches!(self, ManagerState::Stopping | ManagerState::Quitting)
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::Inactive => "inactive",
            ManagerState::Running => "running",
            ManagerState::Stopping => "stopping",
            ManagerState::Quitting => "quitting",
        };
        f.write_str(name)
    }
}
