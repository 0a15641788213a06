//! Operator command vocabulary and dispatch.

pub mod bridge;
pub mod help;
pub mod router;

pub use bridge::{Authorizer, BridgeReply, ChatBridge};
pub use router::CommandRouter;

/// What a command string asks the manager to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Stop,
    Start,
    Restart,
    Quit,
    BackupNow,
    CancelBackup,
    StartBackup,
    Restore,
    Help,
    /// Unrecognised text, sent to the server console unchanged
    Forward(String),
}

/// Lower-case, trim, and turn `_` and spaces into `-`.
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == ' ' { '-' } else { c })
        .collect()
}

impl CommandKind {
    /// Classify a raw command. The first matching row wins, so `quit` stops
    /// the server and only `exit` quits the manager.
    pub fn parse(raw: &str) -> Self {
        match normalize(raw).as_str() {
            "stop" | "quit" => Self::Stop,
            "start" => Self::Start,
            "restart" => Self::Restart,
            "exit" => Self::Quit,
            "backup" | "backup-now" => Self::BackupNow,
            "cancel-backup" | "cancel-backup-timer" | "cancel-backup-schedule" => {
                Self::CancelBackup
            }
            "start-backup" | "start-backup-timer" => Self::StartBackup,
            "restore" | "restore-last" => Self::Restore,
            "help" => Self::Help,
            _ => Self::Forward(raw.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}
