use tracing::info;

pub const HELP_LINES: &[&str] = &[
    "[========== Help ==========]",
    "",
    "Hint: Type one of the following commands and hit enter. Comma-separated commands mean you can use either",
    "",
    "Commands:",
    "- stop, quit                      -> Stop the Minecraft Server",
    "- start                           -> Start the Minecraft Server",
    "- restart                         -> Restart the Minecraft Server",
    "- exit                            -> Stop the server and quit the application",
    "- backup, backup-now              -> Take a backup of the Minecraft Server",
    "- cancel-backup, cancel-backup-timer, cancel-backup-schedule -> Cancel the backup scheduler",
    "- start-backup, start-backup-timer -> Start the backup scheduler",
    "- restore, restore-last           -> Restore the most recent backup",
    "- help                            -> Show this message",
    "",
    "Anything else is sent to the Minecraft Server console.",
];

pub fn display_help() {
    for line in HELP_LINES {
        info!("{}", line);
    }
}
