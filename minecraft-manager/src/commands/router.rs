//! Command dispatch.
//!
//! Every command source (console, chat bridge, backup timer) goes through a
//! [`CommandRouter`]. Handler failures are logged here and reported to the
//! source as `false`; nothing propagates further.

use super::help::display_help;
use super::CommandKind;
use crate::backup::{BackupConfig, BackupScheduler, BackupService};
use crate::config::Config;
use crate::supervisor::{ManagerState, ProcessSupervisor};
use crate::utils::errors::{ManagerError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct CommandRouter {
    config: Arc<Config>,
    supervisor: Arc<ProcessSupervisor>,
    backups: Arc<BackupService>,
    scheduler: Arc<BackupScheduler>,
}

impl CommandRouter {
    /// Wire up the supervisor, backup service and scheduler for `config`.
    ///
    /// Returns the router and the scheduler's tick receiver, to be handed to
    /// [`CommandRouter::spawn_backup_worker`].
    pub fn build(config: Config, shutdown: CancellationToken) -> (Self, mpsc::Receiver<()>) {
        let supervisor = ProcessSupervisor::new(config.server.clone(), shutdown);
        let (scheduler, ticks) =
            BackupScheduler::new(Duration::from_secs(config.backup.frequency_secs));

        let router = Self {
            config: Arc::new(config),
            supervisor: Arc::new(supervisor),
            backups: Arc::new(BackupService::new()),
            scheduler: Arc::new(scheduler),
        };
        (router, ticks)
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn scheduler(&self) -> &Arc<BackupScheduler> {
        &self.scheduler
    }

    /// Handle one command. Returns whether it succeeded.
    pub async fn handle(&self, raw: &str) -> bool {
        if raw.trim().is_empty() {
            return true;
        }

        debug!("Handling Command: \"{}\"", raw.trim_end());
        match self.dispatch(CommandKind::parse(raw)).await {
            Ok(()) => true,
            Err(e) => {
                error!("Command \"{}\" failed: {}", raw.trim(), e);
                false
            }
        }
    }

    async fn dispatch(&self, kind: CommandKind) -> Result<()> {
        match kind {
            CommandKind::Stop => {
                self.supervisor.stop(false).await;
                Ok(())
            }
            CommandKind::Start => {
                if self.supervisor.has_live_process().await {
                    info!("Minecraft server is already running! Not starting it again...");
                    return Ok(());
                }
                self.supervisor.start().await
            }
            CommandKind::Restart => {
                if self.supervisor.is_running().await {
                    self.supervisor.stop(false).await;
                }
                self.supervisor.start().await
            }
            CommandKind::Quit => {
                self.scheduler.cancel().await;
                if self.supervisor.is_running().await {
                    self.supervisor.stop(false).await;
                }
                info!("Quitting Minecraft Manager...");
                self.supervisor.stop(true).await;
                Ok(())
            }
            CommandKind::BackupNow => {
                self.scheduler.cancel().await;
                self.perform_backup(false)
                    .await
                    .map(|_| ())
                    .ok_or_else(|| ManagerError::CommandDispatch("backup failed".to_string()))
            }
            CommandKind::CancelBackup => {
                self.scheduler.cancel().await;
                Ok(())
            }
            CommandKind::StartBackup => {
                self.scheduler.arm(false).await;
                Ok(())
            }
            CommandKind::Restore => {
                info!("Performing restore of last backup...");
                let config = BackupConfig::from_config(&self.config);
                if self
                    .backups
                    .restore_last(&config, self.supervisor.as_ref())
                    .await
                {
                    Ok(())
                } else {
                    Err(ManagerError::CommandDispatch("restore failed".to_string()))
                }
            }
            CommandKind::Help => {
                display_help();
                Ok(())
            }
            CommandKind::Forward(text) => {
                // Sending to a stopped server only warns.
                self.supervisor.send_raw(&text).await;
                Ok(())
            }
        }
    }

    /// Announce, flush and snapshot the world, then optionally re-arm the timer.
    pub async fn perform_backup(&self, start_next: bool) -> Option<PathBuf> {
        info!("Performing backup...");
        self.supervisor.say("Performing backup...").await;
        self.supervisor.send_raw("save-off").await;
        self.supervisor.send_raw("save-all").await;

        let config = BackupConfig::from_config(&self.config);
        let snapshot = self.backups.snapshot(&config).await;
        match &snapshot {
            Some(path) => info!("Successfully created new backup at: {}", path.display()),
            None => error!("Failed to take backup!"),
        }

        let state = self.supervisor.state().await;
        if !state.is_shutting_down() {
            self.supervisor.send_raw("save-on").await;
            self.supervisor.say("Backup Complete!").await;
        }

        if start_next && state != ManagerState::Quitting {
            self.scheduler.arm(false).await;
        }

        snapshot
    }

    /// Run a scheduled backup for every timer tick until shutdown.
    pub fn spawn_backup_worker(
        &self,
        mut ticks: mpsc::Receiver<()>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    tick = ticks.recv() => match tick {
                        Some(()) => {
                            router.perform_backup(true).await;
                        }
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!("Backup worker stopped");
        })
    }
}
