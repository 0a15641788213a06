//! Shutdown handling for SIGTERM, SIGINT and the `exit` command.
//!
//! The manager quits through one [`CancellationToken`]: the supervisor
//! cancels it after the server has stopped for good, and every long-lived
//! task (console listener, backup worker, chat bridge) watches it.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Why [`ShutdownCoordinator::wait_for_signal`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// The quit token was cancelled, normally by the `exit` command
    Quit,
}

pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// The quit token shared with the rest of the manager.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for an OS signal or for the quit token.
    pub async fn wait_for_signal(&self) -> ShutdownReason {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = self.token.cancelled() => ShutdownReason::Quit,
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), shutting down the Minecraft server...");
                ShutdownReason::Interrupt
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down the Minecraft server...");
                ShutdownReason::Terminate
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_quit_token_ends_wait() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let reason = tokio::time::timeout(Duration::from_secs(5), coordinator.wait_for_signal())
            .await
            .expect("wait_for_signal did not return");
        assert_eq!(reason, ShutdownReason::Quit);
    }
}
