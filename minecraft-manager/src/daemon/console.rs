//! Operator console: one command per input line.

use crate::commands::CommandRouter;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Feed each line of `reader` to the router until EOF or shutdown.
///
/// Commands run one at a time; the next line is not read until the previous
/// command has finished.
pub async fn listen<R>(reader: R, router: CommandRouter, shutdown: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    debug!("Listening for input commands...");

    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.cancelled() => break,
        };

        match line {
            Ok(Some(line)) => {
                let command = line.trim_end();
                if !command.is_empty() {
                    router.handle(command).await;
                }
                if shutdown.is_cancelled() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read console input: {}", e);
                break;
            }
        }
    }

    debug!("Stopped listening for input commands");
}

/// Listen on the manager's own stdin.
pub fn spawn_stdin_listener(router: CommandRouter, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(listen(BufReader::new(tokio::io::stdin()), router, shutdown))
}
