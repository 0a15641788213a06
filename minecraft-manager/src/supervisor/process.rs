//! Handle to a spawned server process.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exit code the server reports when it was stopped by Ctrl+C / SIGTERM.
pub const SIGNAL_EXIT_CODE: i32 = 130;

/// How the server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    /// Exit codes worth reporting as a subprocess error.
    pub fn is_failure(&self) -> bool {
        matches!(self.code, Some(code) if code != 0 && code != SIGNAL_EXIT_CODE)
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Write end of the server's stdin, shared so a blocked write never holds the
/// supervisor's state lock.
#[derive(Clone)]
pub struct ServerInput {
    stdin: Arc<Mutex<Option<ChildStdin>>>,
}

impl ServerInput {
    pub fn new(stdin: Option<ChildStdin>) -> Self {
        Self {
            stdin: Arc::new(Mutex::new(stdin)),
        }
    }

    /// Whether stdin is still open. A write in progress counts as open.
    pub fn is_open(&self) -> bool {
        self.stdin.try_lock().map(|stdin| stdin.is_some()).unwrap_or(true)
    }

    /// Write `text` followed by a newline.
    pub async fn write_line(&self, text: &str) -> std::io::Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "server stdin is closed")
        })?;
        stdin.write_all(format!("{}\n", text).as_bytes()).await?;
        stdin.flush().await
    }

    /// Drop our end of stdin. If a write is in flight the pipe closes once
    /// that writer lets go.
    pub fn close(&self) {
        match self.stdin.try_lock() {
            Ok(mut stdin) => {
                if stdin.take().is_some() {
                    debug!("Closed server stdin");
                }
            }
            Err(_) => debug!("Server stdin busy, leaving it to the pending write"),
        }
    }
}

/// The running server: its stdin, its output-relay task and its exit slot.
///
/// The `Child` itself lives in the relay task, which reaps it and publishes
/// the result through `exit`.
pub struct ServerProcess {
    pid: Option<u32>,
    input: ServerInput,
    relay: Option<JoinHandle<()>>,
    exit: watch::Receiver<Option<ProcessExit>>,
    kill: CancellationToken,
}

impl ServerProcess {
    pub fn new(
        pid: Option<u32>,
        stdin: Option<ChildStdin>,
        relay: JoinHandle<()>,
        exit: watch::Receiver<Option<ProcessExit>>,
        kill: CancellationToken,
    ) -> Self {
        Self {
            pid,
            input: ServerInput::new(stdin),
            relay: Some(relay),
            exit,
            kill,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    /// A handle for writing to the server's stdin.
    pub fn input(&self) -> ServerInput {
        self.input.clone()
    }

    pub fn stdin_open(&self) -> bool {
        self.input.is_open()
    }

    /// Write `text` followed by a newline to the server's stdin.
    pub async fn write_line(&self, text: &str) -> std::io::Result<()> {
        self.input.write_line(text).await
    }

    /// Drop our end of stdin. Safe to call repeatedly.
    pub fn close_streams(&mut self) {
        self.input.close();
    }

    /// Wait up to `timeout` for the process to exit. Returns whether it did.
    pub async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.exit.wait_for(|exit| exit.is_some())).await {
            Ok(Ok(_)) => true,
            // The relay task is gone; it always publishes before exiting.
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }

    /// Ask the process to terminate (SIGTERM).
    #[cfg(unix)]
    pub fn terminate(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else { return };
        let Ok(raw) = i32::try_from(pid) else { return };
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to server (pid {}): {}", pid, e);
        }
    }

    #[cfg(not(unix))]
    pub fn terminate(&self) {
        self.kill();
    }

    /// Forcefully kill the process.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Wait up to `timeout` for the output-relay task to finish, aborting it
    /// if it does not.
    pub async fn join_relay(&mut self, timeout: Duration) {
        let Some(mut relay) = self.relay.take() else { return };
        match tokio::time::timeout(timeout, &mut relay).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if !e.is_cancelled() {
                    warn!("Server output relay panicked: {}", e);
                }
            }
            Err(_) => {
                warn!(
                    "Server output relay still busy after {}s, abandoning it",
                    timeout.as_secs()
                );
                relay.abort();
            }
        }
    }
}
