//! Minecraft server process supervision.
//!
//! [`ProcessSupervisor`] owns the child process and the [`ManagerState`]. Two
//! locks are involved:
//! - `lifecycle` serialises `start` and `stop` for their whole duration;
//! - `Shared::inner` guards the state and the process handle and is only ever
//!   held briefly.
//!
//! The output-relay task takes `inner` alone, so an in-progress `stop` (which
//! holds `lifecycle` while waiting for the relay) can never deadlock with it.
//! Console writes go through the process's own stdin lock, never `inner`.

pub mod process;
pub mod state;

pub use process::{ProcessExit, ServerInput, ServerProcess, SIGNAL_EXIT_CODE};
pub use state::ManagerState;

use crate::config::ServerConfig;
use crate::utils::errors::{ManagerError, Result};
use crate::utils::logger::SERVER_TARGET;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Server operations other components depend on.
pub trait ServerControl: Send + Sync {
    /// Stop the server and wait for it to exit. No-op when not running.
    fn stop_server(&self) -> impl Future<Output = ()> + Send;

    /// Start the server.
    fn start_server(&self) -> impl Future<Output = Result<()>> + Send;

    fn is_running(&self) -> impl Future<Output = bool> + Send;

    /// Send a console command to the server. Returns whether it was written.
    fn send_command(&self, text: &str) -> impl Future<Output = bool> + Send;
}

struct Inner {
    state: ManagerState,
    process: Option<ServerProcess>,
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ManagerState>,
}

impl Shared {
    fn set_state(&self, inner: &mut Inner, state: ManagerState) {
        if inner.state != state {
            debug!("Manager state: {} -> {}", inner.state, state);
        }
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    /// Called by the relay task once the child has been reaped.
    async fn on_process_exit(&self, exit: ProcessExit, command_line: &str) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == ManagerState::Running {
                warn!("Minecraft server exited unexpectedly");
                self.set_state(&mut inner, ManagerState::Stopping);
                if let Some(mut process) = inner.process.take() {
                    process.close_streams();
                }
                self.set_state(&mut inner, ManagerState::Inactive);
            }
        }

        if exit.is_failure() {
            error!(
                code = exit.code.unwrap_or_default(),
                "Subprocess error detected! Command: {}", command_line
            );
        } else {
            debug!("Minecraft server closed ({:?})", exit.code);
        }
    }
}

/// Owns the Minecraft server process and its lifecycle.
pub struct ProcessSupervisor {
    settings: ServerConfig,
    shared: Arc<Shared>,
    lifecycle: Mutex<()>,
    shutdown: CancellationToken,
}

impl ProcessSupervisor {
    /// `shutdown` is cancelled when the manager quits.
    pub fn new(settings: ServerConfig, shutdown: CancellationToken) -> Self {
        let (state_tx, _) = watch::channel(ManagerState::Inactive);
        Self {
            settings,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ManagerState::Inactive,
                    process: None,
                }),
                state_tx,
            }),
            lifecycle: Mutex::new(()),
            shutdown,
        }
    }

    pub fn settings(&self) -> &ServerConfig {
        &self.settings
    }

    pub async fn state(&self) -> ManagerState {
        self.shared.inner.lock().await.state
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ManagerState> {
        self.shared.state_tx.subscribe()
    }

    /// True while the state is `Running` and the process has not exited.
    pub async fn is_running(&self) -> bool {
        let inner = self.shared.inner.lock().await;
        inner.state == ManagerState::Running
            && inner.process.as_ref().is_some_and(|p| !p.has_exited())
    }

    /// True while a server process exists and has not exited, in any state.
    pub async fn has_live_process(&self) -> bool {
        let inner = self.shared.inner.lock().await;
        inner.process.as_ref().is_some_and(|p| !p.has_exited())
    }

    /// Spawn the server and start relaying its output.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut inner = self.shared.inner.lock().await;

        if inner.process.as_ref().is_some_and(|p| !p.has_exited()) {
            return Err(ManagerError::AlreadyRunning);
        }
        if let Some(mut previous) = inner.process.take() {
            previous.close_streams();
        }

        info!("Starting Minecraft Server...");
        debug!("Using server command: {}", self.settings.command_line());

        let command_line = self.settings.command_line();
        let mut child = Command::new(&self.settings.java_bin)
            .args(self.settings.command_args())
            .current_dir(self.settings.server_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ManagerError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            return Err(ManagerError::Spawn {
                command: command_line,
                source: std::io::Error::other("server stdout was not captured"),
            });
        };
        let pid = child.id();

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = CancellationToken::new();

        // Running before the relay exists, so an immediate exit is seen as unexpected.
        self.shared.set_state(&mut inner, ManagerState::Running);

        let relay = tokio::spawn(relay_output(
            child,
            stdout,
            kill.clone(),
            exit_tx,
            Arc::clone(&self.shared),
            command_line,
        ));

        inner.process = Some(ServerProcess::new(pid, stdin, relay, exit_rx, kill));
        info!(pid = pid.unwrap_or_default(), "Minecraft Server started");
        Ok(())
    }

    /// Stop the server, waiting for it to exit.
    ///
    /// With `quit` the state ends as `Quitting` and the shutdown token is
    /// cancelled so the rest of the manager winds down; otherwise the state
    /// returns to `Inactive`.
    pub async fn stop(&self, quit: bool) {
        let _lifecycle = self.lifecycle.lock().await;

        let process = {
            let mut inner = self.shared.inner.lock().await;
            let next = if quit {
                ManagerState::Quitting
            } else {
                ManagerState::Stopping
            };
            self.shared.set_state(&mut inner, next);
            inner.process.take()
        };

        if let Some(mut process) = process {
            if process.has_exited() {
                process.close_streams();
            } else {
                info!("Stopping Minecraft Server...");
                let timeout = Duration::from_secs(self.settings.stop_timeout_secs);
                match tokio::time::timeout(timeout, process.write_line("stop")).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Failed to send stop command to Minecraft server: {}", e),
                    Err(_) => warn!("Minecraft server is not reading its console"),
                }
                self.wait_or_terminate(&mut process).await;
                process.close_streams();
            }
            let grace = Duration::from_secs(self.settings.kill_grace_secs);
            process.join_relay(grace + DRAIN_AFTER_EXIT).await;
            info!("Stopped Minecraft Server");
        }

        if quit {
            info!("Quitting...");
            self.shutdown.cancel();
        } else {
            let mut inner = self.shared.inner.lock().await;
            self.shared.set_state(&mut inner, ManagerState::Inactive);
        }
    }

    async fn wait_or_terminate(&self, process: &mut ServerProcess) {
        let timeout = Duration::from_secs(self.settings.stop_timeout_secs);
        if process.wait_for_exit(timeout).await {
            return;
        }

        warn!(
            "Minecraft server did not stop within {}s, sending SIGTERM",
            self.settings.stop_timeout_secs
        );
        process.terminate();
        let grace = Duration::from_secs(self.settings.kill_grace_secs);
        if process.wait_for_exit(grace).await {
            return;
        }

        warn!("Minecraft server ignored SIGTERM, killing it");
        process.kill();
        if !process.wait_for_exit(grace).await {
            error!("Minecraft server (pid {:?}) is still running after being killed", process.pid());
        }
    }

    /// Write `text` to the server console.
    ///
    /// A no-op (with a warning) while inactive; write failures are logged.
    /// Returns whether the line was written.
    pub async fn send_raw(&self, text: &str) -> bool {
        let input = {
            let inner = self.shared.inner.lock().await;
            if inner.state == ManagerState::Inactive {
                None
            } else {
                inner.process.as_ref().filter(|p| p.stdin_open()).map(|p| p.input())
            }
        };
        let Some(input) = input else {
            warn!("Can't send command to Minecraft server. Server is not running!");
            return false;
        };

        debug!("Executing Server Command, \"{}\"", text);
        match input.write_line(text).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to execute server command! Error: {}", e);
                false
            }
        }
    }

    /// Broadcast a chat message to players.
    pub async fn say(&self, message: &str) -> bool {
        self.send_raw(&format!("say {}", message)).await
    }
}

impl ServerControl for ProcessSupervisor {
    async fn stop_server(&self) {
        self.stop(false).await
    }

    async fn start_server(&self) -> Result<()> {
        self.start().await
    }

    async fn is_running(&self) -> bool {
        ProcessSupervisor::is_running(self).await
    }

    async fn send_command(&self, text: &str) -> bool {
        self.send_raw(text).await
    }
}

/// How long output is still drained once the server has exited. A detached
/// grandchild can keep the pipe open indefinitely.
const DRAIN_AFTER_EXIT: Duration = Duration::from_secs(2);

/// Consecutive read errors tolerated before the relay stops reading.
const MAX_READ_ERRORS: u32 = 5;

/// Line-oriented reader over the server's stdout. Bytes that are not valid
/// UTF-8 are logged lossily instead of ending the relay.
struct OutputReader {
    reader: BufReader<ChildStdout>,
    buf: Vec<u8>,
    errors: u32,
    eof: bool,
}

impl OutputReader {
    fn new(stdout: ChildStdout) -> Self {
        Self {
            reader: BufReader::new(stdout),
            buf: Vec::new(),
            errors: 0,
            eof: false,
        }
    }

    /// Read and log one line. Cancel-safe: a partial line stays in `buf`.
    async fn relay_line(&mut self) {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) => {
                self.flush();
                self.eof = true;
            }
            Ok(_) => {
                self.flush();
                self.errors = 0;
            }
            Err(e) => {
                self.errors += 1;
                warn!("Failed to read Minecraft server output: {}", e);
                if self.errors >= MAX_READ_ERRORS {
                    self.eof = true;
                }
            }
        }
    }

    fn flush(&mut self) {
        let line = String::from_utf8_lossy(&self.buf);
        let line = line.trim_end();
        if !line.is_empty() {
            info!(target: SERVER_TARGET, "{}", line);
        }
        self.buf.clear();
    }
}

/// Relay server output into the log and reap the process.
///
/// The exit is published as soon as the process is reaped, whether or not
/// its stdout has closed; remaining output is then drained for a bounded time.
async fn relay_output(
    mut child: Child,
    stdout: ChildStdout,
    kill: CancellationToken,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    shared: Arc<Shared>,
    command_line: String,
) {
    debug!("Listening for Minecraft server outputs...");

    let mut output = OutputReader::new(stdout);
    let mut killed = false;
    let status = loop {
        tokio::select! {
            _ = output.relay_line(), if !output.eof => {}
            status = child.wait() => break status,
            _ = kill.cancelled(), if !killed => {
                killed = true;
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill Minecraft server: {}", e);
                }
            }
        }
    };

    let exit = match status {
        Ok(status) => ProcessExit::from(status),
        Err(e) => {
            warn!("Failed to wait for Minecraft server: {}", e);
            ProcessExit { code: None }
        }
    };

    exit_tx.send_replace(Some(exit));
    shared.on_process_exit(exit, &command_line).await;

    let drained = tokio::time::timeout(DRAIN_AFTER_EXIT, async {
        while !output.eof {
            output.relay_line().await;
        }
    })
    .await;
    if drained.is_err() {
        debug!("Server output still open after exit, no longer relaying it");
    }

    debug!("Stopped listening for Minecraft server outputs...");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    const ECHO_SERVER: &str = r#"#!/bin/sh
echo "Done (fake server)"
while IFS= read -r line; do
  echo "got $line"
  if [ "$line" = "stop" ]; then exit 0; fi
  if [ "$line" = "crash" ]; then exit 3; fi
done
"#;

    const STUBBORN_SERVER: &str = r#"#!/bin/sh
while IFS= read -r line; do
  echo "ignoring $line"
done
sleep 600
"#;

    // Prints a byte that is not UTF-8, then more output than a pipe buffers.
    const NOISY_SERVER: &str = r#"#!/bin/sh
printf 'bad \377 byte\n'
i=0
while [ $i -lt 20000 ]; do
  echo "line $i of startup noise"
  i=$((i+1))
done
touch finished
while IFS= read -r line; do
  if [ "$line" = "stop" ]; then exit 0; fi
done
"#;

    // Leaves a background child holding stdout open after it exits.
    const DETACHING_SERVER: &str = r#"#!/bin/sh
sleep 30 &
while IFS= read -r line; do
  if [ "$line" = "stop" ]; then exit 0; fi
  if [ "$line" = "crash" ]; then exit 3; fi
done
"#;

    // Never reads its console.
    const DEAF_SERVER: &str = r#"#!/bin/sh
exec sleep 600
"#;

    fn fake_server(dir: &Path, script: &str, stop_timeout_secs: u64) -> ServerConfig {
        let java = dir.join("fake-java");
        std::fs::write(&java, script).unwrap();
        std::fs::set_permissions(&java, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(dir.join("server.jar"), b"jar").unwrap();

        ServerConfig {
            jar_path: dir.join("server.jar"),
            java_bin: java.to_string_lossy().to_string(),
            stop_timeout_secs,
            kill_grace_secs: 1,
            ..ServerConfig::default()
        }
    }

    // Executing a script another test thread just wrote can fail with ETXTBSY.
    async fn start_with_retry(supervisor: &ProcessSupervisor) -> Result<()> {
        let mut attempts = 0;
        loop {
            match supervisor.start().await {
                Err(ManagerError::Spawn { source, .. })
                    if source.raw_os_error() == Some(26) && attempts < 10 =>
                {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                other => return other,
            }
        }
    }

    async fn wait_for_state(supervisor: &ProcessSupervisor, expected: ManagerState) {
        let mut rx = supervisor.subscribe_state();
        tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == expected))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_start_send_stop() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(
            fake_server(temp_dir.path(), ECHO_SERVER, 10),
            CancellationToken::new(),
        );

        start_with_retry(&supervisor).await.unwrap();
        assert_eq!(supervisor.state().await, ManagerState::Running);
        assert!(supervisor.is_running().await);
        assert!(supervisor.send_raw("say hi").await);

        supervisor.stop(false).await;
        assert_eq!(supervisor.state().await, ManagerState::Inactive);
        assert!(!supervisor.is_running().await);
        assert!(!supervisor.has_live_process().await);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(
            fake_server(temp_dir.path(), ECHO_SERVER, 10),
            CancellationToken::new(),
        );

        start_with_retry(&supervisor).await.unwrap();
        assert!(matches!(supervisor.start().await, Err(ManagerError::AlreadyRunning)));
        supervisor.stop(false).await;
    }

    #[tokio::test]
    async fn test_send_raw_while_inactive_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(
            fake_server(temp_dir.path(), ECHO_SERVER, 10),
            CancellationToken::new(),
        );

        assert!(!supervisor.send_raw("say hi").await);
        assert_eq!(supervisor.state().await, ManagerState::Inactive);
    }

    #[tokio::test]
    async fn test_stop_when_never_started() {
        let supervisor = ProcessSupervisor::new(ServerConfig::default(), CancellationToken::new());
        supervisor.stop(false).await;
        supervisor.stop(false).await;
        assert_eq!(supervisor.state().await, ManagerState::Inactive);
    }

    #[tokio::test]
    async fn test_unexpected_exit_returns_to_inactive() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(
            fake_server(temp_dir.path(), ECHO_SERVER, 10),
            CancellationToken::new(),
        );

        start_with_retry(&supervisor).await.unwrap();
        assert!(supervisor.send_raw("crash").await);
        wait_for_state(&supervisor, ManagerState::Inactive).await;

        assert!(!supervisor.is_running().await);
        // A later operator stop is harmless.
        supervisor.stop(false).await;
        assert_eq!(supervisor.state().await, ManagerState::Inactive);

        // And the server can be started again.
        start_with_retry(&supervisor).await.unwrap();
        supervisor.stop(false).await;
    }

    #[tokio::test]
    async fn test_stop_escalates_when_server_ignores_stop() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(
            fake_server(temp_dir.path(), STUBBORN_SERVER, 1),
            CancellationToken::new(),
        );

        start_with_retry(&supervisor).await.unwrap();
        let started = std::time::Instant::now();
        supervisor.stop(false).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(supervisor.state().await, ManagerState::Inactive);
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = fake_server(temp_dir.path(), ECHO_SERVER, 10);
        settings.java_bin = temp_dir.path().join("missing-java").to_string_lossy().to_string();
        let supervisor = ProcessSupervisor::new(settings, CancellationToken::new());

        assert!(matches!(supervisor.start().await, Err(ManagerError::Spawn { .. })));
        assert_eq!(supervisor.state().await, ManagerState::Inactive);
    }

    #[tokio::test]
    async fn test_quit_cancels_shutdown_token() {
        let temp_dir = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let supervisor = ProcessSupervisor::new(
            fake_server(temp_dir.path(), ECHO_SERVER, 10),
            shutdown.clone(),
        );

        start_with_retry(&supervisor).await.unwrap();
        supervisor.stop(true).await;

        assert!(shutdown.is_cancelled());
        assert_eq!(supervisor.state().await, ManagerState::Quitting);
    }

    #[tokio::test]
    async fn test_output_with_invalid_utf8_keeps_draining() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(
            fake_server(temp_dir.path(), NOISY_SERVER, 5),
            CancellationToken::new(),
        );

        start_with_retry(&supervisor).await.unwrap();

        // The script only gets here if its output keeps being read.
        let finished = temp_dir.path().join("finished");
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !finished.exists() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(finished.exists());
        assert!(supervisor.is_running().await);

        supervisor.stop(false).await;
        assert_eq!(supervisor.state().await, ManagerState::Inactive);
    }

    #[tokio::test]
    async fn test_stop_returns_while_grandchild_holds_output() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(
            fake_server(temp_dir.path(), DETACHING_SERVER, 1),
            CancellationToken::new(),
        );

        start_with_retry(&supervisor).await.unwrap();
        let started = std::time::Instant::now();
        supervisor.stop(false).await;

        assert!(started.elapsed() < Duration::from_secs(8));
        assert_eq!(supervisor.state().await, ManagerState::Inactive);
        assert!(!supervisor.has_live_process().await);
    }

    #[tokio::test]
    async fn test_exit_seen_while_grandchild_holds_output() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(
            fake_server(temp_dir.path(), DETACHING_SERVER, 1),
            CancellationToken::new(),
        );

        start_with_retry(&supervisor).await.unwrap();
        assert!(supervisor.send_raw("crash").await);
        wait_for_state(&supervisor, ManagerState::Inactive).await;
        assert!(!supervisor.is_running().await);
    }

    #[tokio::test]
    async fn test_blocked_console_write_does_not_block_stop() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = Arc::new(ProcessSupervisor::new(
            fake_server(temp_dir.path(), DEAF_SERVER, 1),
            CancellationToken::new(),
        ));

        start_with_retry(&supervisor).await.unwrap();

        // Far more than a pipe buffers, so the write parks.
        let flood = "x".repeat(200_000);
        let writer = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.send_raw(&flood).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!writer.is_finished());

        let started = std::time::Instant::now();
        supervisor.stop(false).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(supervisor.state().await, ManagerState::Inactive);

        // The reader is gone, so the parked write fails instead of hanging.
        let sent = tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .expect("console write never finished")
            .unwrap();
        assert!(!sent);
    }
}
