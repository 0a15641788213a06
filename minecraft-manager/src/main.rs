//! Minecraft Manager - Main entry point

use anyhow::Result;
use clap::Parser;
use minecraft_manager::config::{split_list, Config};
use minecraft_manager::daemon::{console, ShutdownCoordinator, ShutdownReason};
use minecraft_manager::{utils, CommandRouter};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the Minecraft server jar
    #[arg(long, value_name = "JAR")]
    server_path: Option<PathBuf>,

    /// Directory backups are written to
    #[arg(long, value_name = "DIR")]
    backup_dir: Option<PathBuf>,

    /// Comma-separated paths, relative to the server directory, to leave out of backups
    #[arg(long, value_name = "LIST")]
    excluded_files: Option<String>,

    /// Comma-separated file extensions to leave out of backups
    #[arg(long, value_name = "LIST")]
    excluded_file_types: Option<String>,

    /// Seconds between scheduled backups
    #[arg(long, value_name = "SECONDS")]
    backup_frequency: Option<u64>,

    /// Initial JVM heap size (e.g. 2G)
    #[arg(long)]
    min_java_memory: Option<String>,

    /// Maximum JVM heap size (e.g. 4G)
    #[arg(long)]
    max_java_memory: Option<String>,

    /// Number of backups to keep
    #[arg(long)]
    max_backups: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.server_path {
            config.server.jar_path = path.clone();
        }
        if let Some(dir) = &self.backup_dir {
            config.backup.dir = dir.clone();
        }
        if let Some(files) = &self.excluded_files {
            config.backup.excluded_files = split_list(files);
        }
        if let Some(types) = &self.excluded_file_types {
            config.backup.excluded_file_types = split_list(types);
        }
        if let Some(frequency) = self.backup_frequency {
            config.backup.frequency_secs = frequency;
        }
        if let Some(memory) = &self.min_java_memory {
            config.server.min_memory = memory.clone();
        }
        if let Some(memory) = &self.max_java_memory {
            config.server.max_memory = memory.clone();
        }
        if let Some(max) = self.max_backups {
            config.backup.max_backups = max;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.resolve_paths(&std::env::current_dir()?);

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    config.validate()?;

    // Initialize logging
    utils::logger::init(&config.log.level)?;

    tracing::info!("Starting Minecraft Manager v{}...", env!("CARGO_PKG_VERSION"));
    tracing::info!("Type `help` for a list of commands");
    tracing::debug!(" -> Using server executable: {}", config.server.jar_path.display());
    tracing::debug!(
        " -> Backing up every {} minutes to {}",
        config.backup.frequency_secs / 60,
        config.backup.dir.display()
    );
    tracing::debug!(" -> Excluding files: {}", config.backup.excluded_files.join(", "));
    tracing::debug!(" -> Excluding file types: {}", config.backup.excluded_file_types.join(", "));

    let shutdown_coordinator = ShutdownCoordinator::new();
    let shutdown = shutdown_coordinator.token();

    let (router, ticks) = CommandRouter::build(config, shutdown.clone());
    let worker_handle = router.spawn_backup_worker(ticks, shutdown.clone());
    let console_handle = console::spawn_stdin_listener(router.clone(), shutdown.clone());

    if let Err(e) = router.supervisor().start().await {
        tracing::error!("Failed to start Minecraft server: {}", e);
    }
    router.scheduler().arm(false).await;

    // Wait for `exit` or an OS signal; a signal still stops the server first.
    let reason = shutdown_coordinator.wait_for_signal().await;
    if reason != ShutdownReason::Quit {
        router.handle("exit").await;
    }

    // A backup already in progress runs to completion.
    router.scheduler().cancel().await;
    if let Err(e) = worker_handle.await {
        tracing::warn!("Backup worker panicked: {}", e);
    }

    // stdin reads block a runtime thread and never finish on their own.
    console_handle.abort();

    tracing::info!("Minecraft Manager stopped");
    std::process::exit(0);
}
