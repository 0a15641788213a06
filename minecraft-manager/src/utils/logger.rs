//! Logging configuration using tracing.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target used when relaying lines printed by the Minecraft server.
pub const SERVER_TARGET: &str = "minecraft_server";

/// Filter directives for `level`. Server console output stays visible at
/// `info` unless the manager itself is configured quieter than `warn`.
fn directives(level: &str) -> String {
    let level = level.trim().to_lowercase();
    let server_level = match level.as_str() {
        "error" | "off" => level.as_str(),
        _ => "info",
    };
    format!("{},{}={}", level, SERVER_TARGET, server_level)
}

/// Initialize logging with the specified level. `RUST_LOG` takes precedence.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(level)))
        .unwrap_or_else(|_| EnvFilter::new(directives("info")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;

    Ok(())
}
