use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install the process-wide fmt subscriber. `debug` lowers the default level
/// from INFO to DEBUG; `RUST_LOG` directives still apply on top.
pub fn init_logging(debug: bool) -> Result<()> {
    let level = if debug { Level::DEBUG } else { Level::INFO };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    tracing::info!(?level, "Logging initialized");
    Ok(())
}
