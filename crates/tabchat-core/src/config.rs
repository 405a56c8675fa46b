use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::BroadcastSyncBus;

const APP_DIR: &str = "tabchat";
const DATABASE_FILE: &str = "conversations.db";
const SETTINGS_FILE: &str = "settings.json";

/// Where the shared stores live and how the sync bus behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub settings_path: PathBuf,
    /// How long the settings transport keeps a published event before
    /// clearing it.
    pub sync_cleanup_delay: Duration,
    /// Events buffered per subscriber on the broadcast transport.
    pub broadcast_capacity: usize,
}

impl EngineConfig {
    pub const DEFAULT_SYNC_CLEANUP_DELAY: Duration = Duration::from_millis(100);
    pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

    /// Stores under the platform config directory (`<config>/tabchat/`).
    pub fn default_paths() -> Result<Self> {
        let config_dir = dirs::config_dir().context("Cannot determine config directory")?;
        Ok(Self::with_base_dir(config_dir.join(APP_DIR)))
    }

    /// Stores under `dir`, e.g. a temporary directory in tests.
    pub fn with_base_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            database_path: dir.join(DATABASE_FILE),
            settings_path: dir.join(SETTINGS_FILE),
            sync_cleanup_delay: Self::DEFAULT_SYNC_CLEANUP_DELAY,
            broadcast_capacity: Self::DEFAULT_BROADCAST_CAPACITY,
        }
    }

    /// The broadcast transport for hosts that have a native broadcast
    /// primitive. Pass it to [`Host::open`](crate::Host::open).
    pub fn broadcast_bus(&self) -> BroadcastSyncBus {
        BroadcastSyncBus::new(self.broadcast_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_dir_layout() {
        let config = EngineConfig::with_base_dir("/tmp/tc");
        assert_eq!(config.database_path, PathBuf::from("/tmp/tc/conversations.db"));
        assert_eq!(config.settings_path, PathBuf::from("/tmp/tc/settings.json"));
        assert_eq!(config.sync_cleanup_delay, Duration::from_millis(100));
        assert_eq!(config.broadcast_capacity, EngineConfig::DEFAULT_BROADCAST_CAPACITY);
    }
}
