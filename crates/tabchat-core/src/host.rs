use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::EngineConfig;
use crate::controllers::ConversationEngine;
use crate::error::EngineResult;
use crate::logging::init_logging;
use crate::repositories::{
    ConversationSqliteRepository, InMemoryRecordStore, InMemorySettingsRepository, RecordStore,
    SettingsJsonRepository,
};
use crate::services::{BroadcastSyncBus, SettingsStore, SyncBus, select_sync_bus};

/// Resources shared by every execution context of one extension instance:
/// the record store, the settings store and the sync bus medium.
///
/// Constructed once at startup. Each context then gets its own engine from
/// [`Host::new_context`].
#[derive(Clone)]
pub struct Host {
    store: Arc<dyn RecordStore>,
    settings: Arc<SettingsStore>,
    bus: Arc<dyn SyncBus>,
}

impl Host {
    /// Open the on-disk stores described by `config`. `native` is the host's
    /// broadcast primitive, if it has one; otherwise events travel through
    /// the settings store.
    pub async fn open(config: &EngineConfig, native: Option<BroadcastSyncBus>) -> Result<Self> {
        let settings = SettingsStore::load(Arc::new(SettingsJsonRepository::with_path(
            config.settings_path.clone(),
        )))
        .await
        .with_context(|| format!("Failed to load settings from {}", config.settings_path.display()))?;

        let store = ConversationSqliteRepository::open(&config.database_path)
            .await
            .with_context(|| {
                format!("Failed to open database at {}", config.database_path.display())
            })?;

        let settings = Arc::new(settings);
        let bus = select_sync_bus(native, settings.clone(), config.sync_cleanup_delay);

        info!(database = %config.database_path.display(), "Host resources opened");
        Ok(Self {
            store: Arc::new(store),
            settings,
            bus,
        })
    }

    /// Non-durable host, for tests and private browsing sessions.
    pub async fn in_memory(native: Option<BroadcastSyncBus>) -> Result<Self> {
        let settings = Arc::new(
            SettingsStore::load(Arc::new(InMemorySettingsRepository::new()))
                .await
                .context("Failed to initialize in-memory settings")?,
        );
        let bus = select_sync_bus(
            native,
            settings.clone(),
            EngineConfig::DEFAULT_SYNC_CLEANUP_DELAY,
        );

        Ok(Self {
            store: Arc::new(InMemoryRecordStore::new()),
            settings,
            bus,
        })
    }

    /// Install logging at the level selected by the `debug` setting.
    pub fn init_logging(&self) -> Result<()> {
        init_logging(self.settings.general().debug)
    }

    /// Create and start the engine for one execution context.
    pub async fn new_context(&self) -> EngineResult<Arc<ConversationEngine>> {
        let engine = ConversationEngine::new(self.store.clone(), self.bus.clone());
        engine.start().await?;
        Ok(engine)
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn bus(&self) -> &Arc<dyn SyncBus> {
        &self.bus
    }
}
