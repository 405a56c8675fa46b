pub mod settings_store;
pub mod stream_merger;
pub mod sync_bus;
pub mod title_generator;

pub use settings_store::{DEBUG_KEY, GeneralSettings, SettingsChange, SettingsStore};
pub use stream_merger::{StreamChunk, StreamMerger, StreamStatus, merge_delta};
pub use sync_bus::{
    BroadcastSyncBus, ContextId, SYNC_EVENT_KEY, SettingsSyncBus, SyncBus, SyncError, SyncEvent,
    SyncEventKind, SyncListener, SyncResult, SyncTransport, select_sync_bus,
};
pub use title_generator::{DEFAULT_TITLE, derive_title, is_default_title};
