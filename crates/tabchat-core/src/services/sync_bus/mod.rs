//! Cross-context change notification.
//!
//! Contexts publish small "something changed" events; every *other* context
//! subscribed to the same medium receives them. Delivery is best-effort: no
//! acknowledgment, no retry, no ordering between kinds, and late subscribers
//! miss earlier events.
//!
//! Two interchangeable transports implement [`SyncBus`]:
//!
//! - [`BroadcastSyncBus`]: the direct, volatile broadcast primitive.
//! - [`SettingsSyncBus`]: round-trips envelopes through the shared
//!   [`SettingsStore`](crate::services::SettingsStore), used when the host has
//!   no broadcast primitive.
//!
//! [`select_sync_bus`] picks one at startup.

mod broadcast_bus;
mod settings_bus;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Subscription, now_millis};
use crate::repositories::{BoxFuture, SettingsError};
use crate::services::SettingsStore;

pub use broadcast_bus::BroadcastSyncBus;
pub use settings_bus::{SYNC_EVENT_KEY, SettingsSyncBus};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Primary broadcast transport unavailable")]
    Unavailable,

    #[error("Settings transport failed: {0}")]
    Settings(#[from] SettingsError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncEventKind {
    /// Conversation metadata changed (created, renamed).
    Updated,
    Deleted,
    MessageAdded,
    MessageUpdated,
}

impl SyncEventKind {
    /// Whether receivers should reload their conversation list.
    pub fn affects_list(&self) -> bool {
        matches!(self, SyncEventKind::Updated | SyncEventKind::Deleted)
    }
}

/// The notification envelope seen by listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    pub conversation_id: String,
    pub timestamp: i64,
}

impl SyncEvent {
    pub fn new(kind: SyncEventKind, conversation_id: impl Into<String>) -> Self {
        Self {
            kind,
            conversation_id: conversation_id.into(),
            timestamp: now_millis(),
        }
    }
}

/// Identity of one execution context, used to skip its own events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What actually travels over a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Envelope {
    pub origin: ContextId,
    #[serde(flatten)]
    pub event: SyncEvent,
}

pub type SyncListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTransport {
    Broadcast,
    Settings,
}

pub trait SyncBus: Send + Sync + 'static {
    fn transport(&self) -> SyncTransport;

    /// Broadcast `event` to every context other than `origin`.
    fn publish(&self, origin: ContextId, event: SyncEvent) -> BoxFuture<'static, SyncResult<()>>;

    /// Deliver events from other contexts to `listener` until the returned
    /// subscription is dropped. Must be called inside a tokio runtime.
    fn subscribe(&self, origin: ContextId, listener: SyncListener) -> Subscription;
}

/// Startup capability detection: use the native broadcast primitive when the
/// host provides one, otherwise fall back to the settings round-trip.
pub fn select_sync_bus(
    native: Option<BroadcastSyncBus>,
    settings: Arc<SettingsStore>,
    cleanup_delay: Duration,
) -> Arc<dyn SyncBus> {
    match native {
        Some(bus) => {
            info!("Using broadcast sync transport");
            Arc::new(bus)
        }
        None => {
            let reason = EngineError::from(SyncError::Unavailable);
            debug!(error = %reason, "Falling back to settings sync transport");
            Arc::new(SettingsSyncBus::new(settings, cleanup_delay))
        }
    }
}
