use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{ContextId, Envelope, SyncBus, SyncEvent, SyncListener, SyncResult, SyncTransport};
use crate::models::Subscription;
use crate::models::subscription::invoke_guarded;
use crate::repositories::BoxFuture;
use crate::services::SettingsStore;

/// Settings key the fallback transport writes envelopes under.
pub const SYNC_EVENT_KEY: &str = "tabchat.sync.event";

/// Fallback transport: each publish writes the envelope to a well-known
/// settings key and other contexts observe the write. The key is cleared
/// shortly afterwards unless a newer publish has replaced it.
#[derive(Clone)]
pub struct SettingsSyncBus {
    settings: Arc<SettingsStore>,
    cleanup_delay: Duration,
    generation: Arc<AtomicU64>,
}

impl SettingsSyncBus {
    pub fn new(settings: Arc<SettingsStore>, cleanup_delay: Duration) -> Self {
        Self {
            settings,
            cleanup_delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl SyncBus for SettingsSyncBus {
    fn transport(&self) -> SyncTransport {
        SyncTransport::Settings
    }

    fn publish(&self, origin: ContextId, event: SyncEvent) -> BoxFuture<'static, SyncResult<()>> {
        let settings = self.settings.clone();
        let generation = self.generation.clone();
        let delay = self.cleanup_delay;

        Box::pin(async move {
            let value = serde_json::to_value(Envelope { origin, event })?;
            // Claimed before the write so generations follow write order.
            let published = generation.fetch_add(1, Ordering::SeqCst) + 1;
            settings.set(SYNC_EVENT_KEY, value.clone()).await?;

            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if generation.load(Ordering::SeqCst) != published {
                    return;
                }
                if let Err(e) = settings.remove_if_eq(SYNC_EVENT_KEY, &value).await {
                    warn!(error = ?e, "Failed to clear sync event key");
                }
            });

            Ok(())
        })
    }

    fn subscribe(&self, origin: ContextId, listener: SyncListener) -> Subscription {
        let mut changes = self.settings.subscribe();

        let task = tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%origin, skipped, "Settings sync subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if change.key != SYNC_EVENT_KEY {
                    continue;
                }
                // Removal by the cleanup task carries no event.
                let Some(value) = change.new_value else {
                    continue;
                };

                match serde_json::from_value::<Envelope>(value) {
                    Ok(envelope) if envelope.origin == origin => {}
                    Ok(envelope) => {
                        invoke_guarded("sync listener", || listener(&envelope.event));
                    }
                    Err(e) => debug!(error = ?e, "Ignoring malformed sync envelope"),
                }
            }
        });

        Subscription::new(move || task.abort())
    }
}
