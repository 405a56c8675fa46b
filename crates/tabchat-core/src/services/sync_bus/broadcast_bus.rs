use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{ContextId, Envelope, SyncBus, SyncEvent, SyncListener, SyncResult, SyncTransport};
use crate::models::Subscription;
use crate::models::subscription::invoke_guarded;
use crate::repositories::BoxFuture;

/// Direct, volatile broadcast between contexts of one host.
///
/// Cloning yields another handle on the same medium. Nothing is buffered for
/// contexts that subscribe after a publish.
#[derive(Clone)]
pub struct BroadcastSyncBus {
    sender: broadcast::Sender<Envelope>,
}

impl BroadcastSyncBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl SyncBus for BroadcastSyncBus {
    fn transport(&self) -> SyncTransport {
        SyncTransport::Broadcast
    }

    fn publish(&self, origin: ContextId, event: SyncEvent) -> BoxFuture<'static, SyncResult<()>> {
        // Nobody listening is not an error for a volatile channel.
        if self.sender.send(Envelope { origin, event }).is_err() {
            debug!("Sync event published with no subscribers");
        }
        Box::pin(async { Ok(()) })
    }

    fn subscribe(&self, origin: ContextId, listener: SyncListener) -> Subscription {
        let mut receiver = self.sender.subscribe();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) if envelope.origin == origin => {}
                    Ok(envelope) => {
                        invoke_guarded("sync listener", || listener(&envelope.event));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%origin, skipped, "Sync subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription::new(move || task.abort())
    }
}
