use std::sync::Arc;

use tracing::{debug, warn};

use super::error::RepositoryResult;
use super::record_store::{BoxFuture, RecordStore};
use crate::models::{Conversation, ConversationRecord, Message, MessageRecord, NewConversation};
use crate::services::{ContextId, SyncBus, SyncEvent, SyncEventKind};

/// Record store decorator that announces every successful mutation on the
/// sync bus, tagged with the owning context so it can skip its own echoes.
///
/// Notification is best-effort: a failed publish is logged and the store
/// result is returned unchanged.
#[derive(Clone)]
pub struct NotifyingRecordStore {
    inner: Arc<dyn RecordStore>,
    bus: Arc<dyn SyncBus>,
    origin: ContextId,
}

impl NotifyingRecordStore {
    pub fn new(inner: Arc<dyn RecordStore>, bus: Arc<dyn SyncBus>, origin: ContextId) -> Self {
        Self { inner, bus, origin }
    }
}

async fn announce(bus: &Arc<dyn SyncBus>, origin: ContextId, kind: SyncEventKind, id: &str) {
    debug!(%origin, ?kind, conversation_id = %id, "Publishing change notification");
    if let Err(e) = bus.publish(origin, SyncEvent::new(kind, id)).await {
        warn!(error = ?e, ?kind, conversation_id = %id, "Failed to publish change notification");
    }
}

impl RecordStore for NotifyingRecordStore {
    fn list_conversations(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationRecord>>> {
        self.inner.list_conversations()
    }

    fn get_conversation(&self, id: &str) -> BoxFuture<'static, RepositoryResult<Conversation>> {
        self.inner.get_conversation(id)
    }

    fn load_message_records(
        &self,
        id: &str,
    ) -> BoxFuture<'static, RepositoryResult<Vec<MessageRecord>>> {
        self.inner.load_message_records(id)
    }

    fn create_conversation(
        &self,
        meta: NewConversation,
    ) -> BoxFuture<'static, RepositoryResult<String>> {
        let fut = self.inner.create_conversation(meta);
        let (bus, origin) = (self.bus.clone(), self.origin);
        Box::pin(async move {
            let id = fut.await?;
            announce(&bus, origin, SyncEventKind::Updated, &id).await;
            Ok(id)
        })
    }

    fn rename_conversation(
        &self,
        id: &str,
        title: &str,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let fut = self.inner.rename_conversation(id, title);
        let (bus, origin, id) = (self.bus.clone(), self.origin, id.to_string());
        Box::pin(async move {
            fut.await?;
            announce(&bus, origin, SyncEventKind::Updated, &id).await;
            Ok(())
        })
    }

    fn replace_messages(
        &self,
        id: &str,
        messages: Vec<Message>,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let fut = self.inner.replace_messages(id, messages);
        let (bus, origin, id) = (self.bus.clone(), self.origin, id.to_string());
        Box::pin(async move {
            fut.await?;
            announce(&bus, origin, SyncEventKind::MessageUpdated, &id).await;
            Ok(())
        })
    }

    fn append_message(
        &self,
        id: &str,
        message: Message,
    ) -> BoxFuture<'static, RepositoryResult<String>> {
        let fut = self.inner.append_message(id, message);
        let (bus, origin, id) = (self.bus.clone(), self.origin, id.to_string());
        Box::pin(async move {
            let message_id = fut.await?;
            announce(&bus, origin, SyncEventKind::MessageAdded, &id).await;
            Ok(message_id)
        })
    }

    fn delete_conversation(&self, id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let fut = self.inner.delete_conversation(id);
        let (bus, origin, id) = (self.bus.clone(), self.origin, id.to_string());
        Box::pin(async move {
            fut.await?;
            announce(&bus, origin, SyncEventKind::Deleted, &id).await;
            Ok(())
        })
    }

    fn delete_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<String>>> {
        let fut = self.inner.delete_all();
        let (bus, origin) = (self.bus.clone(), self.origin);
        Box::pin(async move {
            let ids = fut.await?;
            for id in &ids {
                announce(&bus, origin, SyncEventKind::Deleted, id).await;
            }
            Ok(ids)
        })
    }
}
