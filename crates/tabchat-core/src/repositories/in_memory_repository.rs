use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::error::{RepositoryError, RepositoryResult};
use super::record_store::{BoxFuture, RecordStore};
use crate::models::{
    Conversation, ConversationRecord, Message, MessageRecord, NewConversation, now_millis,
};

struct StoredConversation {
    record: ConversationRecord,
    messages: Vec<MessageRecord>,
}

impl StoredConversation {
    fn touch(&mut self) {
        self.record.updated_at = now_millis().max(self.record.created_at);
    }
}

/// In-memory record store.
/// Useful for testing and for hosts without durable storage. Each operation
/// holds the lock for its whole duration, which gives the same atomicity as a
/// transaction.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    conversations: Arc<Mutex<HashMap<String, StoredConversation>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn list_conversations(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationRecord>>> {
        let conversations = self.conversations.clone();
        Box::pin(async move {
            let store = conversations.lock();
            let mut result: Vec<ConversationRecord> =
                store.values().map(|c| c.record.clone()).collect();

            // Sort by updated_at descending
            result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

            Ok(result)
        })
    }

    fn get_conversation(&self, id: &str) -> BoxFuture<'static, RepositoryResult<Conversation>> {
        let conversations = self.conversations.clone();
        let id = id.to_string();
        Box::pin(async move {
            let store = conversations.lock();
            let stored = store
                .get(&id)
                .ok_or_else(|| RepositoryError::not_found(&id))?;
            let messages = stored
                .messages
                .iter()
                .cloned()
                .map(MessageRecord::into_message)
                .collect();
            Ok(Conversation::from_parts(stored.record.clone(), messages))
        })
    }

    fn load_message_records(
        &self,
        id: &str,
    ) -> BoxFuture<'static, RepositoryResult<Vec<MessageRecord>>> {
        let conversations = self.conversations.clone();
        let id = id.to_string();
        Box::pin(async move {
            Ok(conversations
                .lock()
                .get(&id)
                .map(|c| c.messages.clone())
                .unwrap_or_default())
        })
    }

    fn create_conversation(
        &self,
        meta: NewConversation,
    ) -> BoxFuture<'static, RepositoryResult<String>> {
        let conversations = self.conversations.clone();
        Box::pin(async move {
            let id = Uuid::new_v4().to_string();
            let now = now_millis();
            let record = ConversationRecord {
                id: id.clone(),
                title: meta.title,
                origin_url: meta.origin_url,
                created_at: now,
                updated_at: now,
            };
            conversations.lock().insert(
                id.clone(),
                StoredConversation {
                    record,
                    messages: Vec::new(),
                },
            );
            Ok(id)
        })
    }

    fn rename_conversation(
        &self,
        id: &str,
        title: &str,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let conversations = self.conversations.clone();
        let id = id.to_string();
        let title = title.to_string();
        Box::pin(async move {
            let mut store = conversations.lock();
            let stored = store
                .get_mut(&id)
                .ok_or_else(|| RepositoryError::not_found(&id))?;
            stored.record.title = title;
            stored.touch();
            Ok(())
        })
    }

    fn replace_messages(
        &self,
        id: &str,
        messages: Vec<Message>,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let conversations = self.conversations.clone();
        let id = id.to_string();
        Box::pin(async move {
            let mut store = conversations.lock();
            let stored = store
                .get_mut(&id)
                .ok_or_else(|| RepositoryError::not_found(&id))?;
            stored.messages = messages
                .iter()
                .enumerate()
                .map(|(index, m)| MessageRecord::from_message(&id, index as i64, m))
                .collect();
            stored.touch();
            Ok(())
        })
    }

    fn append_message(
        &self,
        id: &str,
        message: Message,
    ) -> BoxFuture<'static, RepositoryResult<String>> {
        let conversations = self.conversations.clone();
        let id = id.to_string();
        Box::pin(async move {
            let mut store = conversations.lock();
            let stored = store
                .get_mut(&id)
                .ok_or_else(|| RepositoryError::not_found(&id))?;
            let record =
                MessageRecord::from_message(&id, stored.messages.len() as i64, &message);
            let message_id = record.id.clone();
            stored.messages.push(record);
            stored.touch();
            Ok(message_id)
        })
    }

    fn delete_conversation(&self, id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let conversations = self.conversations.clone();
        let id = id.to_string();
        Box::pin(async move {
            conversations
                .lock()
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| RepositoryError::not_found(&id))
        })
    }

    fn delete_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<String>>> {
        let conversations = self.conversations.clone();
        Box::pin(async move {
            let mut store = conversations.lock();
            let ids = store.keys().cloned().collect();
            store.clear();
            Ok(ids)
        })
    }
}
