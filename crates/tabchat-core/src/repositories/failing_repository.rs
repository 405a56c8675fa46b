//! Shared test helpers for controller unit tests.
//!
//! Provides `FailingRecordStore`, used by the conversation engine and tab
//! controller suites to reject writes and count reads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::error::{RepositoryError, RepositoryResult};
use super::in_memory_repository::InMemoryRecordStore;
use super::record_store::{BoxFuture, RecordStore};
use crate::models::{Conversation, ConversationRecord, Message, MessageRecord, NewConversation};

/// In-memory [`RecordStore`] whose writes can be switched to fail. Clones
/// share switches, counters and data.
#[derive(Clone, Default)]
pub(crate) struct FailingRecordStore {
    pub inner: InMemoryRecordStore,
    pub fail_replace: Arc<AtomicBool>,
    pub fail_rename: Arc<AtomicBool>,
    pub list_calls: Arc<AtomicUsize>,
    pub get_calls: Arc<AtomicUsize>,
}

impl FailingRecordStore {
    pub fn over(inner: InMemoryRecordStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    fn rejected<T: Send + 'static>() -> BoxFuture<'static, RepositoryResult<T>> {
        Box::pin(async {
            Err(RepositoryError::InvalidData {
                message: "disk full".into(),
            })
        })
    }
}

impl RecordStore for FailingRecordStore {
    fn list_conversations(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationRecord>>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_conversations()
    }

    fn get_conversation(&self, id: &str) -> BoxFuture<'static, RepositoryResult<Conversation>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
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
        self.inner.create_conversation(meta)
    }

    fn rename_conversation(&self, id: &str, title: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        if self.fail_rename.load(Ordering::SeqCst) {
            return Self::rejected();
        }
        self.inner.rename_conversation(id, title)
    }

    fn replace_messages(
        &self,
        id: &str,
        messages: Vec<Message>,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        if self.fail_replace.load(Ordering::SeqCst) {
            return Self::rejected();
        }
        self.inner.replace_messages(id, messages)
    }

    fn append_message(
        &self,
        id: &str,
        message: Message,
    ) -> BoxFuture<'static, RepositoryResult<String>> {
        self.inner.append_message(id, message)
    }

    fn delete_conversation(&self, id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        self.inner.delete_conversation(id)
    }

    fn delete_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<String>>> {
        self.inner.delete_all()
    }
}
