use std::future::Future;
use std::pin::Pin;

use super::error::RepositoryResult;
use crate::models::{Conversation, ConversationRecord, Message, MessageRecord, NewConversation};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable storage for conversations and their messages.
///
/// Two normalized tables: conversation metadata, and message rows keyed by
/// `(conversation_id, sequence_index)`. Sequence indices are contiguous from 0
/// and are the only sort key. Every mutation bumps the conversation's
/// `updated_at`. Operations on a missing id fail with `NotFound`.
pub trait RecordStore: Send + Sync + 'static {
    /// All conversations, most recently updated first.
    fn list_conversations(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationRecord>>>;

    /// Metadata plus messages in sequence order.
    fn get_conversation(&self, id: &str) -> BoxFuture<'static, RepositoryResult<Conversation>>;

    /// Raw message rows in sequence order.
    fn load_message_records(
        &self,
        id: &str,
    ) -> BoxFuture<'static, RepositoryResult<Vec<MessageRecord>>>;

    fn create_conversation(
        &self,
        meta: NewConversation,
    ) -> BoxFuture<'static, RepositoryResult<String>>;

    fn rename_conversation(
        &self,
        id: &str,
        title: &str,
    ) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Atomically replace every message of the conversation with `messages`,
    /// re-indexed from 0.
    fn replace_messages(
        &self,
        id: &str,
        messages: Vec<Message>,
    ) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Append one message at the next sequence index. Returns the message id.
    fn append_message(
        &self,
        id: &str,
        message: Message,
    ) -> BoxFuture<'static, RepositoryResult<String>>;

    /// Remove the conversation row and all of its message rows.
    fn delete_conversation(&self, id: &str) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Remove everything. Returns the ids that were deleted.
    fn delete_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<String>>>;
}
