use serde::{Deserialize, Serialize};

use super::message::Message;

/// Row shape of the `conversations` table. Messages live in their own table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: String,
    pub title: String,
    pub origin_url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Lightweight entry of the conversation list shown in history surfaces.
pub type ConversationSummary = ConversationRecord;

/// Metadata for a conversation about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub title: String,
    pub origin_url: String,
}

/// A conversation with its messages in authoritative order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub origin_url: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    pub fn from_parts(record: ConversationRecord, messages: Vec<Message>) -> Self {
        Self {
            id: record.id,
            origin_url: record.origin_url,
            title: record.title,
            messages,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
