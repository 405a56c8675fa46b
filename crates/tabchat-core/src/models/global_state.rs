use super::conversation::ConversationSummary;
use super::message::Message;

/// The persistently browsable view shared by every surface of a context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalState {
    pub active_conversation_id: Option<String>,
    /// Messages of the active conversation, empty when none is active.
    pub messages: Vec<Message>,
    /// All conversations, most recently updated first.
    pub conversations: Vec<ConversationSummary>,
}

impl GlobalState {
    pub fn is_active(&self, id: &str) -> bool {
        self.active_conversation_id.as_deref() == Some(id)
    }

    pub fn summary(&self, id: &str) -> Option<&ConversationSummary> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// The N most recent conversations, for compact history lists.
    pub fn list_recent(&self, limit: usize) -> &[ConversationSummary] {
        &self.conversations[..limit.min(self.conversations.len())]
    }

    pub(crate) fn clear_active(&mut self) {
        self.active_conversation_id = None;
        self.messages.clear();
    }
}
