use super::message::Message;

/// Every mutation a surface can request on a message list.
///
/// Shared by global and tab dispatch; each variant carries exactly the
/// fields it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationAction {
    AddUserMessage {
        content: String,
        context_refs: Option<Vec<i64>>,
    },
    AddAssistantMessage {
        content: String,
    },
    /// Sent once per streamed chunk with the already merged text.
    UpdateStreamingMessage {
        content: String,
    },
    ClearConversation,
    SetConversation {
        messages: Vec<Message>,
    },
}

impl ConversationAction {
    pub fn user(content: impl Into<String>) -> Self {
        ConversationAction::AddUserMessage {
            content: content.into(),
            context_refs: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConversationAction::AddUserMessage { .. } => "add_user_message",
            ConversationAction::AddAssistantMessage { .. } => "add_assistant_message",
            ConversationAction::UpdateStreamingMessage { .. } => "update_streaming_message",
            ConversationAction::ClearConversation => "clear_conversation",
            ConversationAction::SetConversation { .. } => "set_conversation",
        }
    }
}

/// Apply `action` to `messages`, returning the new list. The input is never
/// modified.
pub fn reduce(messages: &[Message], action: &ConversationAction) -> Vec<Message> {
    match action {
        ConversationAction::AddUserMessage {
            content,
            context_refs,
        } => {
            let mut next = messages.to_vec();
            next.push(Message::user(content.clone(), context_refs.clone()));
            next
        }
        ConversationAction::AddAssistantMessage { content } => {
            let mut next = messages.to_vec();
            next.push(Message::assistant(content.clone()));
            next
        }
        ConversationAction::UpdateStreamingMessage { content } => {
            let mut next = messages.to_vec();
            match next.last_mut() {
                Some(last) if last.is_assistant() => last.content = content.clone(),
                _ => next.push(Message::assistant(content.clone())),
            }
            next
        }
        ConversationAction::ClearConversation => Vec::new(),
        ConversationAction::SetConversation { messages } => messages.clone(),
    }
}

/// Content of the first user message, if any.
pub fn first_user_content(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .find(|m| m.is_user())
        .map(|m| m.content.as_str())
}
