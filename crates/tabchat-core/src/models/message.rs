use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A chat message as seen by UI surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    /// Ids of external resources (other tabs, usually) folded into the prompt.
    /// Carried along, never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_refs: Option<Vec<i64>>,
}

impl Message {
    pub fn user(content: impl Into<String>, context_refs: Option<Vec<i64>>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: now_millis(),
            context_refs,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: now_millis(),
            context_refs: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// One typed piece of persisted message content.
///
/// Only `text` parts are produced today. Unknown tags read back as `Other`
/// so rows written by a newer schema still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text {
        value: String,
    },
    #[serde(other)]
    Other,
}

impl Part {
    pub fn text(value: impl Into<String>) -> Self {
        Part::Text {
            value: value.into(),
        }
    }

    /// Content of the first text part, or an empty string.
    pub fn first_text(parts: &[Part]) -> String {
        parts
            .iter()
            .find_map(|part| match part {
                Part::Text { value } => Some(value.clone()),
                Part::Other => None,
            })
            .unwrap_or_default()
    }
}

/// Row shape of the `messages` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub sequence_index: i64,
    pub role: Role,
    pub parts: Vec<Part>,
    pub timestamp: i64,
    pub context_refs: Option<Vec<i64>>,
}

impl MessageRecord {
    /// Build a record with a fresh id for `message` at `sequence_index`.
    pub fn from_message(conversation_id: &str, sequence_index: i64, message: &Message) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sequence_index,
            role: message.role,
            parts: vec![Part::text(message.content.clone())],
            timestamp: message.timestamp,
            context_refs: message.context_refs.clone(),
        }
    }

    pub fn into_message(self) -> Message {
        Message {
            role: self.role,
            content: Part::first_text(&self.parts),
            timestamp: self.timestamp,
            context_refs: self.context_refs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        assert_eq!(Role::parse(Role::User.as_str()), Some(Role::User));
        assert_eq!(Role::parse(Role::Assistant.as_str()), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn test_unknown_part_tags_are_skipped_for_content() {
        let parts: Vec<Part> = serde_json::from_str(
            r#"[{"type":"image","url":"x.png"},{"type":"text","value":"hi"},{"type":"text","value":"later"}]"#,
        )
        .unwrap();

        assert_eq!(parts[0], Part::Other);
        assert_eq!(Part::first_text(&parts), "hi");
        assert_eq!(Part::first_text(&[]), "");
    }

    #[test]
    fn test_message_json_uses_camel_case_and_omits_missing_refs() {
        let mut message = Message::user("hello", Some(vec![7, 9]));
        message.timestamp = 42;
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["contextRefs"], serde_json::json!([7, 9]));
        assert_eq!(json["role"], "user");

        let plain = serde_json::to_value(Message::assistant("ok")).unwrap();
        assert!(plain.get("contextRefs").is_none());
    }

    #[test]
    fn test_record_conversion_keeps_refs_and_timestamp() {
        let mut message = Message::user("question", Some(vec![3]));
        message.timestamp = 1_000;

        let record = MessageRecord::from_message("conv-1", 4, &message);
        assert_eq!(record.sequence_index, 4);
        assert_eq!(record.parts, vec![Part::text("question")]);

        assert_eq!(record.into_message(), message);
    }
}
