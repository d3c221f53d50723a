use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::models::MessageRecord;

/// One frame on the push channel: an event name and its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    #[serde(alias = "event_type")]
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl PushFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self { event: event.into(), data }
    }
}

pub const NEW_CHAT_SESSION: &str = "newChatSession";
pub const SEND_MESSAGE: &str = "sendMessage";

/// Topic names, parameterized by the operator identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub new_message: String,
    pub unread_count: String,
    pub new_conversation: String,
}

impl Topics {
    pub fn for_operator(operator_id: &str) -> Self {
        Self {
            new_message: format!("newMessage::{operator_id}"),
            unread_count: format!("unreadCountUpdate::{operator_id}"),
            new_conversation: NEW_CHAT_SESSION.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PushEvent {
    NewMessage {
        conversation_id: String,
        message: MessageRecord,
    },
    UnreadCount {
        conversation_id: String,
        unread_count: u32,
    },
    NewConversation,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMessagePayload {
    #[serde(default)]
    chat_id: Option<String>,
    message: MessageRecord,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnreadPayload {
    chat_id: String,
    unread_count: u32,
}

impl PushEvent {
    /// Accepts both `{chatId, message}` and a bare message record carrying its own `chatId`.
    pub fn new_message(data: Value) -> Result<Self, serde_json::Error> {
        let (chat_id, message) = match serde_json::from_value::<NewMessagePayload>(data.clone()) {
            Ok(payload) => (payload.chat_id, payload.message),
            Err(_) => {
                let message: MessageRecord = serde_json::from_value(data)?;
                (None, message)
            }
        };
        let conversation_id = chat_id
            .or_else(|| message.chat_id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| <serde_json::Error as serde::de::Error>::missing_field("chatId"))?;
        Ok(Self::NewMessage { conversation_id, message })
    }

    pub fn unread_count(data: Value) -> Result<Self, serde_json::Error> {
        let payload: UnreadPayload = serde_json::from_value(data)?;
        Ok(Self::UnreadCount {
            conversation_id: payload.chat_id,
            unread_count: payload.unread_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topics_carry_operator() {
        let topics = Topics::for_operator("op42");
        assert_eq!(topics.new_message, "newMessage::op42");
        assert_eq!(topics.unread_count, "unreadCountUpdate::op42");
        assert_eq!(topics.new_conversation, "newChatSession");
    }

    #[test]
    fn wrapped_and_bare_messages_decode() {
        let record = json!({
            "_id": "m1",
            "sender": {"_id": "u1", "name": "Jane"},
            "text": "hi",
            "createdAt": "2024-05-01T10:00:00Z"
        });
        let wrapped = PushEvent::new_message(json!({"chatId": "c1", "message": record.clone()})).unwrap();
        assert!(matches!(wrapped, PushEvent::NewMessage { ref conversation_id, .. } if conversation_id == "c1"));

        let mut bare = record.clone();
        bare["chatId"] = json!("c2");
        let bare = PushEvent::new_message(bare).unwrap();
        assert!(matches!(bare, PushEvent::NewMessage { ref conversation_id, .. } if conversation_id == "c2"));

        assert!(PushEvent::new_message(record).is_err());
    }

    #[test]
    fn unread_payload_decodes() {
        let ev = PushEvent::unread_count(json!({"chatId": "c1", "unreadCount": 4})).unwrap();
        assert!(matches!(ev, PushEvent::UnreadCount { unread_count: 4, .. }));
        assert!(PushEvent::unread_count(json!({"chatId": "c1"})).is_err());
    }

    #[test]
    fn frame_accepts_legacy_field_name() {
        let frame: PushFrame = serde_json::from_str(r#"{"event_type":"ping","data":null}"#).unwrap();
        assert_eq!(frame.event, "ping");
    }
}
