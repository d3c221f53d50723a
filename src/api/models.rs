use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const NO_MESSAGES_PREVIEW: &str = "No messages yet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConversationStatus {
    Active,
    Waiting,
    Closed,
}

impl ConversationStatus {
    /// The backend sends lowercase names; anything unrecognised counts as active.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "WAITING" => Self::Waiting,
            "CLOSED" => Self::Closed,
            _ => Self::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    pub text: String,
    pub at: DateTime<Utc>,
}

/// One support thread as the operator sees it in the session list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub counterpart_name: String,
    pub counterpart_email: String,
    pub avatar_ref: Option<String>,
    pub last_message: Preview,
    pub unread_count: u32,
    pub status: ConversationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_display_name: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub is_own: bool,
    /// Locally created and not yet confirmed by the server.
    pub provisional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// The signed-in operator. Passed explicitly wherever identity matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub id: String,
    pub display_name: String,
}

// Wire records of the REST backend.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageMeta {
    pub limit: u32,
    pub page: u32,
    pub total: u32,
    pub total_page: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_image: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub participants: Vec<ParticipantRecord>,
    /// Either a populated message object, a bare id or null depending on the endpoint.
    #[serde(default)]
    pub last_message: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub unread_count: Option<u32>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChatRecord {
    /// Builds the directory entry. Display attributes come from the first
    /// participant that is not the operator.
    pub fn to_conversation(&self, operator_id: &str) -> Conversation {
        let counterpart = self
            .participants
            .iter()
            .find(|p| p.id != operator_id)
            .or_else(|| self.participants.first());

        let email = counterpart.and_then(|p| p.email.clone()).filter(|e| !e.is_empty());
        let name = counterpart
            .and_then(|p| p.name.clone())
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Unknown".to_string());

        let last = self.last_message.as_ref().filter(|v| v.is_object());
        let text = last
            .and_then(|m| m.get("text"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or(NO_MESSAGES_PREVIEW)
            .to_string();
        let at = last
            .and_then(|m| m.get("updatedAt").or_else(|| m.get("createdAt")))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .or(self.updated_at)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Conversation {
            id: self.id.clone(),
            counterpart_name: name,
            counterpart_email: email.unwrap_or_else(|| "No Email".to_string()),
            avatar_ref: counterpart.and_then(|p| p.profile_image.clone()).filter(|a| !a.is_empty()),
            last_message: Preview { text, at },
            unread_count: self.unread_count.unwrap_or(0),
            status: self
                .status
                .as_deref()
                .map(ConversationStatus::parse)
                .unwrap_or(ConversationStatus::Active),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_image: Option<String>,
}

/// Also serialized when a message is forwarded inside a push payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub sender: SenderRecord,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// `conversation_id` is used when the record does not name its chat.
    pub fn to_message(&self, conversation_id: &str, operator_id: &str) -> Message {
        let sender_display_name = self
            .sender
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.sender.email.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        Message {
            id: self.id.clone(),
            conversation_id: self
                .chat_id
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| conversation_id.to_string()),
            sender_id: self.sender.id.clone(),
            sender_display_name,
            body: self.text.clone(),
            sent_at: self.created_at,
            is_own: self.sender.id == operator_id,
            provisional: false,
        }
    }
}

/// `data` section of `GET /chats`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatsData {
    pub chats: Vec<ChatRecord>,
    pub unread_chats_count: u32,
    pub total_unread_messages: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ChatsPage {
    pub chats: Vec<ChatRecord>,
    pub unread_chats_count: u32,
    pub total_unread_messages: u32,
    pub meta: PageMeta,
}

/// `data` section of `GET /messages/{chatId}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryPage {
    pub messages: Vec<MessageRecord>,
    pub pinned_messages: Vec<MessageRecord>,
}

/// Standard response wrapper used by every endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

fn default_success() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat(value: Value) -> ChatRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn counterpart_skips_operator() {
        let record = chat(json!({
            "_id": "c1",
            "participants": [
                {"_id": "op", "email": "admin@shop.test"},
                {"_id": "u1", "email": "jane.doe@mail.test", "name": "Jane Doe", "profileImage": "/img/jane.png"}
            ],
            "lastMessage": {"text": "hi", "updatedAt": "2024-05-01T10:00:00Z"},
            "status": "waiting",
            "unreadCount": 3,
            "updatedAt": "2024-04-30T08:00:00Z"
        }));
        let conv = record.to_conversation("op");
        assert_eq!(conv.counterpart_name, "Jane Doe");
        assert_eq!(conv.counterpart_email, "jane.doe@mail.test");
        assert_eq!(conv.avatar_ref.as_deref(), Some("/img/jane.png"));
        assert_eq!(conv.last_message.text, "hi");
        assert_eq!(conv.last_message.at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert_eq!(conv.unread_count, 3);
        assert_eq!(conv.status, ConversationStatus::Waiting);
    }

    #[test]
    fn fallbacks_when_details_are_missing() {
        let record = chat(json!({
            "_id": "c2",
            "participants": [{"_id": "u2", "email": "bob@mail.test"}],
            "lastMessage": null,
            "updatedAt": "2024-04-30T08:00:00Z"
        }));
        let conv = record.to_conversation("op");
        assert_eq!(conv.counterpart_name, "bob");
        assert_eq!(conv.last_message.text, NO_MESSAGES_PREVIEW);
        assert_eq!(conv.last_message.at.to_rfc3339(), "2024-04-30T08:00:00+00:00");
        assert_eq!(conv.unread_count, 0);
        assert_eq!(conv.status, ConversationStatus::Active);

        let empty = chat(json!({"_id": "c3", "lastMessage": "65f0c0ffee"}));
        let conv = empty.to_conversation("op");
        assert_eq!(conv.counterpart_name, "Unknown");
        assert_eq!(conv.counterpart_email, "No Email");
        assert_eq!(conv.last_message.at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn message_ownership_follows_operator() {
        let record: MessageRecord = serde_json::from_value(json!({
            "_id": "m1",
            "sender": {"_id": "op", "name": "Support"},
            "text": "hello",
            "createdAt": "2024-05-01T10:00:00.000Z"
        }))
        .unwrap();
        let own = record.to_message("c1", "op");
        assert!(own.is_own);
        assert_eq!(own.conversation_id, "c1");
        assert_eq!(own.sender_display_name, "Support");
        assert!(!record.to_message("c1", "someone-else").is_own);
    }

    #[test]
    fn message_record_survives_reencoding() {
        let record: MessageRecord = serde_json::from_value(json!({
            "_id": "m1",
            "chatId": "c1",
            "sender": {"_id": "u1", "name": "Jane"},
            "text": "hello",
            "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        let encoded = serde_json::to_value(&record).unwrap();
        assert_eq!(encoded["_id"], "m1");
        assert_eq!(encoded["chatId"], "c1");
        assert_eq!(encoded["sender"]["_id"], "u1");
        let decoded: MessageRecord = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.to_message("c1", "op"), record.to_message("c1", "op"));
    }
}
