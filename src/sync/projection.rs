//! View Projection: derives what the rendering layer shows. No state, no side effects.

use chrono::{DateTime, Utc};

use crate::api::models::{ConversationStatus, Message};
use crate::sync::directory::ChatDirectory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar_ref: Option<String>,
    /// Avatar fallback: first letter of each word of the name.
    pub initials: String,
    pub preview: String,
    pub at: DateTime<Utc>,
    pub unread_count: u32,
    pub status: ConversationStatus,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub id: String,
    pub sender: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub is_own: bool,
    pub pending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub sessions: Vec<SessionRow>,
    pub transcript: Vec<TranscriptLine>,
    pub pinned: Vec<TranscriptLine>,
    pub active_count: usize,
    pub unread_conversations: usize,
    pub total_unread: u64,
}

pub fn project(
    directory: &ChatDirectory,
    active_id: Option<&str>,
    transcript: &[Message],
    pinned: &[Message],
) -> Projection {
    let sessions = directory
        .sorted()
        .map(|c| SessionRow {
            id: c.id.clone(),
            name: c.counterpart_name.clone(),
            email: c.counterpart_email.clone(),
            avatar_ref: c.avatar_ref.clone(),
            initials: initials(&c.counterpart_name),
            preview: c.last_message.text.clone(),
            at: c.last_message.at,
            unread_count: c.unread_count,
            status: c.status,
            selected: active_id == Some(c.id.as_str()),
        })
        .collect();

    Projection {
        sessions,
        transcript: transcript.iter().map(line).collect(),
        pinned: pinned.iter().map(line).collect(),
        active_count: directory.active_count(),
        unread_conversations: directory.unread_conversations(),
        total_unread: directory.total_unread(),
    }
}

fn line(m: &Message) -> TranscriptLine {
    TranscriptLine {
        id: m.id.clone(),
        sender: m.sender_display_name.clone(),
        body: m.body.clone(),
        sent_at: m.sent_at,
        is_own: m.is_own,
        pending: m.provisional,
    }
}

pub fn initials(name: &str) -> String {
    name.split_whitespace().filter_map(|w| w.chars().next()).collect()
}
