//! Chat Directory: the operator's conversation list, its ordering and unread counters.

use std::collections::HashMap;

use crate::api::models::{Conversation, ConversationStatus, Message, Preview};
use crate::error::SyncError;

/// Result of routing a live message into the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingOutcome {
    Applied,
    /// Nothing is known about the conversation; the caller should refetch.
    UnknownConversation,
}

/// Unread totals as last reported by the REST snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerTotals {
    pub unread_chats: u32,
    pub unread_messages: u32,
}

#[derive(Debug, Default, Clone)]
pub struct ChatDirectory {
    entries: HashMap<String, Conversation>,
    /// Ids sorted by preview time descending, then id ascending.
    order: Vec<String>,
    server_totals: ServerTotals,
}

impl ChatDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a REST page. Known entries are overwritten (REST unread counts win)
    /// except for a locally newer preview; unknown entries are inserted.
    pub fn load_snapshot(&mut self, conversations: Vec<Conversation>) {
        for mut incoming in conversations {
            if let Some(existing) = self.entries.get(&incoming.id) {
                if existing.last_message.at > incoming.last_message.at {
                    incoming.last_message = existing.last_message.clone();
                }
            }
            if !self.entries.contains_key(&incoming.id) {
                self.order.push(incoming.id.clone());
            }
            self.entries.insert(incoming.id.clone(), incoming);
        }
        self.resort();
    }

    pub fn set_server_totals(&mut self, totals: ServerTotals) {
        self.server_totals = totals;
    }

    pub fn server_totals(&self) -> ServerTotals {
        self.server_totals
    }

    /// Updates the preview and, for a conversation the operator is not
    /// looking at, bumps its unread counter by one.
    pub fn apply_incoming_message(
        &mut self,
        conversation_id: &str,
        message: &Message,
        is_conversation_active: bool,
    ) -> IncomingOutcome {
        let Some(entry) = self.entries.get_mut(conversation_id) else {
            return IncomingOutcome::UnknownConversation;
        };
        if message.sent_at >= entry.last_message.at {
            entry.last_message = Preview {
                text: message.body.clone(),
                at: message.sent_at,
            };
        }
        if !is_conversation_active {
            entry.unread_count = entry.unread_count.saturating_add(1);
        }
        self.resort();
        IncomingOutcome::Applied
    }

    /// Returns false if the conversation is unknown.
    pub fn apply_unread_reset(&mut self, conversation_id: &str) -> bool {
        self.apply_unread_count(conversation_id, 0)
    }

    /// Server-reported count, taken as authoritative.
    pub fn apply_unread_count(&mut self, conversation_id: &str, unread_count: u32) -> bool {
        match self.entries.get_mut(conversation_id) {
            Some(entry) => {
                entry.unread_count = unread_count;
                true
            }
            None => false,
        }
    }

    pub fn select(&self, conversation_id: &str) -> Result<&Conversation, SyncError> {
        self.entries
            .get(conversation_id)
            .ok_or_else(|| SyncError::NotFound(conversation_id.to_string()))
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.entries.get(conversation_id)
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.entries.contains_key(conversation_id)
    }

    pub fn sorted(&self) -> impl Iterator<Item = &Conversation> + '_ {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unread_conversations(&self) -> usize {
        self.entries.values().filter(|c| c.unread_count > 0).count()
    }

    pub fn total_unread(&self) -> u64 {
        self.entries.values().map(|c| u64::from(c.unread_count)).sum()
    }

    pub fn active_count(&self) -> usize {
        self.entries
            .values()
            .filter(|c| c.status == ConversationStatus::Active)
            .count()
    }

    fn resort(&mut self) {
        let entries = &self.entries;
        self.order.sort_by(|a, b| {
            let (ea, eb) = (&entries[a], &entries[b]);
            eb.last_message.at.cmp(&ea.last_message.at).then_with(|| a.cmp(b))
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    pub(crate) fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    pub(crate) fn conversation(id: &str, unread: u32, time: DateTime<Utc>) -> Conversation {
        Conversation {
            id: id.to_string(),
            counterpart_name: format!("User {id}"),
            counterpart_email: format!("{id}@mail.test"),
            avatar_ref: None,
            last_message: Preview {
                text: "earlier".to_string(),
                at: time,
            },
            unread_count: unread,
            status: ConversationStatus::Active,
        }
    }

    pub(crate) fn message(id: &str, conversation_id: &str, body: &str, time: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "customer".to_string(),
            sender_display_name: "Customer".to_string(),
            body: body.to_string(),
            sent_at: time,
            is_own: false,
            provisional: false,
        }
    }

    fn ids(dir: &ChatDirectory) -> Vec<&str> {
        dir.sorted().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn snapshot_sorts_newest_first_with_id_ties() {
        let mut dir = ChatDirectory::new();
        dir.load_snapshot(vec![
            conversation("x", 2, at(10, 0)),
            conversation("y", 0, at(10, 5)),
            conversation("b", 0, at(9, 0)),
            conversation("a", 0, at(9, 0)),
        ]);
        assert_eq!(ids(&dir), ["y", "x", "a", "b"]);
    }

    #[test]
    fn snapshot_merge_lets_rest_unread_win() {
        let mut dir = ChatDirectory::new();
        dir.load_snapshot(vec![conversation("x", 1, at(10, 0))]);
        dir.apply_incoming_message("x", &message("m1", "x", "ping", at(10, 1)), false);
        dir.apply_incoming_message("x", &message("m2", "x", "ping", at(10, 2)), false);
        assert_eq!(dir.get("x").unwrap().unread_count, 3);

        dir.load_snapshot(vec![conversation("x", 1, at(10, 0)), conversation("z", 0, at(8, 0))]);
        let x = dir.get("x").unwrap();
        assert_eq!(x.unread_count, 1);
        // The locally newer preview survives a lagging snapshot.
        assert_eq!(x.last_message.at, at(10, 2));
        assert_eq!(ids(&dir), ["x", "z"]);
    }

    #[test]
    fn incoming_message_increments_only_when_unfocused() {
        let mut dir = ChatDirectory::new();
        dir.load_snapshot(vec![conversation("x", 0, at(10, 0))]);
        let msg = message("m1", "x", "hi", at(10, 1));
        assert_eq!(dir.apply_incoming_message("x", &msg, false), IncomingOutcome::Applied);
        assert_eq!(dir.get("x").unwrap().unread_count, 1);
        dir.apply_incoming_message("x", &msg, true);
        assert_eq!(dir.get("x").unwrap().unread_count, 1);
        assert_eq!(dir.get("x").unwrap().last_message.text, "hi");
    }

    #[test]
    fn older_message_keeps_newer_preview() {
        let mut dir = ChatDirectory::new();
        dir.load_snapshot(vec![conversation("x", 0, at(10, 0))]);
        dir.apply_incoming_message("x", &message("m0", "x", "late", at(9, 0)), false);
        let x = dir.get("x").unwrap();
        assert_eq!(x.last_message.text, "earlier");
        assert_eq!(x.unread_count, 1);
    }

    #[test]
    fn unknown_conversation_is_not_fabricated() {
        let mut dir = ChatDirectory::new();
        let msg = message("m1", "ghost", "hi", at(10, 1));
        assert_eq!(
            dir.apply_incoming_message("ghost", &msg, false),
            IncomingOutcome::UnknownConversation
        );
        assert!(dir.is_empty());
        assert!(!dir.apply_unread_reset("ghost"));
        assert_eq!(dir.select("ghost"), Err(SyncError::NotFound("ghost".into())));
    }

    #[test]
    fn unread_reset_is_idempotent() {
        let mut dir = ChatDirectory::new();
        dir.load_snapshot(vec![conversation("x", 4, at(10, 0)), conversation("y", 2, at(9, 0))]);
        assert_eq!(dir.total_unread(), 6);
        assert!(dir.apply_unread_reset("x"));
        assert!(dir.apply_unread_reset("x"));
        assert_eq!(dir.get("x").unwrap().unread_count, 0);
        assert_eq!(dir.unread_conversations(), 1);
        assert_eq!(dir.total_unread(), 2);
    }
}
