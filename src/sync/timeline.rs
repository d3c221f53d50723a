//! Message Timeline: per-conversation message logs kept in `sent_at` order.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::api::models::{Message, Operator};

/// How far a server echo may drift from the provisional copy and still replace it.
pub const DEFAULT_ECHO_TOLERANCE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// The message replaced the provisional entry with this temporary id.
    Reconciled(String),
    /// A confirmed message with the same id is already present.
    Duplicate,
    /// The conversation has no loaded log; nothing was stored.
    NotLoaded,
}

#[derive(Debug, Clone)]
pub struct MessageTimeline {
    logs: HashMap<String, Vec<Message>>,
    pinned: HashMap<String, Vec<Message>>,
    /// temporary id -> conversation id
    provisional: HashMap<String, String>,
    next_temp: u64,
    tolerance: Duration,
}

impl Default for MessageTimeline {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_TOLERANCE)
    }
}

impl MessageTimeline {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            logs: HashMap::new(),
            pinned: HashMap::new(),
            provisional: HashMap::new(),
            next_temp: 0,
            tolerance,
        }
    }

    /// Replaces the whole log of a conversation with a REST history page.
    pub fn load_history(&mut self, conversation_id: &str, mut messages: Vec<Message>) {
        // Stable: equal timestamps keep the order the server returned them in.
        messages.sort_by_key(|m| m.sent_at);
        self.provisional.retain(|_, conv| conv != conversation_id);
        self.logs.insert(conversation_id.to_string(), messages);
    }

    pub fn set_pinned(&mut self, conversation_id: &str, mut messages: Vec<Message>) {
        messages.sort_by_key(|m| m.sent_at);
        self.pinned.insert(conversation_id.to_string(), messages);
    }

    pub fn append_incoming(&mut self, message: Message) -> AppendOutcome {
        let log = self.logs.entry(message.conversation_id.clone()).or_default();
        if log.iter().any(|m| !m.provisional && m.id == message.id) {
            return AppendOutcome::Duplicate;
        }

        let mut outcome = AppendOutcome::Inserted;
        if message.is_own {
            let tolerance = self.tolerance;
            let matched = log.iter().position(|m| {
                m.provisional
                    && m.is_own
                    && m.body == message.body
                    && within(m.sent_at, message.sent_at, tolerance)
            });
            if let Some(idx) = matched {
                let stale = log.remove(idx);
                self.provisional.remove(&stale.id);
                outcome = AppendOutcome::Reconciled(stale.id);
            }
        }

        insert_sorted(log, message);
        outcome
    }

    /// Replaces the provisional entry `temp_id` with the server's copy of the
    /// same send. Unlike `append_incoming` this does not depend on clocks agreeing.
    pub fn confirm_provisional(&mut self, temp_id: &str, message: Message) -> AppendOutcome {
        let Some(conversation_id) = self.provisional.remove(temp_id) else {
            // Already reconciled by an echo, or dropped with its log.
            if !self.logs.contains_key(&message.conversation_id) {
                return AppendOutcome::NotLoaded;
            }
            return self.append_incoming(message);
        };
        let log = self.logs.entry(conversation_id).or_default();
        log.retain(|m| !(m.provisional && m.id == temp_id));
        if !log.iter().any(|m| !m.provisional && m.id == message.id) {
            insert_sorted(log, message);
        }
        AppendOutcome::Reconciled(temp_id.to_string())
    }

    /// Drops everything held for a conversation. Its history is reloaded on the next selection.
    pub fn forget(&mut self, conversation_id: &str) {
        self.logs.remove(conversation_id);
        self.pinned.remove(conversation_id);
        self.provisional.retain(|_, conv| conv != conversation_id);
    }

    pub fn is_loaded(&self, conversation_id: &str) -> bool {
        self.logs.contains_key(conversation_id)
    }

    /// Shows an operator message immediately, before the server has it.
    pub fn append_provisional(&mut self, conversation_id: &str, body: &str, sender: &Operator) -> String {
        self.append_provisional_at(conversation_id, body, sender, Utc::now())
    }

    pub fn append_provisional_at(
        &mut self,
        conversation_id: &str,
        body: &str,
        sender: &Operator,
        at: DateTime<Utc>,
    ) -> String {
        self.next_temp += 1;
        let temp_id = format!("tmp-{}", self.next_temp);
        let message = Message {
            id: temp_id.clone(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender.id.clone(),
            sender_display_name: sender.display_name.clone(),
            body: body.to_string(),
            sent_at: at,
            is_own: true,
            provisional: true,
        };
        insert_sorted(self.logs.entry(conversation_id.to_string()).or_default(), message);
        self.provisional.insert(temp_id.clone(), conversation_id.to_string());
        temp_id
    }

    /// Rolls back a provisional entry. Returns false if it was already
    /// reconciled or dropped by a history reload.
    pub fn remove_provisional(&mut self, temp_id: &str) -> bool {
        let Some(conversation_id) = self.provisional.remove(temp_id) else {
            return false;
        };
        match self.logs.get_mut(&conversation_id) {
            Some(log) => {
                let before = log.len();
                log.retain(|m| !(m.provisional && m.id == temp_id));
                log.len() != before
            }
            None => false,
        }
    }

    pub fn is_pending(&self, temp_id: &str) -> bool {
        self.provisional.contains_key(temp_id)
    }

    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.logs.get(conversation_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pinned(&self, conversation_id: &str) -> &[Message] {
        self.pinned.get(conversation_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn within(a: DateTime<Utc>, b: DateTime<Utc>, tolerance: Duration) -> bool {
    let diff = if a > b { a - b } else { b - a };
    diff.to_std().map(|d| d <= tolerance).unwrap_or(false)
}

/// Inserts after every entry with `sent_at <= message.sent_at`, so ties keep arrival order.
fn insert_sorted(log: &mut Vec<Message>, message: Message) {
    let idx = log.partition_point(|m| m.sent_at <= message.sent_at);
    log.insert(idx, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::directory::tests::{at, message};
    use chrono::Duration as TimeDelta;

    fn operator() -> Operator {
        Operator {
            id: "op".into(),
            display_name: "Support".into(),
        }
    }

    fn own(id: &str, conv: &str, body: &str, time: DateTime<Utc>) -> Message {
        Message {
            sender_id: "op".into(),
            is_own: true,
            ..message(id, conv, body, time)
        }
    }

    fn ids(timeline: &MessageTimeline, conv: &str) -> Vec<String> {
        timeline.messages(conv).iter().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn history_is_sorted_and_replaces() {
        let mut tl = MessageTimeline::default();
        tl.load_history("c", vec![message("b", "c", "2", at(10, 2)), message("a", "c", "1", at(10, 1))]);
        assert_eq!(ids(&tl, "c"), ["a", "b"]);
        tl.load_history("c", vec![message("z", "c", "9", at(11, 0))]);
        assert_eq!(ids(&tl, "c"), ["z"]);
    }

    #[test]
    fn out_of_order_delivery_keeps_order() {
        let mut tl = MessageTimeline::default();
        tl.load_history("c", vec![message("a", "c", "1", at(10, 0)), message("c", "c", "3", at(10, 10))]);
        assert_eq!(tl.append_incoming(message("b", "c", "2", at(10, 5))), AppendOutcome::Inserted);
        tl.append_incoming(message("d", "c", "4", at(10, 10)));
        assert_eq!(ids(&tl, "c"), ["a", "b", "c", "d"]);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut tl = MessageTimeline::default();
        for id in ["first", "second", "third"] {
            tl.append_incoming(message(id, "c", id, at(10, 0)));
        }
        assert_eq!(ids(&tl, "c"), ["first", "second", "third"]);
    }

    #[test]
    fn echo_replaces_provisional() {
        let mut tl = MessageTimeline::default();
        let sent = at(12, 0);
        let temp = tl.append_provisional_at("z", "hello", &operator(), sent);
        assert!(tl.messages("z")[0].provisional);
        assert!(tl.messages("z")[0].is_own);

        let echo = own("m123", "z", "hello", sent + TimeDelta::seconds(2));
        assert_eq!(tl.append_incoming(echo), AppendOutcome::Reconciled(temp.clone()));
        assert_eq!(ids(&tl, "z"), ["m123"]);
        assert!(!tl.is_pending(&temp));

        // A second echo of the same server message is ignored.
        let again = own("m123", "z", "hello", sent + TimeDelta::seconds(2));
        assert_eq!(tl.append_incoming(again), AppendOutcome::Duplicate);
        assert_eq!(tl.messages("z").len(), 1);
    }

    #[test]
    fn echo_outside_window_or_foreign_does_not_reconcile() {
        let mut tl = MessageTimeline::new(Duration::from_secs(5));
        let sent = at(12, 0);
        tl.append_provisional_at("z", "hello", &operator(), sent);

        let late = own("m1", "z", "hello", sent + TimeDelta::seconds(30));
        assert_eq!(tl.append_incoming(late), AppendOutcome::Inserted);
        let foreign = message("m2", "z", "hello", sent);
        assert_eq!(tl.append_incoming(foreign), AppendOutcome::Inserted);
        assert_eq!(tl.messages("z").len(), 3);
    }

    #[test]
    fn only_first_matching_provisional_is_replaced() {
        let mut tl = MessageTimeline::default();
        let sent = at(12, 0);
        let first = tl.append_provisional_at("z", "ok", &operator(), sent);
        let second = tl.append_provisional_at("z", "ok", &operator(), sent + TimeDelta::seconds(1));
        assert_eq!(
            tl.append_incoming(own("m1", "z", "ok", sent + TimeDelta::seconds(1))),
            AppendOutcome::Reconciled(first)
        );
        assert!(tl.is_pending(&second));
        assert_eq!(tl.messages("z").len(), 2);
    }

    #[test]
    fn provisional_round_trip_restores_state() {
        let mut tl = MessageTimeline::default();
        tl.load_history("z", vec![message("a", "z", "1", at(10, 0))]);
        let before = tl.messages("z").to_vec();
        let temp = tl.append_provisional("z", "oops", &operator());
        assert_eq!(tl.messages("z").len(), 2);
        assert!(tl.remove_provisional(&temp));
        assert_eq!(tl.messages("z"), before.as_slice());
        assert!(!tl.remove_provisional(&temp));
    }

    #[test]
    fn confirmation_by_temp_id_ignores_clock_skew() {
        let mut tl = MessageTimeline::default();
        let sent = at(12, 0);
        let temp = tl.append_provisional_at("z", "hello", &operator(), sent);
        let skewed = own("m123", "z", "hello", sent + TimeDelta::seconds(30));
        assert_eq!(tl.confirm_provisional(&temp, skewed.clone()), AppendOutcome::Reconciled(temp.clone()));
        assert_eq!(ids(&tl, "z"), ["m123"]);
        assert!(!tl.is_pending(&temp));

        // The push echo of the same message arrives afterwards.
        assert_eq!(tl.append_incoming(skewed), AppendOutcome::Duplicate);
        assert_eq!(ids(&tl, "z"), ["m123"]);
    }

    #[test]
    fn confirmation_after_skewed_echo_leaves_one_copy() {
        let mut tl = MessageTimeline::default();
        let sent = at(12, 0);
        let temp = tl.append_provisional_at("z", "hello", &operator(), sent);
        let skewed = own("m123", "z", "hello", sent + TimeDelta::seconds(30));
        assert_eq!(tl.append_incoming(skewed.clone()), AppendOutcome::Inserted);
        assert_eq!(tl.messages("z").len(), 2);

        assert_eq!(tl.confirm_provisional(&temp, skewed), AppendOutcome::Reconciled(temp));
        assert_eq!(ids(&tl, "z"), ["m123"]);
    }

    #[test]
    fn forgotten_conversation_is_not_refilled() {
        let mut tl = MessageTimeline::default();
        tl.load_history("z", vec![message("a", "z", "1", at(10, 0))]);
        tl.set_pinned("z", vec![message("a", "z", "1", at(10, 0))]);
        let temp = tl.append_provisional("z", "hello", &operator());

        tl.forget("z");
        assert!(!tl.is_loaded("z"));
        assert!(tl.pinned("z").is_empty());
        assert!(!tl.is_pending(&temp));
        assert_eq!(
            tl.confirm_provisional(&temp, own("m1", "z", "hello", at(10, 1))),
            AppendOutcome::NotLoaded
        );
        assert!(!tl.is_loaded("z"));
    }

    #[test]
    fn history_reload_drops_provisional_index() {
        let mut tl = MessageTimeline::default();
        let temp = tl.append_provisional("z", "hello", &operator());
        tl.load_history("z", Vec::new());
        assert!(!tl.is_pending(&temp));
        assert!(!tl.remove_provisional(&temp));
    }
}
