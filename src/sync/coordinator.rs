//! Sync Coordinator: the single owner of the directory and timelines.
//!
//! Every input (operator action, REST completion, push event, connection
//! change) arrives as a [`SyncEvent`] and is applied in order. Work that has
//! to leave the process is returned as [`Effect`]s; their results come back as
//! events tagged with the request id they were issued under, so a response
//! that is no longer the latest one is dropped instead of applied.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info, warn};

use crate::api::events::PushEvent;
use crate::api::models::{Attachment, ChatsPage, HistoryPage, MessageRecord, Operator};
use crate::error::{ApiError, SyncError};
use crate::sync::connection::ConnectionStatus;
use crate::sync::directory::{ChatDirectory, IncomingOutcome, ServerTotals};
use crate::sync::projection::{Projection, project};
use crate::sync::timeline::MessageTimeline;

#[derive(Debug)]
pub enum SyncEvent {
    Start,
    Select(String),
    Send {
        body: String,
        attachments: Vec<Attachment>,
    },
    Refresh,
    LoadMore,
    DismissErrors,
    DirectoryLoaded {
        request: u64,
        pages: u32,
        result: Result<ChatsPage, ApiError>,
    },
    HistoryLoaded {
        request: u64,
        conversation_id: String,
        result: Result<HistoryPage, ApiError>,
    },
    SendFinished {
        conversation_id: String,
        temp_id: String,
        result: Result<MessageRecord, ApiError>,
    },
    Push(PushEvent),
    Connection(ConnectionStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// `pages` is how many page-size pages the response will cover.
    FetchDirectory { request: u64, page: u32, limit: u32, pages: u32 },
    FetchHistory { request: u64, conversation_id: String },
    SubmitSend {
        conversation_id: String,
        temp_id: String,
        body: String,
        attachments: Vec<Attachment>,
    },
    /// Tell other observers on the push channel; not the sender's source of truth.
    NotifySent { conversation_id: String, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    NoSelection,
    Loading { conversation_id: String, request: u64 },
    Ready { conversation_id: String },
    /// History load failed; selecting the conversation again retries.
    Failed { conversation_id: String },
}

impl Selection {
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::NoSelection => None,
            Self::Loading { conversation_id, .. }
            | Self::Ready { conversation_id }
            | Self::Failed { conversation_id } => Some(conversation_id),
        }
    }

    pub fn ready_id(&self) -> Option<&str> {
        match self {
            Self::Ready { conversation_id } => Some(conversation_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorScope {
    Directory,
    History(String),
    Send {
        conversation_id: String,
        temp_id: String,
        body: String,
    },
    Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewError {
    pub scope: ErrorScope,
    pub message: String,
}

/// Everything the rendering layer needs after an event has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxView {
    pub projection: Projection,
    pub selection: Selection,
    pub loading_directory: bool,
    pub has_more: bool,
    pub errors: Vec<ViewError>,
    pub connection: ConnectionStatus,
    pub degraded: bool,
    pub server_totals: ServerTotals,
}

pub struct SyncCoordinator {
    operator: Operator,
    directory: ChatDirectory,
    timeline: MessageTimeline,
    selection: Selection,
    /// temporary id -> body of every send still awaiting its REST result
    sending: HashMap<String, String>,
    page_size: u32,
    pages_loaded: u32,
    total_available: u32,
    next_request: u64,
    directory_request: Option<u64>,
    errors: Vec<ViewError>,
    connection: ConnectionStatus,
    seen_connected: bool,
}

impl SyncCoordinator {
    pub fn new(operator: Operator, page_size: u32, echo_tolerance: Duration) -> Self {
        Self {
            operator,
            directory: ChatDirectory::new(),
            timeline: MessageTimeline::new(echo_tolerance),
            selection: Selection::NoSelection,
            sending: HashMap::new(),
            page_size: page_size.max(1),
            pages_loaded: 0,
            total_available: 0,
            next_request: 0,
            directory_request: None,
            errors: Vec::new(),
            connection: ConnectionStatus::Disconnected,
            seen_connected: false,
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn directory(&self) -> &ChatDirectory {
        &self.directory
    }

    pub fn timeline(&self) -> &MessageTimeline {
        &self.timeline
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn errors(&self) -> &[ViewError] {
        &self.errors
    }

    pub fn handle(&mut self, event: SyncEvent) -> Vec<Effect> {
        match event {
            SyncEvent::Start | SyncEvent::Refresh => self.refresh(),
            SyncEvent::LoadMore => self.load_more(),
            SyncEvent::Select(id) => self.select(&id).unwrap_or_else(|e| self.reject(e)),
            SyncEvent::Send { body, attachments } => {
                self.send(&body, attachments).unwrap_or_else(|e| self.reject(e))
            }
            SyncEvent::DismissErrors => {
                self.errors.clear();
                Vec::new()
            }
            SyncEvent::DirectoryLoaded { request, pages, result } => {
                self.on_directory_loaded(request, pages, result);
                Vec::new()
            }
            SyncEvent::HistoryLoaded {
                request,
                conversation_id,
                result,
            } => {
                self.on_history_loaded(request, &conversation_id, result);
                Vec::new()
            }
            SyncEvent::SendFinished {
                conversation_id,
                temp_id,
                result,
            } => self.on_send_finished(&conversation_id, &temp_id, result),
            SyncEvent::Push(push) => self.on_push(push),
            SyncEvent::Connection(status) => self.on_connection(status),
        }
    }

    /// Refetches page 1 covering every page loaded so far.
    pub fn refresh(&mut self) -> Vec<Effect> {
        let pages = self.pages_loaded.max(1);
        vec![self.fetch_directory(1, self.page_size.saturating_mul(pages), pages)]
    }

    pub fn load_more(&mut self) -> Vec<Effect> {
        if !self.has_more() {
            return Vec::new();
        }
        let page = self.pages_loaded + 1;
        vec![self.fetch_directory(page, self.page_size, page)]
    }

    pub fn has_more(&self) -> bool {
        self.pages_loaded > 0 && (self.directory.len() as u64) < u64::from(self.total_available)
    }

    pub fn select(&mut self, conversation_id: &str) -> Result<Vec<Effect>, SyncError> {
        self.directory.select(conversation_id)?;
        match &self.selection {
            Selection::Loading { conversation_id: c, .. } | Selection::Ready { conversation_id: c }
                if c == conversation_id =>
            {
                return Ok(Vec::new());
            }
            _ => {}
        }
        if let Some(previous) = self.selection.conversation_id().filter(|c| *c != conversation_id) {
            // Reselecting reloads history anyway, so only the focused log is kept.
            self.timeline.forget(previous);
        }
        self.errors
            .retain(|e| !matches!(&e.scope, ErrorScope::History(c) if c == conversation_id));
        Ok(vec![self.load_history(conversation_id)])
    }

    pub fn send(&mut self, body: &str, attachments: Vec<Attachment>) -> Result<Vec<Effect>, SyncError> {
        let body = body.trim();
        if body.is_empty() && attachments.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let conversation_id = self
            .selection
            .ready_id()
            .ok_or(SyncError::NoActiveConversation)?
            .to_string();
        let temp_id = self.timeline.append_provisional(&conversation_id, body, &self.operator);
        self.sending.insert(temp_id.clone(), body.to_string());
        Ok(vec![Effect::SubmitSend {
            conversation_id,
            temp_id,
            body: body.to_string(),
            attachments,
        }])
    }

    pub fn view(&self) -> InboxView {
        let active = self.selection.conversation_id();
        let (transcript, pinned) = match active {
            Some(id) => (self.timeline.messages(id), self.timeline.pinned(id)),
            None => (&[][..], &[][..]),
        };
        InboxView {
            projection: project(&self.directory, active, transcript, pinned),
            selection: self.selection.clone(),
            loading_directory: self.directory_request.is_some(),
            has_more: self.has_more(),
            errors: self.errors.clone(),
            connection: self.connection,
            degraded: self.connection.is_degraded(),
            server_totals: self.directory.server_totals(),
        }
    }

    fn next_request(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }

    fn fetch_directory(&mut self, page: u32, limit: u32, pages: u32) -> Effect {
        let request = self.next_request();
        self.directory_request = Some(request);
        Effect::FetchDirectory {
            request,
            page,
            limit,
            pages,
        }
    }

    fn load_history(&mut self, conversation_id: &str) -> Effect {
        let request = self.next_request();
        self.selection = Selection::Loading {
            conversation_id: conversation_id.to_string(),
            request,
        };
        Effect::FetchHistory {
            request,
            conversation_id: conversation_id.to_string(),
        }
    }

    fn reject(&mut self, error: SyncError) -> Vec<Effect> {
        debug!("Rejected operator action: {error}");
        self.errors.push(ViewError {
            scope: ErrorScope::Action,
            message: error.to_string(),
        });
        Vec::new()
    }

    fn on_directory_loaded(&mut self, request: u64, pages: u32, result: Result<ChatsPage, ApiError>) {
        if self.directory_request != Some(request) {
            debug!("Discarding stale directory response {request}");
            return;
        }
        self.directory_request = None;
        self.errors.retain(|e| e.scope != ErrorScope::Directory);

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                warn!("Directory load failed: {e}");
                self.errors.push(ViewError {
                    scope: ErrorScope::Directory,
                    message: e.to_string(),
                });
                return;
            }
        };

        let conversations = page
            .chats
            .iter()
            .map(|chat| chat.to_conversation(&self.operator.id))
            .collect();
        self.directory.load_snapshot(conversations);
        self.directory.set_server_totals(ServerTotals {
            unread_chats: page.unread_chats_count,
            unread_messages: page.total_unread_messages,
        });
        self.pages_loaded = self.pages_loaded.max(pages);
        self.total_available = page.meta.total;

        // The operator is looking at it, so nothing there is unread.
        if let Some(active) = self.selection.ready_id() {
            self.directory.apply_unread_reset(active);
        }
    }

    fn on_history_loaded(&mut self, request: u64, conversation_id: &str, result: Result<HistoryPage, ApiError>) {
        let current = matches!(
            &self.selection,
            Selection::Loading { conversation_id: c, request: r } if *r == request && c == conversation_id
        );
        if !current {
            debug!("Discarding stale history for {conversation_id} (request {request})");
            return;
        }

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                warn!("History load for {conversation_id} failed: {e}");
                self.errors.push(ViewError {
                    scope: ErrorScope::History(conversation_id.to_string()),
                    message: e.to_string(),
                });
                self.selection = Selection::Failed {
                    conversation_id: conversation_id.to_string(),
                };
                return;
            }
        };

        let operator_id = self.operator.id.as_str();
        let messages: Vec<_> = page
            .messages
            .iter()
            .map(|m| m.to_message(conversation_id, operator_id))
            .collect();
        let pinned = page
            .pinned_messages
            .iter()
            .map(|m| m.to_message(conversation_id, operator_id))
            .collect();
        self.timeline.load_history(conversation_id, messages);
        self.timeline.set_pinned(conversation_id, pinned);

        if let Some(latest) = self.timeline.messages(conversation_id).last().cloned() {
            self.directory.apply_incoming_message(conversation_id, &latest, true);
        }
        self.directory.apply_unread_reset(conversation_id);
        self.selection = Selection::Ready {
            conversation_id: conversation_id.to_string(),
        };
    }

    fn on_send_finished(
        &mut self,
        conversation_id: &str,
        temp_id: &str,
        result: Result<MessageRecord, ApiError>,
    ) -> Vec<Effect> {
        let body = self.sending.remove(temp_id).unwrap_or_default();
        match result {
            Ok(record) => {
                let message = record.to_message(conversation_id, &self.operator.id);
                let text = message.body.clone();
                self.timeline.confirm_provisional(temp_id, message.clone());
                self.directory.apply_incoming_message(conversation_id, &message, true);
                vec![Effect::NotifySent {
                    conversation_id: conversation_id.to_string(),
                    text,
                }]
            }
            Err(e) => {
                warn!("Send to {conversation_id} failed: {e}");
                self.timeline.remove_provisional(temp_id);
                self.errors.push(ViewError {
                    scope: ErrorScope::Send {
                        conversation_id: conversation_id.to_string(),
                        temp_id: temp_id.to_string(),
                        body,
                    },
                    message: e.to_string(),
                });
                Vec::new()
            }
        }
    }

    fn on_push(&mut self, event: PushEvent) -> Vec<Effect> {
        match event {
            PushEvent::NewMessage {
                conversation_id,
                message,
            } => {
                let message = message.to_message(&conversation_id, &self.operator.id);
                let focused = self.selection.ready_id() == Some(conversation_id.as_str());
                if focused {
                    self.timeline.append_incoming(message.clone());
                }
                match self.directory.apply_incoming_message(&conversation_id, &message, focused) {
                    IncomingOutcome::Applied => {
                        if focused {
                            self.directory.apply_unread_reset(&conversation_id);
                        }
                        Vec::new()
                    }
                    IncomingOutcome::UnknownConversation => {
                        info!("Message for unknown conversation {conversation_id}, refetching directory");
                        self.refresh()
                    }
                }
            }
            PushEvent::UnreadCount {
                conversation_id,
                unread_count,
            } => {
                // Local view wins while focused; elsewhere the server is authoritative.
                if self.selection.ready_id() == Some(conversation_id.as_str()) {
                    self.directory.apply_unread_reset(&conversation_id);
                    Vec::new()
                } else if self.directory.apply_unread_count(&conversation_id, unread_count) {
                    Vec::new()
                } else {
                    info!("Unread update for unknown conversation {conversation_id}, refetching directory");
                    self.refresh()
                }
            }
            PushEvent::NewConversation => self.refresh(),
        }
    }

    /// Events missed while the channel was down are never replayed, so
    /// coming back online refetches what the view depends on.
    fn on_connection(&mut self, status: ConnectionStatus) -> Vec<Effect> {
        self.connection = status;
        if status != ConnectionStatus::Connected {
            return Vec::new();
        }
        if !self.seen_connected {
            self.seen_connected = true;
            return Vec::new();
        }
        info!("Push channel back online, resynchronizing");
        let mut effects = self.refresh();
        if let Some(active) = self.selection.conversation_id().map(str::to_string) {
            effects.push(self.load_history(&active));
        }
        effects
    }
}
