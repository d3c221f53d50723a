//! Async driver around [`SyncCoordinator`]: executes its effects against the
//! REST backend and the push channel and publishes the resulting view.

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::api::client::ChatBackend;
use crate::api::events::{PushEvent, SEND_MESSAGE, Topics};
use crate::api::models::Attachment;
use crate::sync::connection::{ConnectionHandle, ConnectionManager};
use crate::sync::coordinator::{Effect, InboxView, SyncCoordinator, SyncEvent};

/// Operator-facing side of a running service. Cheap to clone.
#[derive(Clone)]
pub struct InboxHandle {
    events: mpsc::UnboundedSender<SyncEvent>,
    view: watch::Receiver<InboxView>,
    shutdown: CancellationToken,
}

impl InboxHandle {
    pub fn select_conversation(&self, conversation_id: impl Into<String>) -> bool {
        self.dispatch(SyncEvent::Select(conversation_id.into()))
    }

    pub fn send(&self, body: impl Into<String>, attachments: Vec<Attachment>) -> bool {
        self.dispatch(SyncEvent::Send {
            body: body.into(),
            attachments,
        })
    }

    pub fn refresh(&self) -> bool {
        self.dispatch(SyncEvent::Refresh)
    }

    pub fn load_more(&self) -> bool {
        self.dispatch(SyncEvent::LoadMore)
    }

    pub fn dismiss_errors(&self) -> bool {
        self.dispatch(SyncEvent::DismissErrors)
    }

    /// Latest published view.
    pub fn view(&self) -> InboxView {
        self.view.borrow().clone()
    }

    /// Receiver that wakes whenever the view changes.
    pub fn watch(&self) -> watch::Receiver<InboxView> {
        self.view.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn dispatch(&self, event: SyncEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

pub struct SyncService<B: ChatBackend> {
    coordinator: SyncCoordinator,
    backend: Arc<B>,
    connection: Option<ConnectionManager>,
}

impl<B: ChatBackend> SyncService<B> {
    pub fn new(coordinator: SyncCoordinator, backend: Arc<B>) -> Self {
        Self {
            coordinator,
            backend,
            connection: None,
        }
    }

    /// Routes the operator's push topics into the service once it runs.
    pub fn with_connection(mut self, connection: ConnectionManager) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Spawns the event loop and kicks off the initial directory load.
    /// Must be called inside a tokio runtime.
    pub fn spawn(self) -> InboxHandle {
        let (events, rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(self.coordinator.view());
        let shutdown = CancellationToken::new();

        let push = self
            .connection
            .as_ref()
            .map(|connection| attach(connection, self.coordinator.operator().id.as_str(), &events, &shutdown));

        let _ = events.send(SyncEvent::Start);
        let worker = Worker {
            coordinator: self.coordinator,
            backend: self.backend,
            connection: self.connection,
            push,
            events: events.clone(),
            view: view_tx,
        };
        tokio::spawn(worker.run(rx, shutdown.clone()));

        InboxHandle {
            events,
            view,
            shutdown,
        }
    }
}

fn attach(
    connection: &ConnectionManager,
    operator_id: &str,
    events: &mpsc::UnboundedSender<SyncEvent>,
    shutdown: &CancellationToken,
) -> ConnectionHandle {
    let topics = Topics::for_operator(operator_id);

    let tx = events.clone();
    connection.subscribe(topics.new_message.clone(), move |data| {
        forward(&tx, "newMessage", PushEvent::new_message(data))
    });
    let tx = events.clone();
    connection.subscribe(topics.unread_count.clone(), move |data| {
        forward(&tx, "unreadCountUpdate", PushEvent::unread_count(data))
    });
    let tx = events.clone();
    connection.subscribe(topics.new_conversation.clone(), move |_: Value| {
        let _ = tx.send(SyncEvent::Push(PushEvent::NewConversation));
    });

    let mut status = connection.status();
    let tx = events.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        let initial = *status.borrow_and_update();
        let _ = tx.send(SyncEvent::Connection(initial));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *status.borrow_and_update();
                    if tx.send(SyncEvent::Connection(current)).is_err() {
                        break;
                    }
                }
            }
        }
    });

    connection.connect()
}

fn forward(tx: &mpsc::UnboundedSender<SyncEvent>, topic: &str, decoded: Result<PushEvent, serde_json::Error>) {
    match decoded {
        Ok(event) => {
            let _ = tx.send(SyncEvent::Push(event));
        }
        Err(e) => warn!("Ignoring malformed {topic} payload: {e}"),
    }
}

struct Worker<B: ChatBackend> {
    coordinator: SyncCoordinator,
    backend: Arc<B>,
    connection: Option<ConnectionManager>,
    push: Option<ConnectionHandle>,
    events: mpsc::UnboundedSender<SyncEvent>,
    view: watch::Sender<InboxView>,
}

impl<B: ChatBackend> Worker<B> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SyncEvent>, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            for effect in self.coordinator.handle(event) {
                self.execute(effect);
            }
            let next = self.coordinator.view();
            self.view.send_if_modified(|current| {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        }

        if let Some(connection) = self.connection.take() {
            connection.disconnect();
        }
        info!("Inbox sync stopped");
    }

    fn execute(&self, effect: Effect) {
        match effect {
            Effect::FetchDirectory {
                request,
                page,
                limit,
                pages,
            } => {
                let backend = self.backend.clone();
                let tx = self.events.clone();
                tokio::spawn(async move {
                    let result = backend.fetch_conversations(page, limit).await;
                    let _ = tx.send(SyncEvent::DirectoryLoaded { request, pages, result });
                });
            }
            Effect::FetchHistory {
                request,
                conversation_id,
            } => {
                let backend = self.backend.clone();
                let tx = self.events.clone();
                tokio::spawn(async move {
                    let result = backend.fetch_messages(&conversation_id).await;
                    let _ = tx.send(SyncEvent::HistoryLoaded {
                        request,
                        conversation_id,
                        result,
                    });
                });
            }
            Effect::SubmitSend {
                conversation_id,
                temp_id,
                body,
                attachments,
            } => {
                let backend = self.backend.clone();
                let tx = self.events.clone();
                tokio::spawn(async move {
                    let result = backend.send_message(&conversation_id, &body, &attachments).await;
                    let _ = tx.send(SyncEvent::SendFinished {
                        conversation_id,
                        temp_id,
                        result,
                    });
                });
            }
            Effect::NotifySent { conversation_id, text } => match self.push.as_ref() {
                Some(push) => {
                    if !push.emit(SEND_MESSAGE, json!({ "chatId": conversation_id, "text": text })) {
                        debug!("Push session gone, {SEND_MESSAGE} for {conversation_id} not emitted");
                    }
                }
                None => debug!("No push channel, skipping {SEND_MESSAGE}"),
            },
        }
    }
}
