//! Connection Manager: owns the single push channel session, its reconnect
//! policy and the topic handlers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::api::events::PushFrame;
use crate::api::socket::{PushStream, PushTransport};

static GLOBAL: OnceCell<ConnectionManager> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Retries exhausted. A new `connect()` starts over.
    Failed,
}

impl ConnectionStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Reconnecting { .. } | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), doubling up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

enum Outbound {
    Frame(PushFrame),
    Subscribe(String),
    Unsubscribe(String),
}

/// Shared reference to the live session. Every `connect()` while a session
/// exists hands out a handle to the same one.
#[derive(Clone)]
pub struct ConnectionHandle {
    session: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn session_id(&self) -> u64 {
        self.session
    }

    /// Fire-and-forget. Queued while the channel is reconnecting.
    pub fn emit(&self, event: impl Into<String>, data: Value) -> bool {
        self.outbound
            .send(Outbound::Frame(PushFrame::new(event, data)))
            .is_ok()
    }
}

struct Session {
    handle: ConnectionHandle,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Shared {
    session: Option<Session>,
    topics: HashMap<String, mpsc::UnboundedSender<Value>>,
    next_session: u64,
}

struct Inner {
    transport: Arc<dyn PushTransport>,
    policy: ReconnectPolicy,
    shared: Mutex<Shared>,
    status: watch::Sender<ConnectionStatus>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes `status` only while session `id` is still the live one, so a
    /// cancelled or superseded session never overwrites a newer state.
    fn set_session_status(&self, id: u64, status: ConnectionStatus) -> bool {
        let shared = self.lock();
        let current = shared.session.as_ref().is_some_and(|s| s.handle.session == id);
        if current {
            self.status.send_replace(status);
        }
        current
    }

    fn topic_names(&self) -> Vec<String> {
        self.lock().topics.keys().cloned().collect()
    }

    fn dispatch(&self, frame: PushFrame) {
        let shared = self.lock();
        match shared.topics.get(&frame.event) {
            Some(queue) => {
                let _ = queue.send(frame.data);
            }
            None => debug!("No handler for push event {}", frame.event),
        }
    }

    fn finish_session(&self, id: u64, status: ConnectionStatus) {
        let mut shared = self.lock();
        if shared.session.as_ref().is_some_and(|s| s.handle.session == id) {
            shared.session = None;
            self.status.send_replace(status);
        }
    }
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn PushTransport>, policy: ReconnectPolicy) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                shared: Mutex::new(Shared::default()),
                status,
            }),
        }
    }

    /// Registers the process-wide manager. Fails if one is already installed.
    pub fn install_global(manager: ConnectionManager) -> Result<(), ConnectionManager> {
        GLOBAL.set(manager)
    }

    pub fn global() -> Option<&'static ConnectionManager> {
        GLOBAL.get()
    }

    /// Starts the session if none is running. Must be called inside a tokio runtime.
    pub fn connect(&self) -> ConnectionHandle {
        let mut shared = self.inner.lock();
        if let Some(session) = shared.session.as_ref() {
            return session.handle.clone();
        }
        shared.next_session += 1;
        let id = shared.next_session;
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = ConnectionHandle { session: id, outbound: tx };
        shared.session = Some(Session {
            handle: handle.clone(),
            cancel: cancel.clone(),
        });
        drop(shared);

        tokio::spawn(run_session(self.inner.clone(), id, cancel, rx));
        handle
    }

    /// Tears the session down and forgets every subscription.
    pub fn disconnect(&self) {
        let mut shared = self.inner.lock();
        if let Some(session) = shared.session.take() {
            session.cancel.cancel();
            info!("Push channel disconnected (session {})", session.handle.session);
        }
        shared.topics.clear();
        self.inner.status.send_replace(ConnectionStatus::Disconnected);
    }

    /// `handler` runs once per event on `topic`, strictly in arrival order.
    /// Re-subscribing a topic replaces its handler.
    pub fn subscribe<F>(&self, topic: impl Into<String>, mut handler: F)
    where
        F: FnMut(Value) + Send + 'static,
    {
        let topic = topic.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                handler(data);
            }
        });

        let mut shared = self.inner.lock();
        shared.topics.insert(topic.clone(), tx);
        // Without a session the topic waits in the table and is applied on connect.
        if let Some(session) = shared.session.as_ref() {
            let _ = session.handle.outbound.send(Outbound::Subscribe(topic));
        }
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        let mut shared = self.inner.lock();
        let removed = shared.topics.remove(topic).is_some();
        if removed {
            if let Some(session) = shared.session.as_ref() {
                let _ = session.handle.outbound.send(Outbound::Unsubscribe(topic.to_string()));
            }
        }
        removed
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics = self.inner.topic_names();
        topics.sort();
        topics
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn current_status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }
}

enum PumpEnd {
    Cancelled,
    Lost(String),
}

async fn run_session(
    inner: Arc<Inner>,
    id: u64,
    cancel: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let max_attempts = inner.policy.max_attempts;
    let mut attempt = 0u32;
    if !inner.set_session_status(id, ConnectionStatus::Connecting) {
        return;
    }

    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = inner.transport.open() => opened,
        };

        match opened {
            Ok(mut stream) => {
                attempt = 0;
                // Topics on this stream; queued subscribes for them are not repeated.
                let mut applied = HashSet::new();
                for topic in inner.topic_names() {
                    match stream.subscribe(&topic).await {
                        Ok(()) => {
                            applied.insert(topic);
                        }
                        Err(e) => warn!("Failed to subscribe {topic}: {e}"),
                    }
                }
                if cancel.is_cancelled() || !inner.set_session_status(id, ConnectionStatus::Connected) {
                    stream.close().await;
                    break;
                }
                info!("Push channel connected (session {id})");

                match pump(&inner, stream.as_mut(), &cancel, &mut outbound, &mut applied).await {
                    PumpEnd::Cancelled => {
                        stream.close().await;
                        break;
                    }
                    PumpEnd::Lost(reason) => warn!("Push channel lost: {reason}"),
                }
            }
            Err(e) => warn!("Push channel connect failed: {e}"),
        }

        attempt += 1;
        if attempt > max_attempts {
            error!("Push channel unreachable after {max_attempts} retries");
            inner.finish_session(id, ConnectionStatus::Failed);
            return;
        }
        let delay = inner.policy.delay_for(attempt);
        if !inner.set_session_status(id, ConnectionStatus::Reconnecting { attempt }) {
            break;
        }
        info!("Reconnecting push channel in {delay:?} (attempt {attempt}/{max_attempts})");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    inner.finish_session(id, ConnectionStatus::Disconnected);
}

async fn pump(
    inner: &Inner,
    stream: &mut dyn PushStream,
    cancel: &CancellationToken,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    applied: &mut HashSet<String>,
) -> PumpEnd {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return PumpEnd::Cancelled,
            command = outbound.recv() => {
                let result = match command {
                    Some(Outbound::Frame(frame)) => stream.send_frame(frame).await,
                    Some(Outbound::Subscribe(topic)) => {
                        if applied.contains(&topic) {
                            Ok(())
                        } else {
                            let result = stream.subscribe(&topic).await;
                            if result.is_ok() {
                                applied.insert(topic);
                            }
                            result
                        }
                    }
                    Some(Outbound::Unsubscribe(topic)) => {
                        applied.remove(&topic);
                        stream.unsubscribe(&topic).await
                    }
                    None => return PumpEnd::Cancelled,
                };
                if let Err(e) = result {
                    return PumpEnd::Lost(e.to_string());
                }
            }
            frame = stream.next_frame() => match frame {
                Some(Ok(frame)) => inner.dispatch(frame),
                Some(Err(e)) => return PumpEnd::Lost(e.to_string()),
                None => return PumpEnd::Lost("closed by server".to_string()),
            },
        }
    }
}
