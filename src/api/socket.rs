use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::api::events::PushFrame;
use crate::error::TransportError;

/// Opens push channel sessions. One call, one underlying connection.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn open(&self) -> Result<Box<dyn PushStream>, TransportError>;
}

/// A live push channel session.
#[async_trait]
pub trait PushStream: Send {
    /// Next inbound frame, `None` once the remote side has closed.
    /// Must be cancel-safe: it is raced against outbound traffic.
    async fn next_frame(&mut self) -> Option<Result<PushFrame, TransportError>>;

    async fn send_frame(&mut self, frame: PushFrame) -> Result<(), TransportError>;

    /// Transports that broadcast every event to every client need nothing here.
    async fn subscribe(&mut self, _topic: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn unsubscribe(&mut self, _topic: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) {}
}

pub struct WsTransport {
    url: String,
    token: Option<String>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self { url: url.into(), token }
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn open(&self) -> Result<Box<dyn PushStream>, TransportError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(t) = self.token.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {}", t))
                .map_err(|e| TransportError::Endpoint(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        let (ws, _) = connect_async(request).await?;
        debug!("WebSocket connected to {}", self.url);
        Ok(Box::new(WsStream { ws }))
    }
}

struct WsStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<PushFrame, TransportError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str::<PushFrame>(&text) {
                    Ok(frame) => return Some(Ok(frame)),
                    Err(e) => {
                        warn!("Dropping malformed push frame: {e}");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn send_frame(&mut self, frame: PushFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(&frame)?;
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
