use thiserror::Error;

/// Failures of the REST collaborators. Always scoped to one request.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures of the push channel transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid push endpoint: {0}")]
    Endpoint(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("cannot serialize settings: {0}")]
    TomlWrite(#[from] toml::ser::Error),
    #[error("invalid legacy session file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no config directory available")]
    NoConfigDir,
    #[error("missing setting `{0}`")]
    Missing(&'static str),
}

/// Rejections of operator actions by the sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("conversation {0} not found")]
    NotFound(String),
    #[error("no conversation is ready")]
    NoActiveConversation,
    #[error("message is empty")]
    EmptyMessage,
}

/// Anything that stops the binary from starting or keeps it from reading commands.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
