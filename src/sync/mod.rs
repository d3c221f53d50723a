pub mod connection;
pub mod coordinator;
pub mod directory;
pub mod projection;
pub mod service;
pub mod timeline;

pub use connection::{ConnectionManager, ConnectionStatus, ReconnectPolicy};
pub use coordinator::{InboxView, SyncCoordinator, SyncEvent};
pub use service::{InboxHandle, SyncService};
