//! Real-time connection hub.
//!
//! The hub tracks every upgraded WebSocket client and fans messages out to
//! them.
//!
//! # Architecture
//!
//! - [`Connection`] - one peer, with a bounded send queue drained by its own
//!   send loop
//! - [`Hub`] - handle to the actor that owns membership; admission and
//!   removal are serialized through it
//! - [`Broadcaster`] - publishes a JSON message to every member except an
//!   optional excluded one
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use posthub_server::hub::{Connection, Hub, HubConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (hub, _actor) = Hub::spawn(HubConfig::default());
//!
//!     let (connection, _outbound) = Connection::new("127.0.0.1:4000".parse().unwrap(), 16);
//!     let id = hub.register(Arc::clone(&connection)).await.unwrap();
//!     assert_eq!(connection.id(), Some(id));
//!
//!     let report = hub
//!         .broadcaster()
//!         .broadcast(&json!({"id": "p1", "post_content": "hi"}), None)
//!         .await
//!         .unwrap();
//!     assert_eq!(report.delivered, 1);
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

pub mod broadcast;
pub mod connection;
pub mod registry;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use connection::{
    Connection, ConnectionId, EnqueueError, Outbound, Payload, DEFAULT_SEND_QUEUE_CAPACITY,
};
pub use registry::{Hub, HubConfig, DEFAULT_INTAKE_CAPACITY};

/// Immutable view of the admitted connections, in admission order.
pub type Snapshot = Arc<Vec<Arc<Connection>>>;

/// Shared slot holding the current [`Snapshot`]. Only the hub actor writes it.
pub(crate) type Members = Arc<RwLock<Snapshot>>;

/// Errors surfaced by hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub actor is no longer running.
    #[error("hub is not running")]
    Closed,

    /// A broadcast message could not be serialized; nothing was sent.
    #[error("failed to serialize broadcast message: {0}")]
    Serialization(#[from] serde_json::Error),
}
