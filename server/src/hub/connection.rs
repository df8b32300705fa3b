//! A single upgraded WebSocket peer.
//!
//! A [`Connection`] owns the producer side of a bounded outbound queue. The
//! consumer side ([`Outbound`]) is handed to [`Connection::run_send_loop`],
//! which drains payloads onto the transport as text frames.
//!
//! # Queue Policy
//!
//! [`Connection::enqueue`] never waits. When the queue is full the peer is
//! treated as stuck: the connection is closed and [`EnqueueError::Full`] is
//! returned, so one slow client cannot stall a broadcast to everyone else.
//! Enqueueing onto a closed connection returns [`EnqueueError::Closed`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes};
use futures_util::{Sink, SinkExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Default number of payloads buffered per connection before it is
/// considered stuck.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 64;

/// How long the send loop waits to write its final close frame.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// A serialized message ready to be written as a text frame.
///
/// Cloning is cheap: every recipient of a broadcast shares the same bytes.
pub type Payload = Utf8Bytes;

/// Identity assigned to a connection when the hub admits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a payload could not be queued for a connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The connection has been closed; nothing will be delivered.
    #[error("connection closed")]
    Closed,

    /// The send queue overflowed and the connection was closed.
    #[error("send queue full, connection closed")]
    Full,
}

/// Receiving half of a connection's send queue.
///
/// Consumed by [`Connection::run_send_loop`].
#[derive(Debug)]
pub struct Outbound {
    rx: mpsc::Receiver<Payload>,
}

/// One live WebSocket peer with its own outbound queue.
pub struct Connection {
    id: OnceLock<ConnectionId>,
    peer_addr: SocketAddr,
    sender: mpsc::Sender<Payload>,
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Creates an unadmitted connection for `peer_addr`.
    ///
    /// The returned [`Outbound`] must be passed to
    /// [`run_send_loop`](Self::run_send_loop). A `queue_capacity` of zero is
    /// raised to one.
    #[must_use]
    pub fn new(peer_addr: SocketAddr, queue_capacity: usize) -> (Arc<Self>, Outbound) {
        let (sender, rx) = mpsc::channel(queue_capacity.max(1));
        let (closed, _) = watch::channel(false);

        let connection = Arc::new(Self {
            id: OnceLock::new(),
            peer_addr,
            sender,
            closed,
        });

        (connection, Outbound { rx })
    }

    /// Returns the identity assigned at admission, or `None` before that.
    pub fn id(&self) -> Option<ConnectionId> {
        self.id.get().copied()
    }

    /// Remote address of the peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Sets the identity. Only the hub actor calls this, once per connection.
    ///
    /// Returns the identity that ends up assigned, which is the existing one
    /// if the connection was already admitted.
    pub(crate) fn assign_id(&self, id: ConnectionId) -> ConnectionId {
        *self.id.get_or_init(|| id)
    }

    /// Queues `payload` for delivery without waiting.
    ///
    /// # Errors
    ///
    /// - [`EnqueueError::Closed`] if the connection is already closed
    /// - [`EnqueueError::Full`] if the queue overflowed; the connection is
    ///   closed before returning
    pub fn enqueue(&self, payload: Payload) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }

        match self.sender.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    connection_id = ?self.id(),
                    peer = %self.peer_addr,
                    capacity = self.sender.max_capacity(),
                    "Send queue full, disconnecting slow client"
                );
                self.close();
                Err(EnqueueError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                Err(EnqueueError::Closed)
            }
        }
    }

    /// Closes the connection.
    ///
    /// Safe to call any number of times; only the first call has an effect.
    /// The send loop writes a close frame and stops (abandoning any write in
    /// progress), and later enqueues fail with [`EnqueueError::Closed`].
    pub fn close(&self) {
        let changed = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });

        if changed {
            debug!(
                connection_id = ?self.id(),
                peer = %self.peer_addr,
                "Connection closed"
            );
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        wait_closed(&mut self.closed.subscribe()).await;
    }

    /// Drains the send queue onto `sink` until the connection closes.
    ///
    /// Each payload is written as a text frame. When the connection is closed
    /// between writes, a single close frame is written (waiting at most one
    /// second) and the loop returns. A write that is still pending when the
    /// connection closes is abandoned and the sink dropped without a close
    /// frame, so a peer that stopped reading cannot hold the loop open. A
    /// failed write closes the connection and ends the loop without further
    /// writes.
    pub async fn run_send_loop<S>(self: Arc<Self>, outbound: Outbound, mut sink: S)
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        let Outbound { mut rx } = outbound;
        let mut closed = self.closed.subscribe();

        loop {
            tokio::select! {
                biased;

                _ = wait_closed(&mut closed) => break,

                next = rx.recv() => {
                    let Some(payload) = next else { break };

                    trace!(
                        connection_id = ?self.id(),
                        bytes = payload.as_str().len(),
                        "Writing payload to client"
                    );

                    let written = tokio::select! {
                        biased;

                        _ = wait_closed(&mut closed) => None,
                        result = sink.send(Message::Text(payload)) => Some(result),
                    };

                    match written {
                        Some(Ok(())) => {}
                        Some(Err(err)) => {
                            debug!(
                                connection_id = ?self.id(),
                                peer = %self.peer_addr,
                                error = %err,
                                "Transport write failed, stopping send loop"
                            );
                            rx.close();
                            self.close();
                            return;
                        }
                        None => {
                            debug!(
                                connection_id = ?self.id(),
                                peer = %self.peer_addr,
                                "Connection closed mid-write, dropping transport"
                            );
                            rx.close();
                            return;
                        }
                    }
                }
            }
        }

        rx.close();
        self.close();

        match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, sink.send(Message::Close(None))).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => trace!(
                connection_id = ?self.id(),
                error = %err,
                "Failed to write close frame"
            ),
            Err(_) => trace!(
                connection_id = ?self.id(),
                "Timed out writing close frame"
            ),
        }

        debug!(
            connection_id = ?self.id(),
            peer = %self.peer_addr,
            "Send loop stopped"
        );
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // The sender lives as long as the connection, so this cannot fail.
    let _ = closed.wait_for(|closed| *closed).await;
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
