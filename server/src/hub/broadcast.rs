//! Fan-out of messages to admitted connections.
//!
//! A broadcast serializes its message once, takes the current membership
//! snapshot, and offers the shared payload to each connection's queue.
//! Enqueueing never waits, so a stuck client only affects itself: its queue
//! overflows and it is disconnected.

use serde::Serialize;
use tracing::{error, trace};

use super::connection::{ConnectionId, EnqueueError, Payload};
use super::{HubError, Members};

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the payload was queued for.
    pub delivered: usize,

    /// Connections skipped because they were already closed.
    pub closed: usize,

    /// Connections whose queue overflowed and were disconnected.
    pub overflowed: usize,
}

/// Publishes messages to every admitted connection.
///
/// Obtained from [`Hub::broadcaster`](super::Hub::broadcaster). Cloning is
/// cheap and all clones see the same membership.
#[derive(Clone)]
pub struct Broadcaster {
    members: Members,
}

impl Broadcaster {
    pub(crate) fn new(members: Members) -> Self {
        Self { members }
    }

    /// Serializes `message` to JSON and sends it to every member except
    /// `exclude`.
    ///
    /// An `exclude` that names no current member behaves like `None`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Serialization`] if `message` cannot be encoded.
    /// The failure is logged and the message is dropped for every recipient.
    pub async fn broadcast<T>(
        &self,
        message: &T,
        exclude: Option<ConnectionId>,
    ) -> Result<BroadcastReport, HubError>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_string(message).map_err(|err| {
            error!(error = %err, "Failed to serialize broadcast message, dropping it");
            HubError::Serialization(err)
        })?;

        Ok(self.broadcast_raw(Payload::from(json), exclude).await)
    }

    /// Sends an already-serialized text payload to every member except
    /// `exclude`.
    pub async fn broadcast_raw(
        &self,
        payload: Payload,
        exclude: Option<ConnectionId>,
    ) -> BroadcastReport {
        let members = std::sync::Arc::clone(&*self.members.read().await);
        let mut report = BroadcastReport::default();

        for connection in members.iter() {
            if exclude.is_some() && connection.id() == exclude {
                continue;
            }

            match connection.enqueue(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(EnqueueError::Closed) => report.closed += 1,
                Err(EnqueueError::Full) => report.overflowed += 1,
            }
        }

        trace!(
            bytes = payload.as_str().len(),
            delivered = report.delivered,
            closed = report.closed,
            overflowed = report.overflowed,
            "Broadcast complete"
        );

        report
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster").finish_non_exhaustive()
    }
}
