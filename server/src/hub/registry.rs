//! The hub actor: sole owner of connection membership.
//!
//! Admission and removal requests travel over two bounded intake queues to a
//! single task, so membership changes are totally ordered and never race
//! each other. The membership list itself is published as a copy-on-write
//! snapshot: the actor swaps in a new `Arc<Vec<_>>` under a short write lock,
//! and readers such as the [`Broadcaster`] clone the current `Arc` under a
//! read lock and then work lock-free.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broadcast::Broadcaster;
use super::connection::{Connection, ConnectionId};
use super::{HubError, Members, Snapshot};

/// Default capacity of each intake queue.
///
/// Kept at one so callers hand requests to the actor almost directly and feel
/// backpressure as soon as it falls behind.
pub const DEFAULT_INTAKE_CAPACITY: usize = 1;

/// Tuning for the hub actor.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the admission and removal queues.
    pub intake_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
        }
    }
}

struct Admission {
    connection: Arc<Connection>,
    reply: oneshot::Sender<ConnectionId>,
}

/// Handle to the hub actor.
///
/// Cheap to clone. The actor runs until every handle has been dropped.
#[derive(Clone)]
pub struct Hub {
    admissions: mpsc::Sender<Admission>,
    removals: mpsc::Sender<ConnectionId>,
    members: Members,
}

impl Hub {
    /// Spawns the hub actor and returns a handle to it.
    #[must_use]
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        let capacity = config.intake_capacity.max(1);
        let (admissions, admission_rx) = mpsc::channel(capacity);
        let (removals, removal_rx) = mpsc::channel(capacity);
        let members: Members = Arc::new(RwLock::new(Arc::new(Vec::new())));

        let actor = HubActor {
            admissions: admission_rx,
            removals: removal_rx,
            members: Arc::clone(&members),
        };
        let task = tokio::spawn(actor.run());
        debug!(intake_capacity = capacity, "Hub actor spawned");

        (
            Self {
                admissions,
                removals,
                members,
            },
            task,
        )
    }

    /// Admits `connection` and returns the identity the actor assigned.
    ///
    /// Waits for room in the admission queue and then for the actor's reply.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the actor is no longer running.
    pub async fn register(&self, connection: Arc<Connection>) -> Result<ConnectionId, HubError> {
        let (reply, assigned) = oneshot::channel();
        self.admissions
            .send(Admission { connection, reply })
            .await
            .map_err(|_| HubError::Closed)?;
        assigned.await.map_err(|_| HubError::Closed)
    }

    /// Requests removal of the connection with identity `id`.
    ///
    /// Returns once the actor has accepted the request. Removing an unknown
    /// identity is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the actor is no longer running.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), HubError> {
        self.removals.send(id).await.map_err(|_| HubError::Closed)
    }

    /// Returns the current membership snapshot, in admission order.
    pub async fn members(&self) -> Snapshot {
        Arc::clone(&*self.members.read().await)
    }

    /// Returns the number of admitted connections.
    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    /// Returns `true` if no connection is admitted.
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Returns a broadcaster over this hub's membership.
    #[must_use]
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(Arc::clone(&self.members))
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("actor_running", &!self.admissions.is_closed())
            .finish()
    }
}

struct HubActor {
    admissions: mpsc::Receiver<Admission>,
    removals: mpsc::Receiver<ConnectionId>,
    members: Members,
}

impl HubActor {
    async fn run(mut self) {
        loop {
            // Removals first: a removal queued before an admission is
            // always applied before it.
            tokio::select! {
                biased;
                Some(id) = self.removals.recv() => self.on_disconnect(id).await,
                Some(admission) = self.admissions.recv() => self.on_connect(admission).await,
                else => break,
            }
        }

        let mut members = self.members.write().await;
        for connection in members.iter() {
            connection.close();
        }
        info!(closed = members.len(), "Hub actor stopped");
        *members = Arc::new(Vec::new());
    }

    async fn on_connect(&mut self, admission: Admission) {
        let Admission { connection, reply } = admission;
        let id = connection.assign_id(ConnectionId::generate());

        {
            let mut members = self.members.write().await;
            if members.iter().any(|member| member.id() == Some(id)) {
                warn!(connection_id = %id, "Connection admitted twice, ignoring");
            } else {
                let mut next = Vec::with_capacity(members.len() + 1);
                next.extend(members.iter().cloned());
                next.push(Arc::clone(&connection));
                *members = Arc::new(next);
            }
        }

        info!(
            connection_id = %id,
            peer = %connection.peer_addr(),
            "Client connected"
        );

        if reply.send(id).is_err() {
            debug!(connection_id = %id, "Admission requester went away before reply");
        }
    }

    async fn on_disconnect(&mut self, id: ConnectionId) {
        let removed = {
            let mut members = self.members.write().await;
            match members.iter().position(|member| member.id() == Some(id)) {
                Some(index) => {
                    let mut next = (**members).clone();
                    let removed = next.remove(index);
                    *members = Arc::new(next);
                    Some(removed)
                }
                None => None,
            }
        };

        match removed {
            Some(connection) => {
                connection.close();
                info!(
                    connection_id = %id,
                    peer = %connection.peer_addr(),
                    "Client disconnected"
                );
            }
            None => debug!(connection_id = %id, "Removal for unknown connection ignored"),
        }
    }
}
