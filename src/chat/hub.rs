//! Connection registry and broadcast hub.
//!
//! The hub owns the set of live connections on this instance. A single
//! dispatcher task drains the bounded fan-in queue and writes each message to
//! every connection in the message's room before taking the next one.
//!
//! Writes never block the dispatcher: each connection has a bounded outbound
//! queue drained by its own writer task. A full queue means the connection
//! cannot keep up, and it is evicted.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use super::message::ChatMessage;
use crate::history::RoomHistory;
use crate::{RelayError, Result};

/// Identifier of a registered connection, increasing in registration order.
pub type ConnectionId = u64;

/// How many of the newest replayed messages are checked against live traffic.
const REPLAY_OVERLAP: usize = 64;

/// A registered connection.
struct Connection {
    room: String,
    outbound: mpsc::Sender<ChatMessage>,
    /// Set on eviction. Dropped with the connection on any removal.
    evicted: watch::Sender<bool>,
}

/// Notifies a connection's tasks that the hub no longer holds it.
#[derive(Debug, Clone)]
pub struct RemovalSignal {
    evicted: watch::Receiver<bool>,
}

impl RemovalSignal {
    /// Resolves once the connection has been removed, for any reason.
    pub async fn removed(&mut self) {
        // Eviction changes the value; every other removal closes the channel.
        let _ = self.evicted.changed().await;
    }

    /// Resolves only if the connection was evicted for falling behind.
    pub async fn evicted(&mut self) {
        let evicted = self.evicted.wait_for(|evicted| *evicted).await.is_ok();
        if !evicted {
            std::future::pending::<()>().await;
        }
    }

    /// Whether the connection was evicted.
    pub fn is_evicted(&self) -> bool {
        *self.evicted.borrow()
    }
}

/// A freshly registered connection.
///
/// The connection is registered before history is read, so a message stored
/// just before the read may also arrive live. `recv` drops those copies; the
/// writer sends every `replay` message first and then reads with `recv`.
#[derive(Debug)]
pub struct JoinedConnection {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Room the connection belongs to.
    pub room: String,
    /// Room history at registration time, in append order.
    pub replay: Vec<ChatMessage>,
    outbound: mpsc::Receiver<ChatMessage>,
    /// Tail of the replay that may still be in flight.
    overlap: VecDeque<ChatMessage>,
    signal: RemovalSignal,
}

impl JoinedConnection {
    /// Next live message, or None once the hub has dropped the connection.
    pub async fn recv(&mut self) -> Option<ChatMessage> {
        loop {
            let msg = self.outbound.recv().await?;
            if !self.take_replayed(&msg) {
                return Some(msg);
            }
        }
    }

    /// Next live message if one is already queued.
    pub fn try_recv(&mut self) -> std::result::Result<ChatMessage, TryRecvError> {
        loop {
            let msg = self.outbound.try_recv()?;
            if !self.take_replayed(&msg) {
                return Ok(msg);
            }
        }
    }

    /// Signal fired when the hub removes this connection.
    pub fn removal_signal(&self) -> RemovalSignal {
        self.signal.clone()
    }

    fn take_replayed(&mut self, msg: &ChatMessage) -> bool {
        if self.overlap.is_empty() {
            return false;
        }
        match self.overlap.iter().position(|replayed| replayed == msg) {
            Some(pos) => {
                self.overlap.remove(pos);
                debug!(connection = self.id, "Skipping live copy of a replayed message");
                true
            }
            None => false,
        }
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Connections removed during the pass.
    pub evicted: usize,
}

/// Connection registry and broadcast hub for one instance.
pub struct ChatHub {
    /// Live connections in registration order.
    connections: Mutex<BTreeMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
    history: RoomHistory,
    outbound_capacity: usize,
}

impl ChatHub {
    /// Create an empty hub.
    pub fn new(history: RoomHistory, outbound_capacity: usize) -> Self {
        Self {
            connections: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            history,
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// Register a connection in `room` and read its history.
    ///
    /// The registry lock is released before history is read, so a slow store
    /// delays only this join. Anything dispatched meanwhile waits in the
    /// connection's outbound queue; a room busy enough to fill it during the
    /// read evicts the joiner like any slow connection.
    pub async fn join(&self, room: &str) -> Result<JoinedConnection> {
        if room.trim().is_empty() {
            return Err(RelayError::Registration("room must not be empty".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, receiver) = mpsc::channel(self.outbound_capacity);
        let (evicted, signal) = watch::channel(false);
        let active = {
            let mut connections = self.connections.lock().await;
            connections.insert(
                id,
                Connection {
                    room: room.to_string(),
                    outbound,
                    evicted,
                },
            );
            connections.len()
        };

        // Messages are stored before they are published, so anything stored
        // after this read is dispatched to the connection registered above.
        let replay = match self.history.load(room).await {
            Ok(replay) => replay,
            Err(e) => {
                error!(room, error = %e, "Failed to read room history, joining without replay");
                Vec::new()
            }
        };
        let overlap = replay
            .iter()
            .skip(replay.len().saturating_sub(REPLAY_OVERLAP))
            .cloned()
            .collect();

        info!(
            connection = id,
            room,
            replay = replay.len(),
            active,
            "Connection joined"
        );

        Ok(JoinedConnection {
            id,
            room: room.to_string(),
            replay,
            outbound: receiver,
            overlap,
            signal: RemovalSignal { evicted: signal },
        })
    }

    /// Remove a connection.
    ///
    /// Dropping its queue ends the writer task, which closes the transport,
    /// and fires the connection's removal signal. Returns false if it was
    /// already gone.
    pub async fn leave(&self, id: ConnectionId) -> bool {
        let removed = self.connections.lock().await.remove(&id);
        if let Some(conn) = removed {
            debug!(connection = id, room = %conn.room, "Connection left");
            true
        } else {
            false
        }
    }

    /// Write a message to every connection in its room.
    ///
    /// A failed write evicts only that connection and fires its eviction
    /// signal, which stops its reader and abandons any write still pending on
    /// its transport. The pass holds the registry lock, so it never races a
    /// join or a removal.
    pub async fn dispatch(&self, msg: &ChatMessage) -> DispatchReport {
        let mut connections = self.connections.lock().await;
        let mut report = DispatchReport::default();
        let mut failed = Vec::new();

        for (&id, conn) in connections.iter() {
            if conn.room != msg.room {
                continue;
            }
            match conn.outbound.try_send(msg.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let err = RelayError::Write {
                        connection: id,
                        reason: "outbound queue full".to_string(),
                    };
                    warn!(room = %conn.room, error = %err, "Evicting slow connection");
                    conn.evicted.send_replace(true);
                    failed.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection = id, room = %conn.room, "Connection already closed");
                    failed.push(id);
                }
            }
        }

        for id in failed {
            connections.remove(&id);
            report.evicted += 1;
        }

        report
    }

    /// Queue a message for one connection only.
    pub async fn send_to(&self, id: ConnectionId, msg: ChatMessage) -> Result<()> {
        let connections = self.connections.lock().await;
        let conn = connections.get(&id).ok_or_else(|| RelayError::Write {
            connection: id,
            reason: "connection not registered".to_string(),
        })?;
        conn.outbound.try_send(msg).map_err(|e| RelayError::Write {
            connection: id,
            reason: e.to_string(),
        })
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Number of live connections in a room.
    pub async fn room_connection_count(&self, room: &str) -> usize {
        self.connections
            .lock()
            .await
            .values()
            .filter(|c| c.room == room)
            .count()
    }

    /// Remove every connection, closing their transports.
    pub async fn close_all(&self) {
        let mut connections = self.connections.lock().await;
        let count = connections.len();
        connections.clear();
        info!(closed = count, "Closed all connections");
    }
}

/// Producer side of the hub's fan-in queue.
#[derive(Clone)]
pub struct HubSender {
    sender: mpsc::Sender<ChatMessage>,
}

impl HubSender {
    /// Queue a message for dispatch, waiting while the queue is full.
    pub async fn submit(&self, msg: ChatMessage) -> Result<()> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| RelayError::HubClosed)
    }
}

/// Create the bounded fan-in queue.
pub fn fan_in(capacity: usize) -> (HubSender, mpsc::Receiver<ChatMessage>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (HubSender { sender }, receiver)
}

/// Dispatch queued messages until shutdown is signalled or every producer is gone.
///
/// On shutdown the queue is closed, whatever is already queued is still
/// dispatched, and then every connection is closed.
pub async fn run_dispatcher(
    hub: Arc<ChatHub>,
    mut queue: mpsc::Receiver<ChatMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            msg = queue.recv() => match msg {
                Some(msg) => {
                    let report = hub.dispatch(&msg).await;
                    debug!(room = %msg.room, delivered = report.delivered, evicted = report.evicted, "Dispatched");
                }
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    queue.close();
                    while let Some(msg) = queue.recv().await {
                        hub.dispatch(&msg).await;
                    }
                    break;
                }
            }
        }
    }

    hub.close_all().await;
    info!("Dispatcher stopped");
}
