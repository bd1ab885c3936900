//! Connection identity and per-connection send machinery.
//!
//! A [`Connection`] pairs an identity with the lifecycle state machine
//! and a bounded outbound queue. A dedicated writer task owns the sink
//! half of the socket and drains the queue, which serializes sends per
//! connection; fan-out enqueues without blocking, so one slow target
//! cannot stall delivery to the others.

use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RelayError, RelayResult};
use crate::lifecycle::{self, ConnectionState, Effect, LifecycleInput};
use crate::message::Message;

/// A unique, opaque identity for one connection.
///
/// Assigned at accept time and never reused: a reconnect produces a new
/// connection with a new identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new random identity.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create an identity from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<ConnectionId> for Uuid {
    fn from(id: ConnectionId) -> Self {
        id.0
    }
}

/// One client's session: identity, lifecycle state, and outbound queue.
///
/// Owned by the registry for lifetime purposes; the relay holds
/// references only for the duration of a fan-out snapshot.
pub struct Connection {
    id: ConnectionId,
    // watch channel doubles as state storage and change notification;
    // send_if_modified keeps read-transition-write atomic.
    state: watch::Sender<ConnectionState>,
    outbound: mpsc::Sender<Message>,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
}

impl Connection {
    /// Create a connection and the receiving half of its outbound queue.
    ///
    /// The receiver is handed to the writer task (see [`spawn_writer`]);
    /// in tests it can be held directly to observe deliveries.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Message>) {
        Self::channel_with_id(ConnectionId::new(), capacity)
    }

    /// Like [`Connection::channel`] with a caller-chosen identity.
    pub fn channel_with_id(
        id: ConnectionId,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let now = Instant::now();
        let conn = Arc::new(Self {
            id,
            state,
            outbound: tx,
            connected_at: now,
            last_activity: Mutex::new(now),
        });
        (conn, rx)
    }

    /// The connection's identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes (used by the serve loop to arm the
    /// close timeout the moment the connection enters `Closing`).
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether the connection is open for data.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// When the connection was created.
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// When activity was last seen.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Record activity now.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// How long since the last activity.
    pub fn idle_duration(&self) -> std::time::Duration {
        self.last_activity().elapsed()
    }

    /// Drive the lifecycle state machine with one input.
    ///
    /// Returns the effects the caller must perform. The state update and
    /// transition are atomic with respect to other `apply` calls.
    pub fn apply(&self, input: LifecycleInput) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.state.send_if_modified(|state| {
            let t = lifecycle::transition(*state, input);
            let changed = t.next != *state;
            if changed {
                debug!(connection_id = %self.id, from = %*state, to = %t.next, ?input, "state transition");
                *state = t.next;
            }
            effects = t.effects;
            changed
        });
        effects
    }

    /// Queue a data message for delivery to this connection.
    ///
    /// Fails when the connection is not `Open` or its queue is full; the
    /// call never blocks.
    pub fn enqueue(&self, message: Message) -> RelayResult<()> {
        if !self.state().accepts_sends() {
            return Err(RelayError::send_failed(format!(
                "connection {} is {}",
                self.id,
                self.state()
            )));
        }
        self.try_send(message)
    }

    /// Queue a control frame (pong, close acknowledgment).
    ///
    /// Permitted outside `Open` so the closing handshake can still emit
    /// its close frame, but never after `Closed`.
    pub(crate) fn enqueue_control(&self, message: Message) -> RelayResult<()> {
        if self.state().is_terminal() {
            return Err(RelayError::send_failed(format!(
                "connection {} is closed",
                self.id
            )));
        }
        self.try_send(message)
    }

    fn try_send(&self, message: Message) -> RelayResult<()> {
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                RelayError::send_failed("outbound queue full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                RelayError::send_failed("writer task gone")
            }
        })
    }

    /// How many queued messages the outbound channel can still accept.
    pub fn outbound_capacity(&self) -> usize {
        self.outbound.capacity()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Spawn the writer task for a connection.
///
/// The task drains the outbound queue into the socket sink one message
/// at a time and stops after a close frame. On exit it closes the sink,
/// which flushes any close reply the protocol layer queued while the
/// reader was processing the peer's close frame; without that flush the
/// peer would see a reset instead of a completed close handshake.
/// Aborting the returned handle cancels any in-flight send to this
/// connection without touching other connections.
pub fn spawn_writer<S>(
    id: ConnectionId,
    mut rx: mpsc::Receiver<Message>,
    mut sink: SplitSink<WebSocketStream<S>, tungstenite::Message>,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let done = message.is_close();
            if let Err(e) = sink.send(message.into()).await {
                if done {
                    // The protocol layer already has a close in flight;
                    // the final close() below delivers it.
                    debug!(connection_id = %id, error = %e, "close already in flight");
                } else {
                    warn!(connection_id = %id, error = %e, "write failed, stopping writer");
                }
                break;
            }
            if done {
                break;
            }
        }
        // Complete the close handshake on the wire: flush pending frames
        // and shut the sink down cleanly.
        let _ = sink.close().await;
        debug!(connection_id = %id, "writer task finished");
    })
}
