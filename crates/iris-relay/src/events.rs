//! Lifecycle and delivery events.
//!
//! Every observable transition and every recovered failure is reported to
//! an injected [`EventSink`]. The default sink forwards to `tracing`;
//! tests substitute a collecting sink. Asynchronous failures are never
//! swallowed without at least one record.

use tracing::{info, warn};

use crate::connection::ConnectionId;

/// An observable relay event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A connection completed its handshake and entered `Open`.
    Opened {
        /// The new connection's identity.
        id: ConnectionId,
    },
    /// A connection reached `Closed` and left the registry.
    Closed {
        /// The closed connection's identity.
        id: ConnectionId,
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Whether closure was abrupt rather than a deliberate close.
        unexpected: bool,
    },
    /// An upgrade request was rejected before a connection existed.
    HandshakeRejected {
        /// Why the upgrade was rejected.
        reason: String,
    },
    /// A broadcast send to one target failed; fan-out continued.
    DeliveryFailed {
        /// The message's source connection.
        source: ConnectionId,
        /// The target that could not be reached.
        target: ConnectionId,
    },
    /// A registry invariant violation (duplicate identity).
    RegistryFault {
        /// The identity involved.
        id: ConnectionId,
    },
}

/// Destination for lifecycle and delivery-failure events.
///
/// Injected into the relay so collaborators (logging, monitoring) can
/// observe the connection lifecycle without the relay knowing about them.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: RelayEvent);
}

/// Default sink: emits each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: RelayEvent) {
        match event {
            RelayEvent::Opened { id } => {
                info!(connection_id = %id, "connection opened");
            }
            RelayEvent::Closed {
                id,
                code,
                unexpected,
            } => {
                if unexpected {
                    warn!(connection_id = %id, code = ?code, "connection closed unexpectedly");
                } else {
                    info!(connection_id = %id, code = ?code, "connection closed");
                }
            }
            RelayEvent::HandshakeRejected { reason } => {
                warn!(reason = %reason, "handshake rejected");
            }
            RelayEvent::DeliveryFailed { source, target } => {
                warn!(source = %source, target = %target, "delivery failed");
            }
            RelayEvent::RegistryFault { id } => {
                warn!(connection_id = %id, "registry invariant violation");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{EventSink, RelayEvent};
    use parking_lot::Mutex;

    /// Collects events for assertions.
    #[derive(Debug, Default)]
    pub struct CollectingSink {
        events: Mutex<Vec<RelayEvent>>,
    }

    impl CollectingSink {
        pub fn events(&self) -> Vec<RelayEvent> {
            self.events.lock().clone()
        }

        pub fn count_delivery_failures(&self) -> usize {
            self.events
                .lock()
                .iter()
                .filter(|e| matches!(e, RelayEvent::DeliveryFailed { .. }))
                .count()
        }
    }

    impl EventSink for CollectingSink {
        fn record(&self, event: RelayEvent) {
            self.events.lock().push(event);
        }
    }
}
