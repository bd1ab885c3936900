//! Broadcast relay.
//!
//! The [`Relay`] receives an inbound message from one connection and fans
//! it out to every connection in the registry snapshot. One logical flow
//! of control per connection handles inbound traffic ([`Relay::serve`]);
//! the registry and the relay are the shared state those flows touch.
//!
//! Delivery semantics:
//! - per-source FIFO: a source's messages reach every target in the
//!   order they were received from that source; nothing is guaranteed
//!   across sources;
//! - partial failure is normal: a dead target is logged, recorded, and
//!   skipped, and fan-out continues;
//! - by default the source is included in its own broadcast (echo
//!   semantics); [`RelayConfig::include_sender`] turns that off.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, instrument, warn};

use crate::config::RelayConfig;
use crate::connection::{spawn_writer, Connection, ConnectionId};
use crate::error::{RelayError, RelayResult};
use crate::events::{EventSink, RelayEvent, TracingSink};
use crate::handshake::{self, Handshake};
use crate::lifecycle::{ConnectionState, Effect, LifecycleInput};
use crate::message::{CloseFrame, Envelope, Message};
use crate::registry::Registry;

/// The message relay: registry + routing policy + event sink.
pub struct Relay {
    registry: Arc<Registry>,
    sink: Arc<dyn EventSink>,
    config: RelayConfig,
}

impl Relay {
    /// Create a relay over an explicit registry and event sink.
    pub fn new(registry: Arc<Registry>, sink: Arc<dyn EventSink>, config: RelayConfig) -> Self {
        Self {
            registry,
            sink,
            config,
        }
    }

    /// Create a relay with its own registry and the tracing sink.
    pub fn with_config(config: RelayConfig) -> Self {
        let registry = Registry::new(config.max_connections);
        Self::new(registry, Arc::new(TracingSink), config)
    }

    /// The relay's registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The relay's configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run the upgrade exchange for an HTTP request, recording a
    /// rejection event when the handshake fails.
    pub fn upgrade<B>(&self, request: &http::Request<B>, required_protocols: &[&str]) -> Handshake {
        let handshake = handshake::upgrade(request, required_protocols);
        if !handshake.accepted {
            let reason = handshake::validate_upgrade(request)
                .err()
                .map_or_else(|| "unsupported subprotocol".to_string(), |e| e.to_string());
            self.sink.record(RelayEvent::HandshakeRejected { reason });
        }
        handshake
    }

    /// Fan an inbound message out to the registry snapshot.
    ///
    /// A message from a non-open source is silently dropped (a race
    /// during teardown, not a client error). Returns the number of
    /// targets the message was queued for.
    #[instrument(skip(self, source, message), fields(source = %source.id(), opcode = message.opcode()))]
    pub fn dispatch(&self, source: &Connection, message: Message) -> usize {
        if !source.is_open() {
            debug!(state = %source.state(), "dropping message from non-open source");
            return 0;
        }

        let envelope = Envelope::new(message, source.id());
        let exclude = if self.config.include_sender {
            None
        } else {
            Some(envelope.sender)
        };

        let mut delivered = 0;
        for target in self.registry.broadcast_targets(exclude) {
            match target.enqueue(envelope.payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    // One dead target must not abort the rest.
                    warn!(target = %target.id(), error = %e, "delivery failed, continuing fan-out");
                    self.sink.record(RelayEvent::DeliveryFailed {
                        source: envelope.sender,
                        target: target.id(),
                    });
                }
            }
        }
        delivered
    }

    /// Move a freshly upgraded connection into `Open` and register it.
    ///
    /// Fails synchronously when the registry refuses the connection
    /// (capacity, shutdown, or a duplicate identity); the connection is
    /// forced to `Closed` and never serves traffic.
    pub fn open(&self, connection: &Arc<Connection>) -> RelayResult<()> {
        for effect in connection.apply(LifecycleInput::HandshakeCompleted) {
            if effect == Effect::Register {
                if let Err(e) = self.registry.register(Arc::clone(connection)) {
                    if matches!(e, RelayError::DuplicateIdentity { .. }) {
                        self.sink.record(RelayEvent::RegistryFault {
                            id: connection.id(),
                        });
                    }
                    // Never registered: close the handle without touching
                    // the registry, which may hold another connection
                    // under this identity.
                    connection.apply(LifecycleInput::TransportFailed);
                    return Err(e);
                }
                self.sink.record(RelayEvent::Opened {
                    id: connection.id(),
                });
            }
        }
        Ok(())
    }

    /// Initiate a server-side close of one connection.
    ///
    /// The connection's serve loop then waits (bounded by the configured
    /// close timeout) for the peer's acknowledgment.
    pub fn close(
        &self,
        id: ConnectionId,
        code: crate::error::CloseCode,
        reason: impl Into<String>,
    ) -> RelayResult<()> {
        let connection = self
            .registry
            .get(id)
            .ok_or_else(|| RelayError::connection_closed(None, "unknown connection"))?;
        let frame = Message::Close(Some(CloseFrame::new(code, reason)));
        for effect in connection.apply(LifecycleInput::CloseRequested) {
            if effect == Effect::SendClose {
                connection.enqueue_control(frame.clone())?;
            }
        }
        Ok(())
    }

    /// Drive one upgraded connection to completion.
    ///
    /// Registers the connection, relays its inbound data frames, answers
    /// pings, runs the closing handshake with a bounded wait, and
    /// deregisters on the way out. Call once per connection, typically
    /// from a spawned task.
    pub async fn serve<S>(&self, stream: WebSocketStream<S>) -> RelayResult<ConnectionId>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink_half, mut reader) = stream.split();
        let (connection, outbound_rx) = Connection::channel(self.config.outbound_queue);
        let id = connection.id();
        let mut writer = spawn_writer(id, outbound_rx, sink_half);

        if let Err(e) = self.open(&connection) {
            writer.abort();
            return Err(e);
        }

        let mut state_rx = connection.state_watch();
        let mut close_code: Option<u16> = None;
        let mut graceful = true;
        // Armed once, on entry to Closing; inbound traffic after that
        // must not push the deadline back.
        let mut close_at: Option<Instant> = None;

        loop {
            if close_at.is_none() && connection.state() == ConnectionState::Closing {
                close_at = Some(Instant::now() + self.config.close_timeout);
            }
            let deadline = close_at;
            let close_deadline = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                next = reader.next() => match next {
                    Some(Ok(raw)) => {
                        connection.touch();
                        let message = Message::from(raw);
                        match &message {
                            Message::Ping(data) => {
                                let _ = connection.enqueue_control(Message::pong(data.clone()));
                            }
                            Message::Pong(_) => {}
                            Message::Close(frame) => {
                                close_code = frame.as_ref().map(|f| f.code);
                                let effects = connection.apply(LifecycleInput::CloseReceived);
                                self.run_close_effects(&connection, &effects, close_code);
                                if connection.state() == ConnectionState::Closed {
                                    // Our earlier close was just acknowledged.
                                    break;
                                }
                                // Peer-initiated close: the acknowledgment we
                                // queued completes the handshake on our side.
                                let effects =
                                    connection.apply(LifecycleInput::CloseAcknowledged);
                                self.teardown(&connection, effects, close_code);
                                break;
                            }
                            _ => {
                                self.dispatch(&connection, message);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %id, error = %e, "transport error");
                        graceful = connection.state() == ConnectionState::Closing;
                        let effects = connection.apply(LifecycleInput::TransportFailed);
                        self.teardown(&connection, effects, close_code);
                        break;
                    }
                    None => {
                        graceful = connection.state() == ConnectionState::Closing;
                        let effects = connection.apply(LifecycleInput::TransportFailed);
                        self.teardown(&connection, effects, close_code);
                        break;
                    }
                },
                _ = state_rx.changed() => {
                    // Re-evaluate the deadline against the new state.
                }
                () = close_deadline => {
                    debug!(connection_id = %id, "close acknowledgment timed out, forcing closure");
                    graceful = false;
                    let effects = connection.apply(LifecycleInput::CloseTimedOut);
                    self.teardown(&connection, effects, close_code);
                    break;
                }
            }
        }

        if graceful {
            // Let the writer drain what was already queued; it stops on
            // its own after emitting the close frame.
            if timeout(self.config.close_timeout, &mut writer).await.is_err() {
                writer.abort();
            }
        } else {
            writer.abort();
        }

        Ok(id)
    }

    /// Process the effects of a close-path transition that may stay in
    /// `Closing` (flush + close frame) or land in `Closed`.
    fn run_close_effects(
        &self,
        connection: &Arc<Connection>,
        effects: &[Effect],
        close_code: Option<u16>,
    ) {
        for effect in effects {
            match effect {
                Effect::SendClose => {
                    let frame = close_code
                        .and_then(crate::error::CloseCode::from_u16)
                        .map_or_else(Message::close_empty, |code| Message::close(code, ""));
                    if let Err(e) = connection.enqueue_control(frame) {
                        warn!(connection_id = %connection.id(), error = %e, "failed to queue close frame");
                    }
                }
                Effect::FlushOutbound => {
                    // Queued messages precede the close frame in the
                    // outbound channel; the writer drains them in order.
                }
                Effect::Deregister => {
                    self.deregister(connection, close_code, false);
                }
                Effect::Register | Effect::EmitUnexpectedClose => {}
            }
        }
    }

    /// Process the effects of a transition that landed in `Closed`.
    fn teardown(&self, connection: &Arc<Connection>, effects: Vec<Effect>, close_code: Option<u16>) {
        let unexpected = effects.contains(&Effect::EmitUnexpectedClose);
        for effect in effects {
            if effect == Effect::Deregister {
                self.deregister(connection, close_code, unexpected);
            }
        }
    }

    fn deregister(&self, connection: &Arc<Connection>, close_code: Option<u16>, unexpected: bool) {
        self.registry.unregister(connection.id());
        self.sink.record(RelayEvent::Closed {
            id: connection.id(),
            code: close_code,
            unexpected,
        });
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
