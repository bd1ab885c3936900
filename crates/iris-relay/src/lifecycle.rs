//! Connection lifecycle state machine.
//!
//! `Connecting → Open → Closing → Closed`, with a direct
//! `Open → Closed` edge on abrupt transport failure. Transitions are
//! pure: [`transition`] maps a state and an input to the next state plus
//! the side effects the driver must perform, so the protocol logic is
//! testable without a live transport.
//!
//! Effect discipline:
//! - entering `Open` emits [`Effect::Register`];
//! - entering `Closing` emits [`Effect::FlushOutbound`] and
//!   [`Effect::SendClose`] (already-queued messages drain before
//!   teardown finishes);
//! - entering `Closed` emits [`Effect::Deregister`] exactly once;
//!   inputs applied to a `Closed` state are no-ops, so double-close
//!   cannot deregister twice.

use std::fmt;

/// The lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgrade accepted, handshake response not yet confirmed.
    Connecting,
    /// Handshake complete; messages flow both ways.
    Open,
    /// Close initiated; waiting (bounded) for the peer's acknowledgment.
    Closing,
    /// Terminal. The connection is gone and its identity never returns.
    Closed,
}

impl ConnectionState {
    /// Whether this state accepts new outbound sends.
    pub fn accepts_sends(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether this is the terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// An input that can drive a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleInput {
    /// The upgrade handshake completed successfully.
    HandshakeCompleted,
    /// The upgrade handshake failed (malformed request, bad protocol
    /// token). Never retried on the server side.
    HandshakeFailed,
    /// This side asked to close the connection.
    CloseRequested,
    /// A close frame arrived from the peer.
    CloseReceived,
    /// The peer acknowledged our close.
    CloseAcknowledged,
    /// The bounded close wait expired without an acknowledgment.
    CloseTimedOut,
    /// The transport failed abruptly.
    TransportFailed,
}

/// A side effect the driver must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Insert the connection into the registry.
    Register,
    /// Remove the connection from the registry (idempotent).
    Deregister,
    /// Drain already-queued outbound messages before teardown.
    FlushOutbound,
    /// Emit a close frame to the peer.
    SendClose,
    /// Report the closure as unexpected to lifecycle observers.
    EmitUnexpectedClose,
}

/// The result of applying an input to a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// The state after the input.
    pub next: ConnectionState,
    /// Effects the driver must perform, in order.
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: ConnectionState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    fn stay(state: ConnectionState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }
}

/// Apply `input` to `state`.
///
/// Total over all pairs: inputs that do not apply in a state leave it
/// unchanged with no effects.
pub fn transition(state: ConnectionState, input: LifecycleInput) -> Transition {
    use ConnectionState::{Closed, Closing, Connecting, Open};
    use LifecycleInput as In;

    match (state, input) {
        (Connecting, In::HandshakeCompleted) => Transition::to(Open, vec![Effect::Register]),
        (Connecting, In::HandshakeFailed) => Transition::to(Closed, vec![Effect::Deregister]),
        (Connecting, In::CloseRequested | In::TransportFailed) => {
            Transition::to(Closed, vec![Effect::Deregister])
        }

        (Open, In::CloseRequested | In::CloseReceived) => {
            Transition::to(Closing, vec![Effect::FlushOutbound, Effect::SendClose])
        }
        (Open, In::TransportFailed) => Transition::to(
            Closed,
            vec![Effect::Deregister, Effect::EmitUnexpectedClose],
        ),

        // Any sign of completion while closing finishes the teardown; a
        // peer close frame counts as the acknowledgment of ours.
        (Closing, In::CloseReceived | In::CloseAcknowledged | In::CloseTimedOut) => {
            Transition::to(Closed, vec![Effect::Deregister])
        }
        (Closing, In::TransportFailed) => Transition::to(Closed, vec![Effect::Deregister]),

        // Closed is terminal; everything else is a no-op.
        (s, _) => Transition::stay(s),
    }
}
