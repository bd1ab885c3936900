//! Error types for the relay.
//!
//! The taxonomy distinguishes errors surfaced synchronously to the caller
//! (handshake rejection, registry invariant violations) from per-target
//! delivery failures that are recovered locally during fan-out.

use std::fmt;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur while accepting, tracking, or relaying over
/// WebSocket connections.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The HTTP request was not a WebSocket upgrade request at all.
    #[error("not a WebSocket upgrade request: {reason}")]
    NotUpgradeRequest {
        /// Why the request does not qualify as an upgrade.
        reason: String,
    },

    /// The upgrade request was recognized but malformed or unsupported.
    ///
    /// Terminal for the attempted connection; the server never retries.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// An identity was registered twice.
    ///
    /// This is an internal invariant violation, not a client error:
    /// identities are assigned at accept time and never reused.
    #[error("duplicate identity in registry: {connection_id}")]
    DuplicateIdentity {
        /// The identity that was already present.
        connection_id: ConnectionId,
    },

    /// The registry refused a new connection.
    #[error("registry at capacity: {0}")]
    AtCapacity(String),

    /// The connection was closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Close code from the peer, if one was sent.
        code: Option<u16>,
        /// Reason for closing.
        reason: String,
    },

    /// A send to one target failed.
    ///
    /// During broadcast this is recovered locally: logged, recorded, and
    /// fan-out continues to the remaining targets.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// Failed to receive a message from the peer.
    #[error("failed to receive message: {0}")]
    ReceiveFailed(String),

    /// The message payload could not be decoded.
    #[error("failed to decode message: {0}")]
    DecodeFailed(String),

    /// The message payload could not be encoded.
    #[error("failed to encode message: {0}")]
    EncodeFailed(String),

    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol-level error from the WebSocket implementation.
    #[error("websocket protocol error: {0}")]
    Tungstenite(#[from] tungstenite::Error),
}

impl RelayError {
    /// Create a "not an upgrade request" error.
    pub fn not_upgrade(reason: impl Into<String>) -> Self {
        Self::NotUpgradeRequest {
            reason: reason.into(),
        }
    }

    /// Create a handshake failure error.
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed(reason.into())
    }

    /// Create a duplicate identity error.
    pub fn duplicate_identity(connection_id: ConnectionId) -> Self {
        Self::DuplicateIdentity { connection_id }
    }

    /// Create an at-capacity error.
    pub fn at_capacity(reason: impl Into<String>) -> Self {
        Self::AtCapacity(reason.into())
    }

    /// Create a connection closed error.
    pub fn connection_closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Create a send failure error.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed(reason.into())
    }

    /// Create a receive failure error.
    pub fn receive_failed(reason: impl Into<String>) -> Self {
        Self::ReceiveFailed(reason.into())
    }

    /// Get the close code if this is a connection closed error.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::ConnectionClosed { code, .. } => *code,
            _ => None,
        }
    }

    /// Whether this error ends the connection it occurred on.
    ///
    /// Send failures are deliberately non-fatal: one dead target must not
    /// abort delivery to the rest of a broadcast.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotUpgradeRequest { .. }
                | Self::HandshakeFailed(_)
                | Self::DuplicateIdentity { .. }
                | Self::AtCapacity(_)
                | Self::ConnectionClosed { .. }
        )
    }
}

/// Close code carried in a WebSocket close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal = 1000,
    /// Going away (1001).
    GoingAway = 1001,
    /// Protocol error (1002).
    Protocol = 1002,
    /// Unsupported data (1003).
    Unsupported = 1003,
    /// No status received (1005).
    NoStatus = 1005,
    /// Abnormal closure (1006).
    Abnormal = 1006,
    /// Invalid payload data (1007).
    InvalidPayload = 1007,
    /// Policy violation (1008).
    PolicyViolation = 1008,
    /// Message too big (1009).
    MessageTooBig = 1009,
    /// Extension required (1010).
    ExtensionRequired = 1010,
    /// Internal error (1011).
    InternalError = 1011,
    /// Service restart (1012).
    ServiceRestart = 1012,
    /// Try again later (1013).
    TryAgainLater = 1013,
    /// Bad gateway (1014).
    BadGateway = 1014,
    /// TLS handshake failure (1015).
    TlsHandshake = 1015,
}

impl CloseCode {
    /// Convert from a raw u16 code.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1002 => Some(Self::Protocol),
            1003 => Some(Self::Unsupported),
            1005 => Some(Self::NoStatus),
            1006 => Some(Self::Abnormal),
            1007 => Some(Self::InvalidPayload),
            1008 => Some(Self::PolicyViolation),
            1009 => Some(Self::MessageTooBig),
            1010 => Some(Self::ExtensionRequired),
            1011 => Some(Self::InternalError),
            1012 => Some(Self::ServiceRestart),
            1013 => Some(Self::TryAgainLater),
            1014 => Some(Self::BadGateway),
            1015 => Some(Self::TlsHandshake),
            _ => None,
        }
    }

    /// Get the raw u16 value of this close code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "Normal",
            Self::GoingAway => "GoingAway",
            Self::Protocol => "Protocol",
            Self::Unsupported => "Unsupported",
            Self::NoStatus => "NoStatus",
            Self::Abnormal => "Abnormal",
            Self::InvalidPayload => "InvalidPayload",
            Self::PolicyViolation => "PolicyViolation",
            Self::MessageTooBig => "MessageTooBig",
            Self::ExtensionRequired => "ExtensionRequired",
            Self::InternalError => "InternalError",
            Self::ServiceRestart => "ServiceRestart",
            Self::TryAgainLater => "TryAgainLater",
            Self::BadGateway => "BadGateway",
            Self::TlsHandshake => "TlsHandshake",
        };
        write!(f, "{} ({})", name, self.as_u16())
    }
}
