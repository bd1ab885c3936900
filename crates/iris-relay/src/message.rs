//! Message and frame types.
//!
//! [`Message`] mirrors the WebSocket frame opcodes (text, binary, ping,
//! pong, close). [`Envelope`] is the relay's unit of fan-out: an immutable
//! payload stamped with the sender's identity and arrival time, never
//! persisted past its delivery attempts.

use std::borrow::Cow;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionId;
use crate::error::{CloseCode, RelayError, RelayResult};

/// A WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
    /// A ping frame with optional payload.
    Ping(Vec<u8>),
    /// A pong frame with optional payload.
    Pong(Vec<u8>),
    /// A close frame with optional code and reason.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Create a text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a binary message.
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary(data.into())
    }

    /// Create a ping message.
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::Ping(data.into())
    }

    /// Create a pong message.
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::Pong(data.into())
    }

    /// Create a close message with a code and reason.
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::Close(Some(CloseFrame {
            code: code.as_u16(),
            reason: Cow::Owned(reason.into()),
        }))
    }

    /// Create a close message with no status.
    pub fn close_empty() -> Self {
        Self::Close(None)
    }

    /// Whether this is a text message.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Whether this is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Whether this is a close message.
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }

    /// Whether this is a data message (text or binary) eligible for relay.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Text(_) | Self::Binary(_))
    }

    /// Whether this is a control message (ping, pong, or close).
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ping(_) | Self::Pong(_) | Self::Close(_))
    }

    /// Get the payload as text, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the payload as bytes. Returns `None` for close messages.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(s) => Some(s.as_bytes()),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => Some(b),
            Self::Close(_) => None,
        }
    }

    /// Get the close frame, if this is a close message.
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        match self {
            Self::Close(frame) => frame.as_ref(),
            _ => None,
        }
    }

    /// Parse a text payload as JSON.
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> RelayResult<T> {
        let text = self
            .as_text()
            .ok_or_else(|| RelayError::DecodeFailed("not a text message".to_string()))?;
        serde_json::from_str(text).map_err(|e| RelayError::DecodeFailed(e.to_string()))
    }

    /// Build a text message from a JSON-serializable value.
    pub fn from_json<T: Serialize>(value: &T) -> RelayResult<Self> {
        let text =
            serde_json::to_string(value).map_err(|e| RelayError::EncodeFailed(e.to_string()))?;
        Ok(Self::Text(text))
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => b.len(),
            Self::Close(Some(frame)) => 2 + frame.reason.len(),
            Self::Close(None) => 0,
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame opcode name, for structured log fields.
    pub fn opcode(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Close(_) => "close",
        }
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Message {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Self::Binary(b.to_vec())
    }
}

impl From<tungstenite::Message> for Message {
    fn from(msg: tungstenite::Message) -> Self {
        match msg {
            tungstenite::Message::Text(s) => Self::Text(s.to_string()),
            tungstenite::Message::Binary(b) => Self::Binary(b.to_vec()),
            tungstenite::Message::Ping(b) => Self::Ping(b.to_vec()),
            tungstenite::Message::Pong(b) => Self::Pong(b.to_vec()),
            tungstenite::Message::Close(frame) => Self::Close(frame.map(CloseFrame::from)),
            tungstenite::Message::Frame(_) => Self::Binary(vec![]),
        }
    }
}

impl From<Message> for tungstenite::Message {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(s) => Self::Text(s.into()),
            Message::Binary(b) => Self::Binary(b.into()),
            Message::Ping(b) => Self::Ping(b.into()),
            Message::Pong(b) => Self::Pong(b.into()),
            Message::Close(frame) => {
                Self::Close(frame.map(tungstenite::protocol::CloseFrame::from))
            }
        }
    }
}

/// A WebSocket close frame with optional status code and reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close code.
    pub code: u16,
    /// The close reason.
    pub reason: Cow<'static, str>,
}

impl CloseFrame {
    /// Create a close frame.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code: code.as_u16(),
            reason: Cow::Owned(reason.into()),
        }
    }

    /// Create a normal close frame.
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::Normal, reason)
    }

    /// Create a going-away close frame.
    pub fn going_away(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::GoingAway, reason)
    }

    /// Create a protocol-error close frame.
    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::Protocol, reason)
    }

    /// The standard close code, if the raw value maps to one.
    pub fn close_code(&self) -> Option<CloseCode> {
        CloseCode::from_u16(self.code)
    }
}

impl From<tungstenite::protocol::CloseFrame> for CloseFrame {
    fn from(frame: tungstenite::protocol::CloseFrame) -> Self {
        Self {
            code: frame.code.into(),
            reason: Cow::Owned(frame.reason.to_string()),
        }
    }
}

impl From<CloseFrame> for tungstenite::protocol::CloseFrame {
    fn from(frame: CloseFrame) -> Self {
        Self {
            code: frame.code.into(),
            reason: frame.reason.to_string().into(),
        }
    }
}

/// A message captured for fan-out.
///
/// Immutable once constructed. The sender identity lets routing policy
/// decide whether the source sees its own broadcast; the arrival timestamp
/// exists for logging and diagnostics only.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The relayed payload.
    pub payload: Message,
    /// Identity of the connection the payload arrived on.
    pub sender: ConnectionId,
    /// When the payload was received from the sender.
    pub received_at: Instant,
}

impl Envelope {
    /// Stamp a payload with its sender and the current time.
    pub fn new(payload: Message, sender: ConnectionId) -> Self {
        Self {
            payload,
            sender,
            received_at: Instant::now(),
        }
    }
}
