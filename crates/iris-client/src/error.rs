//! Client-side error types.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced to a relay consumer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The relay URL could not be parsed.
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),

    /// The URL scheme is not a relay scheme (`ws` or `wss`).
    #[error("unsupported URL scheme: {scheme}")]
    UnsupportedScheme {
        /// The offending scheme.
        scheme: String,
    },

    /// A plaintext `ws` URL was used from a secure context.
    ///
    /// Mixed-security connections are rejected outright: a page loaded
    /// over an encrypted channel must use `wss`.
    #[error("refusing plaintext ws connection from a secure context")]
    MixedSecurity,

    /// A connection attempt failed before the session was established.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The session ended without a deliberate close.
    ///
    /// Reported as a lifecycle outcome, not a propagated failure: it is
    /// what triggers the reconnect policy.
    #[error("connection closed unexpectedly: {reason}")]
    UnexpectedClose {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Reason, if known.
        reason: String,
    },

    /// The reconnect policy's retry budget ran out.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u32,
    },
}

impl ClientError {
    /// Create a connect failure.
    pub fn connect_failed(reason: impl Into<String>) -> Self {
        Self::ConnectFailed(reason.into())
    }

    /// Create an unexpected close.
    pub fn unexpected_close(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::UnexpectedClose {
            code,
            reason: reason.into(),
        }
    }

    /// Whether this error should feed the reconnect policy rather than
    /// abort the consumer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_) | Self::UnexpectedClose { .. }
        )
    }
}

impl From<tungstenite::Error> for ClientError {
    fn from(e: tungstenite::Error) -> Self {
        Self::ConnectFailed(e.to_string())
    }
}
