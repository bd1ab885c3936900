//! Relay URL handling.
//!
//! Two schemes address a relay: `ws` over plaintext and `wss` over an
//! encrypted transport. A consumer running in a secure context must use
//! `wss`; mixed-security connections are rejected before any dial.

use std::fmt;
use std::str::FromStr;

use http::Uri;

use crate::error::{ClientError, ClientResult};

/// A validated relay endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayUrl {
    uri: Uri,
}

impl RelayUrl {
    /// Parse and validate a relay URL.
    ///
    /// Only the `ws` and `wss` schemes are accepted, and a host is
    /// required.
    pub fn parse(input: &str) -> ClientResult<Self> {
        let uri: Uri = input
            .parse()
            .map_err(|e: http::uri::InvalidUri| ClientError::InvalidUrl(e.to_string()))?;

        match uri.scheme_str() {
            Some("ws" | "wss") => {}
            Some(other) => {
                return Err(ClientError::UnsupportedScheme {
                    scheme: other.to_string(),
                })
            }
            None => return Err(ClientError::InvalidUrl("missing scheme".to_string())),
        }

        if uri.host().is_none() {
            return Err(ClientError::InvalidUrl("missing host".to_string()));
        }

        Ok(Self { uri })
    }

    /// Whether this URL uses the encrypted scheme.
    pub fn is_secure(&self) -> bool {
        self.uri.scheme_str() == Some("wss")
    }

    /// The host component.
    pub fn host(&self) -> &str {
        // Checked during parse.
        self.uri.host().unwrap_or_default()
    }

    /// The port, falling back to the scheme default (80/443).
    pub fn port(&self) -> u16 {
        self.uri
            .port_u16()
            .unwrap_or(if self.is_secure() { 443 } else { 80 })
    }

    /// Reject mixed-security use: a secure context may only dial `wss`.
    pub fn validate_for_context(&self, secure_context: bool) -> ClientResult<()> {
        if secure_context && !self.is_secure() {
            return Err(ClientError::MixedSecurity);
        }
        Ok(())
    }

    /// The underlying URI.
    pub fn as_uri(&self) -> &Uri {
        &self.uri
    }
}

impl FromStr for RelayUrl {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}
