//! Relay configuration.

use std::time::Duration;

/// Configuration for the relay and its connections.
///
/// Built with the usual chainable setters:
///
/// ```
/// use std::time::Duration;
/// use iris_relay::RelayConfig;
///
/// let config = RelayConfig::new()
///     .close_timeout(Duration::from_secs(2))
///     .include_sender(false);
/// assert!(!config.include_sender);
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long to wait in `Closing` for the peer's close acknowledgment
    /// before forcing closure (default: 5 seconds).
    pub close_timeout: Duration,
    /// Bound on the upgrade handshake (default: 10 seconds).
    pub handshake_timeout: Duration,
    /// Capacity of each connection's outbound queue (default: 64).
    ///
    /// A full queue fails the enqueue rather than blocking fan-out.
    pub outbound_queue: usize,
    /// Whether a source receives its own broadcast (default: true,
    /// echo-server semantics).
    pub include_sender: bool,
    /// Maximum registered connections (default: 10_000).
    pub max_connections: usize,
    /// Maximum inbound message size in bytes (default: 64 MB).
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            outbound_queue: 64,
            include_sender: true,
            max_connections: 10_000,
            max_message_size: 64 * 1024 * 1024,
        }
    }
}

impl RelayConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the close acknowledgment timeout.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the per-connection outbound queue capacity.
    pub fn outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity;
        self
    }

    /// Set whether the sender is included in its own broadcast.
    pub fn include_sender(mut self, include: bool) -> Self {
        self.include_sender = include;
        self
    }

    /// Set the maximum number of registered connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the maximum inbound message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}
