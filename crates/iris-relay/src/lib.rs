//! Real-time WebSocket message relay.
//!
//! `iris-relay` accepts WebSocket connections, tracks them in a registry,
//! and fans every inbound data message out to the current membership.
//! The core pieces:
//!
//! - **Lifecycle** ([`lifecycle`]): a pure state machine for
//!   `Connecting → Open → Closing → Closed`, returning side-effect
//!   intents so transition logic is testable without a transport.
//! - **Connection** ([`connection`]): identity plus a bounded outbound
//!   queue drained by a dedicated writer task, serializing sends per
//!   connection.
//! - **Registry** ([`registry`]): the set of live connections, keyed by
//!   identity, with snapshot iteration for fan-out.
//! - **Relay** ([`relay`]): receives a message from one connection and
//!   delivers it to every target in the snapshot; a failed target is
//!   logged and skipped, never aborting the rest.
//! - **Handshake** ([`handshake`]): the RFC 6455 upgrade exchange.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use iris_relay::{handshake, Relay, RelayConfig};
//!
//! let relay = Arc::new(Relay::with_config(RelayConfig::default()));
//!
//! // In the HTTP accept path:
//! async fn accept(relay: Arc<Relay>, request: http::Request<()>, io: tokio::net::TcpStream) {
//!     let upgrade = relay.upgrade(&request, &[]);
//!     if upgrade.accepted {
//!         // ... write upgrade.response, then:
//!         if let Ok(stream) = handshake::complete(io, relay.config()).await {
//!             tokio::spawn(async move {
//!                 let _ = relay.serve(stream).await;
//!             });
//!         }
//!     }
//! }
//! ```
//!
//! # Delivery guarantees
//!
//! Messages from a single source reach every target in the order they
//! were received from that source; no ordering holds across sources.
//! Fan-out iterates a registry snapshot frozen at dispatch time, so a
//! connection that registers mid-broadcast receives nothing and one that
//! closes mid-broadcast is simply logged as a failed target.

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod handshake;
pub mod lifecycle;
pub mod message;
pub mod registry;
pub mod relay;

// Re-exports for convenience
pub use config::RelayConfig;
pub use connection::{spawn_writer, Connection, ConnectionId};
pub use error::{CloseCode, RelayError, RelayResult};
pub use events::{EventSink, RelayEvent, TracingSink};
pub use handshake::{is_upgrade_request, validate_upgrade, Handshake};
pub use lifecycle::{transition, ConnectionState, Effect, LifecycleInput, Transition};
pub use message::{CloseFrame, Envelope, Message};
pub use registry::{Registry, RegistryStats};
pub use relay::Relay;
