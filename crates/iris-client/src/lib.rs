//! Consumer-side policies for the iris relay.
//!
//! The relay server treats every connection as disposable: once a session
//! ends, nothing on the server will bring it back. This crate carries the
//! consumer's half of that contract:
//!
//! - **URL validation** via [`RelayUrl`], including the mixed-security
//!   rule that a secure context may only dial `wss`
//! - **Retry policies** via [`RetryPolicy`], with [`FixedDelay`] and the
//!   default capped [`ExponentialBackoff`]
//! - **Reconnection** via [`Reconnector`], which establishes brand-new
//!   sessions after unexpected closes and stays down after deliberate ones
//!
//! # Example
//!
//! ```ignore
//! use iris_client::{ExponentialBackoff, Reconnector, RelayUrl, SessionEnd, WsConnector};
//!
//! let url = RelayUrl::parse("wss://relay.example/chat")?;
//! url.validate_for_context(true)?;
//!
//! let mut reconnector = Reconnector::new(WsConnector::new(url));
//! let mut session = reconnector.establish().await?;
//!
//! loop {
//!     let end = run_session(&mut session).await;
//!     match reconnector.resume_after(end).await? {
//!         Some(fresh) => session = fresh,
//!         None => break, // deliberate close
//!     }
//! }
//! ```
//!
//! A reconnected session is a new connection with a new identity; any
//! messages broadcast while the consumer was away are gone.

pub mod backoff;
pub mod error;
pub mod reconnect;
pub mod url;

pub use backoff::{ExponentialBackoff, FixedDelay, RetryPolicy};
pub use error::{ClientError, ClientResult};
pub use reconnect::{Connect, Reconnector, SessionEnd, WsConnector};
pub use url::RelayUrl;

#[cfg(test)]
mod tests {
    #[test]
    fn exports_are_reachable() {
        use crate::{ClientError, ExponentialBackoff, FixedDelay, RelayUrl};

        let _ = RelayUrl::parse("ws://relay.example/");
        let _ = ExponentialBackoff::default();
        let _ = FixedDelay::default();
        let _ = ClientError::MixedSecurity;
    }
}
