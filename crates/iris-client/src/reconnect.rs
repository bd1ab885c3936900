//! Reconnection driver.
//!
//! The relay server never resurrects a connection: when a session drops,
//! it is the consumer's job to establish a brand-new one, which arrives
//! at the server with a brand-new identity. [`Reconnector`] runs that
//! policy: a deliberate local close ends the session for good, an
//! unexpected close schedules a fresh attempt after the policy's delay.

use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::backoff::{ExponentialBackoff, RetryPolicy};
use crate::error::{ClientError, ClientResult};
use crate::url::RelayUrl;

/// How a session ended, from the consumer's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The consumer closed the session on purpose. No reconnect.
    Deliberate,
    /// The session dropped without a deliberate close.
    Unexpected {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Reason, if known.
        reason: String,
    },
}

/// The transport seam: something that can produce a fresh session.
///
/// Each call must establish a completely new session; the relay assigns
/// it a new identity and has no memory of any prior one.
pub trait Connect {
    /// The established session type.
    type Session;

    /// Make one connection attempt.
    fn connect(
        &mut self,
    ) -> impl std::future::Future<Output = ClientResult<Self::Session>> + Send;
}

/// Dials a relay URL with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: RelayUrl,
}

impl WsConnector {
    /// Create a connector for a validated relay URL.
    pub fn new(url: RelayUrl) -> Self {
        Self { url }
    }

    /// The endpoint this connector dials.
    pub fn url(&self) -> &RelayUrl {
        &self.url
    }
}

impl Connect for WsConnector {
    type Session = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn connect(&mut self) -> ClientResult<Self::Session> {
        let (stream, response) = tokio_tungstenite::connect_async(self.url.to_string()).await?;
        debug!(url = %self.url, status = %response.status(), "relay handshake complete");
        Ok(stream)
    }
}

/// Re-establishes dropped sessions according to a [`RetryPolicy`].
pub struct Reconnector<C, P = ExponentialBackoff> {
    connector: C,
    policy: P,
}

impl<C: Connect> Reconnector<C, ExponentialBackoff> {
    /// Create a reconnector with the default back-off policy.
    pub fn new(connector: C) -> Self {
        Self::with_policy(connector, ExponentialBackoff::default())
    }
}

impl<C, P> Reconnector<C, P>
where
    C: Connect,
    P: RetryPolicy,
{
    /// Create a reconnector with an explicit policy.
    pub fn with_policy(connector: C, policy: P) -> Self {
        Self { connector, policy }
    }

    /// The policy in use.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Establish a session, retrying per the policy until one succeeds
    /// or the retry budget runs out.
    ///
    /// A success resets the policy's schedule.
    pub async fn establish(&mut self) -> ClientResult<C::Session> {
        loop {
            match self.connector.connect().await {
                Ok(session) => {
                    self.policy.reset();
                    info!("session established");
                    return Ok(session);
                }
                Err(e) if e.is_retryable() && self.policy.should_retry() => {
                    let delay = self.policy.next_delay();
                    warn!(error = %e, delay = ?delay, "connect failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(ClientError::RetriesExhausted {
                        attempts: self.policy.attempts(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// React to a finished session.
    ///
    /// A deliberate close yields `Ok(None)`. An unexpected close waits
    /// the policy's delay and establishes a brand-new session (new
    /// connection, new identity).
    pub async fn resume_after(&mut self, end: SessionEnd) -> ClientResult<Option<C::Session>> {
        match end {
            SessionEnd::Deliberate => {
                debug!("session closed deliberately, not reconnecting");
                Ok(None)
            }
            SessionEnd::Unexpected { code, reason } => {
                if !self.policy.should_retry() {
                    return Err(ClientError::RetriesExhausted {
                        attempts: self.policy.attempts(),
                    });
                }
                let delay = self.policy.next_delay();
                warn!(
                    code = ?code,
                    reason = %reason,
                    delay = ?delay,
                    "unexpected close, scheduling reconnect"
                );
                tokio::time::sleep(delay).await;
                self.establish().await.map(Some)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FixedDelay;
    use std::time::Duration;

    /// Fails a fixed number of times, then succeeds with an attempt count.
    struct Flaky {
        failures_left: u32,
        attempts: u32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: failures,
                attempts: 0,
            }
        }
    }

    impl Connect for Flaky {
        type Session = u32;

        async fn connect(&mut self) -> ClientResult<u32> {
            self.attempts += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(ClientError::connect_failed("refused"));
            }
            Ok(self.attempts)
        }
    }

    /// Always refuses.
    struct Dead;

    impl Connect for Dead {
        type Session = ();

        async fn connect(&mut self) -> ClientResult<()> {
            Err(ClientError::connect_failed("refused"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn establish_retries_until_success() {
        let policy = ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            2.0,
            10,
        );
        let mut reconnector = Reconnector::with_policy(Flaky::new(3), policy);
        let session = reconnector.establish().await.unwrap();
        assert_eq!(session, 4);
        // Success resets the schedule.
        assert_eq!(reconnector.policy().attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn establish_exhausts_retry_budget() {
        let policy =
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(100), 2.0, 3);
        let mut reconnector = Reconnector::with_policy(Dead, policy);
        let err = reconnector.establish().await.unwrap_err();
        assert!(matches!(err, ClientError::RetriesExhausted { attempts: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn deliberate_close_never_reconnects() {
        let mut reconnector = Reconnector::with_policy(Flaky::new(0), FixedDelay::default());
        let resumed = reconnector.resume_after(SessionEnd::Deliberate).await.unwrap();
        assert!(resumed.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_establishes_fresh_session() {
        let mut reconnector = Reconnector::with_policy(
            Flaky::new(0),
            FixedDelay::new(Duration::from_secs(1)),
        );
        let resumed = reconnector
            .resume_after(SessionEnd::Unexpected {
                code: Some(1006),
                reason: "network dropped".into(),
            })
            .await
            .unwrap();
        assert_eq!(resumed, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_keeps_retrying() {
        let mut reconnector = Reconnector::with_policy(
            Flaky::new(5),
            FixedDelay::new(Duration::from_secs(1)),
        );
        let session = reconnector.establish().await.unwrap();
        assert_eq!(session, 6);
    }
}
