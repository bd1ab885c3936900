//! RFC 6455 upgrade handshake.
//!
//! The client opens with a plain HTTP request asking to switch protocols;
//! the server answers 101 Switching Protocols with the computed accept
//! key, or rejects with 400. A rejected handshake is terminal for that
//! attempted connection: it is surfaced to the accept-path caller and
//! never retried server-side, and no registry entry is ever created.

use base64::Engine;
use http::{header, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Bytes;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, instrument};

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};

/// The GUID every server concatenates with the client key (RFC 6455 §4.2.2).
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this relay speaks.
const WEBSOCKET_VERSION: &str = "13";

fn header_value<'r, B>(request: &'r Request<B>, name: &str) -> Option<&'r str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Quick check: does this request even ask for a WebSocket upgrade?
///
/// Use this to route between plain HTTP handling and the relay accept
/// path; [`validate_upgrade`] gives the reason when a request that got
/// here is still unacceptable.
pub fn is_upgrade_request<B>(request: &Request<B>) -> bool {
    validate_upgrade(request).is_ok()
}

/// Validate an upgrade request and compute its accept key.
///
/// Checks the `Connection: Upgrade` and `Upgrade: websocket` headers,
/// the presence of `Sec-WebSocket-Key`, and protocol version 13.
#[instrument(skip(request))]
pub fn validate_upgrade<B>(request: &Request<B>) -> RelayResult<String> {
    let connection_ok = header_value(request, header::CONNECTION.as_str())
        .map(|v| v.to_lowercase().contains("upgrade"))
        .unwrap_or(false);
    if !connection_ok {
        return Err(RelayError::not_upgrade("missing Connection: Upgrade header"));
    }

    let upgrade_ok = header_value(request, header::UPGRADE.as_str())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !upgrade_ok {
        return Err(RelayError::not_upgrade("missing Upgrade: websocket header"));
    }

    let key = header_value(request, "sec-websocket-key")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RelayError::handshake_failed("missing Sec-WebSocket-Key header"))?;

    let version_ok = header_value(request, "sec-websocket-version")
        .map(|v| v == WEBSOCKET_VERSION)
        .unwrap_or(false);
    if !version_ok {
        return Err(RelayError::handshake_failed(
            "unsupported Sec-WebSocket-Version (must be 13)",
        ));
    }

    Ok(compute_accept_key(key))
}

/// Subprotocol tokens the client asked for, in request order.
pub fn requested_protocols<B>(request: &Request<B>) -> Vec<String> {
    request
        .headers()
        .get_all("sec-websocket-protocol")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(',').map(str::trim))
        .map(String::from)
        .collect()
}

fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Outcome of the upgrade exchange: the response to send back, plus
/// whether the connection may proceed.
pub struct Handshake {
    /// The HTTP response to write before any frame traffic.
    pub response: Response<Full<Bytes>>,
    /// The negotiated subprotocol, if any.
    pub protocol: Option<String>,
    /// Whether the upgrade was accepted.
    pub accepted: bool,
}

impl Handshake {
    fn accepted(accept_key: &str, protocol: Option<String>) -> Self {
        let mut builder = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket")
            .header("Sec-WebSocket-Accept", accept_key);
        if let Some(ref p) = protocol {
            builder = builder.header("Sec-WebSocket-Protocol", p.as_str());
        }
        // Static header set; construction cannot fail.
        let response = builder
            .body(Full::new(Bytes::new()))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
        Self {
            response,
            protocol,
            accepted: true,
        }
    }

    fn rejected(reason: &str) -> Self {
        let response = Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Full::new(Bytes::from(reason.to_string())))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
        Self {
            response,
            protocol: None,
            accepted: false,
        }
    }
}

/// Run the full upgrade exchange for one request.
///
/// When `required_protocols` is non-empty the client must offer at least
/// one supported token; offering none of them fails the handshake. With
/// an empty list any (or no) subprotocol is accepted without selection.
#[instrument(skip(request, required_protocols))]
pub fn upgrade<B>(request: &Request<B>, required_protocols: &[&str]) -> Handshake {
    let accept_key = match validate_upgrade(request) {
        Ok(key) => key,
        Err(e) => {
            debug!(error = %e, "upgrade rejected");
            return Handshake::rejected(&e.to_string());
        }
    };

    let protocol = if required_protocols.is_empty() {
        None
    } else {
        let offered = requested_protocols(request);
        let selected = offered
            .iter()
            .find(|p| {
                required_protocols
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(p))
            })
            .cloned();
        match selected {
            Some(p) => Some(p),
            None => {
                debug!(?offered, "no supported subprotocol offered");
                return Handshake::rejected("unsupported subprotocol");
            }
        }
    };

    Handshake::accepted(&accept_key, protocol)
}

/// Finish the upgrade by wrapping the raw stream for frame traffic.
///
/// Call after the 101 response has been written. Bounded by the
/// configured handshake timeout.
pub async fn complete<S>(stream: S, config: &RelayConfig) -> RelayResult<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ws_config = tungstenite::protocol::WebSocketConfig::default()
        .max_message_size(Some(config.max_message_size));

    timeout(
        config.handshake_timeout,
        WebSocketStream::from_raw_socket(
            stream,
            tungstenite::protocol::Role::Server,
            Some(ws_config),
        ),
    )
    .await
    .map_err(|_| RelayError::handshake_failed("handshake timed out"))
}
