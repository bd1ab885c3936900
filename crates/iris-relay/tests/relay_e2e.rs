//! End-to-end relay tests over in-memory duplex transports.
//!
//! Each test wires real `WebSocketStream`s (client role on one end of a
//! `tokio::io::duplex`, the relay serving the other end) and exercises
//! the full path: registration, broadcast fan-out, the closing
//! handshake, and unexpected-closure reporting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio_tungstenite::WebSocketStream;
use tungstenite::protocol::Role;

use iris_relay::{
    handshake, CloseCode, EventSink, Message, Registry, Relay, RelayConfig, RelayEvent,
};

/// Collects relay events for assertions.
#[derive(Debug, Default)]
struct RecordingSink {
    events: Mutex<Vec<RelayEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<RelayEvent> {
        self.events.lock().clone()
    }

    fn unexpected_closes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, RelayEvent::Closed { unexpected: true, .. }))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: RelayEvent) {
        self.events.lock().push(event);
    }
}

fn test_relay(config: RelayConfig) -> (Arc<Relay>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let registry = Registry::new(config.max_connections);
    let relay = Arc::new(Relay::new(
        registry,
        Arc::clone(&sink) as Arc<dyn EventSink>,
        config,
    ));
    (relay, sink)
}

/// Connect one client: the relay serves the far end of a duplex pipe.
async fn connect(relay: &Arc<Relay>) -> WebSocketStream<DuplexStream> {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server_ws = handshake::complete(server_io, relay.config())
        .await
        .expect("server handshake");
    let serving = Arc::clone(relay);
    tokio::spawn(async move {
        let _ = serving.serve(server_ws).await;
    });
    WebSocketStream::from_raw_socket(client_io, Role::Client, None).await
}

/// Wait until the registry reaches `expected` members (bounded).
async fn wait_for_members(relay: &Relay, expected: usize) {
    for _ in 0..100 {
        if relay.registry().len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "registry never reached {} members (has {})",
        expected,
        relay.registry().len()
    );
}

#[tokio::test]
async fn broadcast_reaches_every_member_including_sender() {
    let (relay, _sink) = test_relay(RelayConfig::default());
    let mut alice = connect(&relay).await;
    let mut bob = connect(&relay).await;
    wait_for_members(&relay, 2).await;

    alice
        .send(tungstenite::Message::text("hello room"))
        .await
        .unwrap();

    let to_bob = bob.next().await.unwrap().unwrap();
    assert_eq!(Message::from(to_bob).as_text(), Some("hello room"));

    // Reference behavior: the sender hears its own broadcast.
    let echo = alice.next().await.unwrap().unwrap();
    assert_eq!(Message::from(echo).as_text(), Some("hello room"));
}

#[tokio::test]
async fn exclude_sender_flag_suppresses_echo() {
    let (relay, _sink) = test_relay(RelayConfig::default().include_sender(false));
    let mut alice = connect(&relay).await;
    let mut bob = connect(&relay).await;
    wait_for_members(&relay, 2).await;

    alice.send(tungstenite::Message::text("m")).await.unwrap();
    let to_bob = bob.next().await.unwrap().unwrap();
    assert_eq!(Message::from(to_bob).as_text(), Some("m"));

    // Bob's reply arriving proves the relay processed further traffic
    // without ever echoing "m" back to Alice.
    bob.send(tungstenite::Message::text("reply")).await.unwrap();
    let to_alice = alice.next().await.unwrap().unwrap();
    assert_eq!(Message::from(to_alice).as_text(), Some("reply"));
}

#[tokio::test]
async fn per_source_order_preserved_across_fanout() {
    let (relay, _sink) = test_relay(RelayConfig::default());
    let mut alice = connect(&relay).await;
    let mut bob = connect(&relay).await;
    wait_for_members(&relay, 2).await;

    for i in 0..10 {
        alice
            .send(tungstenite::Message::text(format!("m{i}")))
            .await
            .unwrap();
    }

    for i in 0..10 {
        let msg = bob.next().await.unwrap().unwrap();
        assert_eq!(Message::from(msg).as_text(), Some(format!("m{i}").as_str()));
    }
}

#[tokio::test]
async fn peer_initiated_close_completes_handshake_and_deregisters() {
    let (relay, sink) = test_relay(RelayConfig::default());
    let mut alice = connect(&relay).await;
    wait_for_members(&relay, 1).await;

    alice
        .send(tungstenite::Message::Close(Some(
            tungstenite::protocol::CloseFrame {
                code: tungstenite::protocol::frame::coding::CloseCode::Normal,
                reason: "bye".into(),
            },
        )))
        .await
        .unwrap();

    // The server acknowledges with its own close frame, and the stream
    // then ends cleanly rather than resetting.
    let ack = alice.next().await.unwrap().unwrap();
    assert!(Message::from(ack).is_close());
    assert!(alice.next().await.is_none());

    wait_for_members(&relay, 0).await;
    let closed_events: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, RelayEvent::Closed { .. }))
        .collect();
    assert_eq!(closed_events.len(), 1);
    assert!(matches!(
        closed_events[0],
        RelayEvent::Closed {
            unexpected: false,
            code: Some(1000),
            ..
        }
    ));
}

#[tokio::test]
async fn abrupt_disconnect_reports_unexpected_close() {
    let (relay, sink) = test_relay(RelayConfig::default());
    let alice = connect(&relay).await;
    wait_for_members(&relay, 1).await;

    drop(alice);

    wait_for_members(&relay, 0).await;
    for _ in 0..100 {
        if sink.unexpected_closes() == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("unexpected close never recorded: {:?}", sink.events());
}

#[tokio::test]
async fn unacknowledged_close_is_forced_at_timeout() {
    let close_timeout = Duration::from_millis(200);
    let (relay, _sink) = test_relay(RelayConfig::default().close_timeout(close_timeout));
    let alice = connect(&relay).await;
    wait_for_members(&relay, 1).await;

    let id = relay.registry().connection_ids()[0];
    let started = Instant::now();
    relay.close(id, CloseCode::Normal, "server says bye").unwrap();

    // Alice never reads, so the close is never acknowledged.
    wait_for_members(&relay, 0).await;
    assert!(started.elapsed() >= close_timeout);
    assert!(!relay.registry().contains(id));
    drop(alice);
}

#[tokio::test]
async fn chattering_peer_cannot_postpone_forced_close() {
    let close_timeout = Duration::from_millis(200);
    let (relay, _sink) = test_relay(RelayConfig::default().close_timeout(close_timeout));
    let mut alice = connect(&relay).await;
    wait_for_members(&relay, 1).await;

    let id = relay.registry().connection_ids()[0];
    let started = Instant::now();
    relay.close(id, CloseCode::Normal, "server says bye").unwrap();

    // Alice keeps sending data but never acknowledges the close; the
    // traffic must not push the forced-closure deadline back.
    while relay.registry().contains(id) {
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "close deadline kept moving with inbound traffic"
        );
        let _ = alice.send(tungstenite::Message::text("still talking")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(started.elapsed() >= close_timeout);
    assert!(!relay.registry().contains(id));
}

#[tokio::test]
async fn dead_member_does_not_block_delivery_to_the_rest() {
    let (relay, sink) = test_relay(RelayConfig::default());
    let mut alice = connect(&relay).await;
    let bob = connect(&relay).await;
    let mut carol = connect(&relay).await;
    wait_for_members(&relay, 3).await;

    // Bob vanishes; depending on timing the relay may or may not have
    // deregistered him when Alice's message fans out.
    drop(bob);
    alice
        .send(tungstenite::Message::text("still here?"))
        .await
        .unwrap();

    let to_carol = carol.next().await.unwrap().unwrap();
    assert_eq!(Message::from(to_carol).as_text(), Some("still here?"));
    let echo = alice.next().await.unwrap().unwrap();
    assert_eq!(Message::from(echo).as_text(), Some("still here?"));

    // At most one failure record for the vanished member, never more.
    let failures = sink
        .events()
        .iter()
        .filter(|e| matches!(e, RelayEvent::DeliveryFailed { .. }))
        .count();
    assert!(failures <= 1, "one dead target, at most one record");
}

#[tokio::test]
async fn rejected_upgrade_never_touches_the_registry() {
    let (relay, sink) = test_relay(RelayConfig::default());

    let request = http::Request::builder()
        .header(http::header::CONNECTION, "Upgrade")
        .header(http::header::UPGRADE, "websocket")
        .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
        .header("Sec-WebSocket-Version", "7")
        .body(())
        .unwrap();

    let outcome = relay.upgrade(&request, &[]);
    assert!(!outcome.accepted);
    assert_eq!(outcome.response.status(), http::StatusCode::BAD_REQUEST);
    assert!(relay.registry().is_empty());
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, RelayEvent::HandshakeRejected { .. })));
}

#[tokio::test]
async fn late_joiner_misses_earlier_broadcasts() {
    let (relay, _sink) = test_relay(RelayConfig::default());
    let mut alice = connect(&relay).await;
    let mut bob = connect(&relay).await;
    wait_for_members(&relay, 2).await;

    alice.send(tungstenite::Message::text("early")).await.unwrap();
    let first = bob.next().await.unwrap().unwrap();
    assert_eq!(Message::from(first).as_text(), Some("early"));

    let mut carol = connect(&relay).await;
    wait_for_members(&relay, 3).await;

    alice.send(tungstenite::Message::text("later")).await.unwrap();
    let to_carol = carol.next().await.unwrap().unwrap();
    assert_eq!(Message::from(to_carol).as_text(), Some("later"));
}
