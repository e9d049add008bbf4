// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for follower-gated text routing.
//!
//! Runs the relay in-process over TCP and drives it with `RelayClient`:
//! - A follower's message reaches the followed user and is logged
//! - A message against the follow direction is dropped but still logged
//! - Disconnecting removes the user from the registry
//! - Fan-out to every session, unfollow, denial notices, protocol errors

use std::sync::Arc;
use std::time::Duration;

use parley_proto::codec;
use parley_relay::client::RelayClient;
use parley_relay::config::RelayConfig;
use parley_relay::router::DenialPolicy;
use parley_relay::server::{self, RelayServer, RelayState};
use parley_relay::store::Stores;
use parley_relay::transform::{BodyTransform, TransformError};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

fn test_config() -> RelayConfig {
    RelayConfig {
        files_dir: std::env::temp_dir().join(format!("parley-it-{}", uuid::Uuid::now_v7())),
        ..RelayConfig::default()
    }
}

fn test_stores() -> Stores {
    let stores = Stores::in_memory().unwrap();
    for name in ["alice", "bob", "carol"] {
        stores.users.register(name, "secret").unwrap();
    }
    stores
}

/// Start the relay in-process on an OS-assigned port.
async fn start_relay(stores: Stores, config: &RelayConfig) -> RelayServer {
    let state = Arc::new(RelayState::new(stores, config));
    server::start_server("127.0.0.1:0", state)
        .await
        .expect("failed to start relay server")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(RECV_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Connect, identify, and wait until the server has registered the session.
async fn connect_as(server: &RelayServer, username: &str) -> RelayClient {
    let before = server.state().registry().find_by_username(username).len();
    let mut client = RelayClient::connect(server.local_addr()).await.unwrap();
    client.send_handshake(username).await.unwrap();
    wait_until(|| server.state().registry().find_by_username(username).len() > before).await;
    client
}

async fn recv(client: &mut RelayClient) -> String {
    tokio::time::timeout(RECV_TIMEOUT, client.receive_frame())
        .await
        .expect("recv timed out")
        .unwrap()
        .expect("connection closed")
}

async fn assert_nothing_received(client: &mut RelayClient) {
    let result = tokio::time::timeout(QUIET_PERIOD, client.receive_frame()).await;
    assert!(result.is_err(), "unexpected delivery: {result:?}");
}

fn cleanup(config: &RelayConfig) {
    let _ = std::fs::remove_dir_all(&config.files_dir);
}

// =============================================================================
// Core scenarios
// =============================================================================

#[tokio::test]
async fn follower_message_is_delivered_and_logged() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let server = start_relay(stores.clone(), &config).await;

    let mut alice = connect_as(&server, "alice").await;
    let mut bob = connect_as(&server, "bob").await;

    alice.send_text("alice", "bob", "hi").await.unwrap();
    assert_eq!(recv(&mut bob).await, "alice: hi");

    let rows = stores.messages.between("alice", "bob").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        (rows[0].sender.as_str(), rows[0].recipient.as_str(), rows[0].body.as_str()),
        ("alice", "bob", "hi")
    );

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn message_against_follow_direction_is_dropped_but_logged() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let server = start_relay(stores.clone(), &config).await;

    let mut alice = connect_as(&server, "alice").await;
    let mut bob = connect_as(&server, "bob").await;

    bob.send_text("bob", "alice", "yo").await.unwrap();
    wait_until(|| stores.messages.count().unwrap() == 1).await;
    assert_nothing_received(&mut alice).await;

    let rows = stores.messages.between("bob", "alice").unwrap();
    assert_eq!(rows[0].sender, "bob");
    assert_eq!(rows[0].body, "yo");

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn disconnected_user_only_gets_logged_messages() {
    let stores = test_stores();
    stores.follows.follow("bob", "alice").unwrap();
    let config = test_config();
    let server = start_relay(stores.clone(), &config).await;

    let alice = connect_as(&server, "alice").await;
    let mut bob = connect_as(&server, "bob").await;

    drop(alice);
    wait_until(|| server.state().registry().find_by_username("alice").is_empty()).await;

    bob.send_text("bob", "alice", "are you there?").await.unwrap();
    wait_until(|| stores.messages.count().unwrap() == 1).await;

    // Reconnecting does not replay anything.
    let mut alice = connect_as(&server, "alice").await;
    assert_nothing_received(&mut alice).await;

    server.shutdown().await;
    cleanup(&config);
}

// =============================================================================
// Delivery properties
// =============================================================================

#[tokio::test]
async fn every_session_of_the_recipient_receives() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let server = start_relay(stores, &config).await;

    let mut alice = connect_as(&server, "alice").await;
    let mut bob_laptop = connect_as(&server, "bob").await;
    let mut bob_phone = connect_as(&server, "bob").await;

    alice.send_text("alice", "bob", "both of you").await.unwrap();
    assert_eq!(recv(&mut bob_laptop).await, "alice: both of you");
    assert_eq!(recv(&mut bob_phone).await, "alice: both of you");

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn unfollow_stops_delivery() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let server = start_relay(stores.clone(), &config).await;

    let mut alice = connect_as(&server, "alice").await;
    let mut bob = connect_as(&server, "bob").await;

    alice.send_text("alice", "bob", "first").await.unwrap();
    assert_eq!(recv(&mut bob).await, "alice: first");

    stores.follows.unfollow("alice", "bob").unwrap();
    stores.follows.unfollow("alice", "bob").unwrap();

    alice.send_text("alice", "bob", "second").await.unwrap();
    wait_until(|| stores.messages.count().unwrap() == 2).await;
    assert_nothing_received(&mut bob).await;

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let server = start_relay(stores, &config).await;

    let mut alice = connect_as(&server, "alice").await;
    let mut bob = connect_as(&server, "bob").await;

    for i in 0..20 {
        alice
            .send_text("alice", "bob", &format!("message {i}"))
            .await
            .unwrap();
    }
    for i in 0..20 {
        assert_eq!(recv(&mut bob).await, format!("alice: message {i}"));
    }

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn body_delimiters_survive_the_round_trip() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let server = start_relay(stores, &config).await;

    let mut alice = connect_as(&server, "alice").await;
    let mut bob = connect_as(&server, "bob").await;

    alice.send_text("alice", "bob", "a|b: c|").await.unwrap();
    assert_eq!(recv(&mut bob).await, "alice: a|b: c|");

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn notify_policy_tells_the_sender() {
    let stores = test_stores();
    let config = RelayConfig {
        denial_policy: DenialPolicy::Notify,
        ..test_config()
    };
    let server = start_relay(stores, &config).await;

    let mut alice = connect_as(&server, "alice").await;
    let mut bob = connect_as(&server, "bob").await;

    bob.send_text("bob", "alice", "hello?").await.unwrap();
    assert_eq!(
        recv(&mut bob).await,
        "server: message to alice was not delivered"
    );
    assert_nothing_received(&mut alice).await;

    server.shutdown().await;
    cleanup(&config);
}

// =============================================================================
// Protocol enforcement
// =============================================================================

#[tokio::test]
async fn spoofed_sender_is_routed_as_identified_user() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let server = start_relay(stores.clone(), &config).await;

    let mut carol = connect_as(&server, "carol").await;
    let mut bob = connect_as(&server, "bob").await;

    // Carol claims to be alice, who is allowed to write to bob.
    carol.send_text("alice", "bob", "trust me").await.unwrap();
    wait_until(|| stores.messages.count().unwrap() == 1).await;
    assert_nothing_received(&mut bob).await;

    let rows = stores.messages.between("carol", "bob").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].sender, "carol");

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn oversized_frame_closes_only_the_offender() {
    let stores = test_stores();
    stores.follows.follow("carol", "bob").unwrap();
    let config = RelayConfig {
        max_frame_size: 64,
        ..test_config()
    };
    let server = start_relay(stores, &config).await;

    let mut alice = connect_as(&server, "alice").await;
    let mut bob = connect_as(&server, "bob").await;
    let mut carol = connect_as(&server, "carol").await;

    alice
        .send_text("alice", "bob", &"x".repeat(200))
        .await
        .unwrap();
    let closed = tokio::time::timeout(RECV_TIMEOUT, alice.receive_frame())
        .await
        .expect("offender was not disconnected");
    assert!(matches!(closed, Ok(None) | Err(_)));
    wait_until(|| server.state().registry().find_by_username("alice").is_empty()).await;

    carol.send_text("carol", "bob", "still here").await.unwrap();
    assert_eq!(recv(&mut bob).await, "carol: still here");

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn malformed_record_closes_the_connection() {
    let stores = test_stores();
    let config = test_config();
    let server = start_relay(stores.clone(), &config).await;

    let mut stream = tokio::net::TcpStream::connect(server.local_addr())
        .await
        .unwrap();
    codec::write_frame(&mut stream, b"alice").await.unwrap();
    wait_until(|| !server.state().registry().is_empty()).await;

    // A text record needs three fields.
    codec::write_frame(&mut stream, b"alice|bob").await.unwrap();
    let closed = tokio::time::timeout(RECV_TIMEOUT, codec::read_frame(&mut stream, 1024))
        .await
        .expect("connection was not closed");
    assert!(matches!(closed, Ok(None) | Err(_)));
    wait_until(|| server.state().registry().is_empty()).await;
    assert_eq!(stores.messages.count().unwrap(), 0);

    server.shutdown().await;
    cleanup(&config);
}

// =============================================================================
// Body transform
// =============================================================================

/// Logs bodies reversed and delivers them upper-cased.
struct Rewriting;

impl BodyTransform for Rewriting {
    fn for_log(&self, body: &str) -> Result<String, TransformError> {
        Ok(body.chars().rev().collect())
    }

    fn for_delivery(&self, body: &str) -> Result<String, TransformError> {
        Ok(body.to_uppercase())
    }
}

#[tokio::test]
async fn body_transform_applies_to_log_and_delivery() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let state = Arc::new(RelayState::with_transform(
        stores.clone(),
        &config,
        Arc::new(Rewriting),
    ));
    let server = server::start_server("127.0.0.1:0", state).await.unwrap();

    let mut alice = connect_as(&server, "alice").await;
    let mut bob = connect_as(&server, "bob").await;

    alice.send_text("alice", "bob", "hello").await.unwrap();
    assert_eq!(recv(&mut bob).await, "alice: HELLO");
    assert_eq!(stores.messages.between("alice", "bob").unwrap()[0].body, "olleh");

    server.shutdown().await;
    cleanup(&config);
}
