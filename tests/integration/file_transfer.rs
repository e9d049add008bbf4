// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for file transfers through the relay.
//!
//! - A permitted transfer lands in the files directory as `received_<name>`
//! - A denied transfer is consumed without being stored, and the next frame
//!   on the same connection is still routed
//! - Client-supplied paths are reduced to their final component
//! - An oversized announcement closes the connection

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parley_relay::client::RelayClient;
use parley_relay::config::RelayConfig;
use parley_relay::server::{self, RelayServer, RelayState};
use parley_relay::store::Stores;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> RelayConfig {
    RelayConfig {
        files_dir: std::env::temp_dir().join(format!("parley-files-it-{}", uuid::Uuid::now_v7())),
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

async fn wait_for_contents(path: &Path, expected: &[u8]) {
    wait_until(|| std::fs::read(path).is_ok_and(|data| data == expected)).await;
}

fn files_in(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn cleanup(config: &RelayConfig) {
    let _ = std::fs::remove_dir_all(&config.files_dir);
}

#[tokio::test]
async fn permitted_file_is_stored_with_received_prefix() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let server = start_relay(stores, &config).await;

    let mut alice = connect_as(&server, "alice").await;
    alice
        .send_file("alice", "bob", "notes.txt", b"meeting at noon")
        .await
        .unwrap();

    wait_for_contents(&config.files_dir.join("received_notes.txt"), b"meeting at noon").await;
    assert_eq!(files_in(&config.files_dir), vec!["received_notes.txt"]);

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn denied_file_is_discarded_and_stream_stays_aligned() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let server = start_relay(stores, &config).await;

    let mut alice = connect_as(&server, "alice").await;
    let mut bob = connect_as(&server, "bob").await;

    // alice does not follow carol. The payload looks like frames on purpose.
    let mut payload = 9u32.to_le_bytes().to_vec();
    payload.extend_from_slice(b"alice|bob|smuggled");
    alice
        .send_file("alice", "carol", "secret.bin", &payload)
        .await
        .unwrap();
    alice.send_text("alice", "bob", "after").await.unwrap();

    assert_eq!(recv(&mut bob).await, "alice: after");
    assert!(files_in(&config.files_dir).is_empty());

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn binary_payload_is_stored_verbatim_and_next_frame_routes() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let server = start_relay(stores, &config).await;

    let mut alice = connect_as(&server, "alice").await;
    let mut bob = connect_as(&server, "bob").await;

    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    alice
        .send_file("alice", "bob", "blob.bin", &payload)
        .await
        .unwrap();
    alice.send_text("alice", "bob", "sent you a file").await.unwrap();

    assert_eq!(recv(&mut bob).await, "alice: sent you a file");
    wait_for_contents(&config.files_dir.join("received_blob.bin"), &payload).await;

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn directory_components_in_filename_are_stripped() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = test_config();
    let server = start_relay(stores, &config).await;

    let mut alice = connect_as(&server, "alice").await;
    alice
        .send_file("alice", "bob", "../../escape.txt", b"nope")
        .await
        .unwrap();

    wait_for_contents(&config.files_dir.join("received_escape.txt"), b"nope").await;
    assert_eq!(files_in(&config.files_dir), vec!["received_escape.txt"]);

    server.shutdown().await;
    cleanup(&config);
}

#[tokio::test]
async fn oversized_file_closes_the_connection() {
    let stores = test_stores();
    stores.follows.follow("alice", "bob").unwrap();
    let config = RelayConfig {
        max_file_size: 8,
        ..test_config()
    };
    let server = start_relay(stores, &config).await;

    let mut alice = connect_as(&server, "alice").await;
    // The server may hang up before the payload is written.
    let _ = alice.send_file("alice", "bob", "big.bin", &[7u8; 32]).await;

    let closed = tokio::time::timeout(RECV_TIMEOUT, alice.receive_frame())
        .await
        .expect("connection was not closed");
    assert!(matches!(closed, Ok(None) | Err(_)));
    wait_until(|| server.state().registry().is_empty()).await;
    assert!(files_in(&config.files_dir).is_empty());

    server.shutdown().await;
    cleanup(&config);
}
