//! End-to-end smart-socket tests over real TCP.

mod common;

use std::time::Duration;

use common::{start_server, TestClient};
use tokio::net::TcpStream;

#[tokio::test]
async fn version_request_returns_hex_version() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.request("host:version").await;
    assert_eq!(client.read_status().await, "OKAY");
    assert_eq!(client.read_hex_block().await, b"0029");

    // Server closes after the response.
    assert!(client.read_to_end().await.is_empty());
    server.shutdown.trigger();
}

#[tokio::test]
async fn unknown_service_fails_with_exact_message() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.request("host:foo").await;
    assert_eq!(client.read_status().await, "FAIL");
    assert_eq!(client.read_hex_block().await, b"unsupported operation");
    assert!(client.read_to_end().await.is_empty());
    server.shutdown.trigger();
}

#[tokio::test]
async fn keep_alive_allows_followup_request() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.request("host:transport-any").await;
    assert_eq!(client.read_status().await, "OKAY");

    // Same connection serves the next request.
    client.request("host:version").await;
    assert_eq!(client.read_status().await, "OKAY");
    assert_eq!(client.read_hex_block().await, b"0029");
    server.shutdown.trigger();
}

#[tokio::test]
async fn version_is_idempotent_across_requests() {
    let server = start_server().await;

    let mut first = Vec::new();
    for _ in 0..3 {
        let mut client = TestClient::connect(server.addr).await;
        client.request("host:version").await;
        assert_eq!(client.read_status().await, "OKAY");
        let body = client.read_hex_block().await;
        if first.is_empty() {
            first = body;
        } else {
            assert_eq!(body, first);
        }
    }
    server.shutdown.trigger();
}

#[tokio::test]
async fn tport_any_emits_raw_transport_id_then_serves_follow_up() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.request("host:tport:any").await;
    assert_eq!(client.read_status().await, "OKAY");
    assert_eq!(client.read_exact_bytes(8).await, 1u64.to_le_bytes());

    client.request("shell:echo tport").await;
    assert_eq!(client.read_status().await, "OKAY");
    assert_eq!(client.read_to_end().await, b"tport\n");
    server.shutdown.trigger();
}

#[tokio::test]
async fn devices_listing_has_serial_and_state() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.request("host:devices").await;
    assert_eq!(client.read_status().await, "OKAY");
    let body = String::from_utf8(client.read_hex_block().await).unwrap();
    assert_eq!(body, "radb-5554\tdevice\n");
    server.shutdown.trigger();
}

#[tokio::test]
async fn kill_acknowledges_and_stops_the_listener() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.request("host:kill").await;
    assert_eq!(client.read_status().await, "OKAY");
    assert!(client.read_to_end().await.is_empty());

    // The accept loop must wind down promptly...
    tokio::time::timeout(Duration::from_millis(500), server.task)
        .await
        .expect("server should stop after host:kill")
        .unwrap();

    // ...and new connections must be refused.
    assert!(TcpStream::connect(server.addr).await.is_err());
}

#[tokio::test]
async fn oversized_declared_length_is_not_possible_but_max_is_accepted() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    // 65535 bytes of payload is the framing maximum; it routes (and fails
    // as unknown) rather than breaking the framing layer.
    let service = "x".repeat(0xFFFF);
    client.request(&service).await;
    assert_eq!(client.read_status().await, "FAIL");
    assert_eq!(client.read_hex_block().await, b"unsupported operation");
    server.shutdown.trigger();
}

#[tokio::test]
async fn malformed_length_prefix_fails_and_closes() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.send_raw(b"xyzyhost:version").await;
    assert_eq!(client.read_status().await, "FAIL");
    assert_eq!(client.read_hex_block().await, b"malformed length");
    assert!(client.read_to_end().await.is_empty());
    server.shutdown.trigger();
}
