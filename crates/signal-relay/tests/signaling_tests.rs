//! End-to-end tests for the signaling endpoint.
//!
//! Each test spawns a real relay on 127.0.0.1:0 with an in-memory bus and
//! talks to it over WebSocket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use relay_test_utils::*;
use serde_json::json;
use std::time::Duration;

const SILENCE: Duration = Duration::from_millis(200);

fn host_token() -> String {
    TestTokenBuilder::new().for_user("device-42").sign()
}

fn admin_token() -> String {
    TestTokenBuilder::new().for_user("1").admin().sign()
}

#[tokio::test]
async fn test_offer_and_answer_exchange() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut host = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    let mut viewer = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    server.wait_for_connections(2).await?;

    send_json(&mut viewer, &json!({"type": "offer", "sdp": "A"})).await?;
    assert_eq!(recv_json(&mut host).await?, json!({"type": "offer", "sdp": "A"}));

    send_json(&mut host, &json!({"type": "answer", "sdp": "B"})).await?;
    // The viewer's own offer was published first; receiving the answer first
    // shows the offer was not echoed back.
    assert_eq!(recv_json(&mut viewer).await?, json!({"type": "answer", "sdp": "B"}));

    Ok(())
}

#[tokio::test]
async fn test_ice_candidate_fields_are_forwarded_verbatim() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut host = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    let mut viewer = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    server.wait_for_connections(2).await?;

    let candidate = json!({
        "type": "ice_candidate",
        "candidate": "candidate:1 1 UDP 2122252543 192.0.2.10 49152 typ host",
        "sdpMid": "0",
        "sdpMLineIndex": 0
    });
    send_json(&mut host, &candidate).await?;

    assert_eq!(recv_json(&mut viewer).await?, candidate);
    expect_silence(&mut host, SILENCE).await?;

    Ok(())
}

#[tokio::test]
async fn test_sender_field_never_reaches_clients() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut host = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    let mut viewer = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    server.wait_for_connections(2).await?;

    // A client cannot spoof the tag either; the relay overwrites it.
    send_json(&mut viewer, &json!({"type": "offer", "sdp": "A", "_sender": "spoofed"})).await?;

    let received = recv_json(&mut host).await?;
    assert!(received.get("_sender").is_none());
    assert_eq!(received["sdp"], "A");

    Ok(())
}

#[tokio::test]
async fn test_late_host_receives_cached_offer() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut viewer = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    server.wait_for_connections(1).await?;
    send_json(&mut viewer, &json!({"type": "offer", "sdp": "A"})).await?;

    wait_until(|| {
        server
            .registry()
            .snapshot("r1")
            .is_some_and(|room| room.cached_offer.is_some())
    })
    .await?;

    let mut host = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    assert_eq!(recv_json(&mut host).await?, json!({"type": "offer", "sdp": "A"}));

    Ok(())
}

#[tokio::test]
async fn test_late_viewer_receives_cached_offer() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut host = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    server.wait_for_connections(1).await?;
    send_json(&mut host, &json!({"type": "offer", "sdp": "H"})).await?;

    wait_until(|| {
        server
            .registry()
            .snapshot("r1")
            .is_some_and(|room| room.cached_offer.is_some())
    })
    .await?;

    let mut viewer = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    assert_eq!(recv_json(&mut viewer).await?, json!({"type": "offer", "sdp": "H"}));

    Ok(())
}

#[tokio::test]
async fn test_viewer_offer_is_replayed_to_later_viewer() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut first = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    server.wait_for_connections(1).await?;
    send_json(&mut first, &json!({"type": "offer", "sdp": "V1"})).await?;

    wait_until(|| {
        server
            .registry()
            .snapshot("r1")
            .is_some_and(|room| room.cached_offer.is_some())
    })
    .await?;

    // Replay matches live fan-out: every member but the sender sees the offer.
    let mut second = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    assert_eq!(recv_json(&mut second).await?, json!({"type": "offer", "sdp": "V1"}));
    expect_silence(&mut first, SILENCE).await?;

    Ok(())
}

#[tokio::test]
async fn test_reconnecting_host_gets_no_stale_offer() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut host = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    let mut viewer = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    server.wait_for_connections(2).await?;

    send_json(&mut viewer, &json!({"type": "offer", "sdp": "A"})).await?;
    recv_json(&mut host).await?;

    close(host).await;
    server.wait_for_connections(1).await?;
    let room = server.registry().snapshot("r1").expect("viewer keeps the room");
    assert!(room.host.is_none());
    assert!(room.cached_offer.is_none());

    let mut host = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    server.wait_for_connections(2).await?;
    expect_silence(&mut host, SILENCE).await?;

    Ok(())
}

#[tokio::test]
async fn test_second_host_evicts_first() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut first = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    server.wait_for_connections(1).await?;

    let mut second = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    assert_eq!(expect_close(&mut first).await?, Some(1000));

    // The evicted host's cleanup must not clear its successor.
    server.wait_for_connections(1).await?;
    let room = server.registry().snapshot("r1").expect("room survives takeover");
    assert!(room.host.is_some());

    let mut viewer = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    server.wait_for_connections(2).await?;
    send_json(&mut viewer, &json!({"type": "offer", "sdp": "A"})).await?;
    assert_eq!(recv_json(&mut second).await?, json!({"type": "offer", "sdp": "A"}));

    Ok(())
}

#[tokio::test]
async fn test_multiple_viewers_coexist() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut host = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    let mut v1 = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    let mut v2 = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    server.wait_for_connections(3).await?;

    send_json(&mut v1, &json!({"type": "ice_candidate", "candidate": "c1"})).await?;

    assert_eq!(recv_json(&mut host).await?["candidate"], "c1");
    assert_eq!(recv_json(&mut v2).await?["candidate"], "c1");
    expect_silence(&mut v1, SILENCE).await?;

    Ok(())
}

#[tokio::test]
async fn test_rooms_are_isolated() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut host_a = connect(&server.signaling_url("host", "room-a", &host_token())).await?;
    let mut host_b = connect(&server.signaling_url("host", "room-b", &host_token())).await?;
    let mut viewer_a = connect(&server.signaling_url("viewer", "room-a", &admin_token())).await?;
    server.wait_for_connections(3).await?;

    send_json(&mut viewer_a, &json!({"type": "offer", "sdp": "A"})).await?;

    assert_eq!(recv_json(&mut host_a).await?["sdp"], "A");
    expect_silence(&mut host_b, SILENCE).await?;

    Ok(())
}

#[tokio::test]
async fn test_malformed_messages_keep_connection_open() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut host = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    let mut viewer = connect(&server.signaling_url("viewer", "r1", &admin_token())).await?;
    server.wait_for_connections(2).await?;

    send_text(&mut host, "not json").await?;
    send_text(&mut host, "[1,2,3]").await?;
    send_json(&mut host, &json!({"type": "chat", "text": "ignored"})).await?;
    send_json(&mut host, &json!({"type": "answer", "sdp": "B"})).await?;

    assert_eq!(recv_json(&mut viewer).await?, json!({"type": "answer", "sdp": "B"}));
    assert_eq!(server.registry().connection_count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_repeated_attach_detach_leaves_no_rooms() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    for round in 0..5 {
        let room = format!("cycle-{round}");
        let host = connect(&server.signaling_url("host", &room, &host_token())).await?;
        let viewer = connect(&server.signaling_url("viewer", &room, &admin_token())).await?;
        server.wait_for_connections(2).await?;

        close(viewer).await;
        close(host).await;
        server.wait_for_connections(0).await?;
    }

    assert_eq!(server.registry().room_count(), 0);
    assert!(server.registry().room_ids().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_abrupt_disconnect_detaches() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let host = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    server.wait_for_connections(1).await?;

    // Drop the TCP stream without a close handshake.
    drop(host);

    server.wait_for_connections(0).await?;
    assert_eq!(server.registry().room_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_open_sockets() -> Result<(), anyhow::Error> {
    let server = TestRelayServer::spawn().await?;

    let mut host = connect(&server.signaling_url("host", "r1", &host_token())).await?;
    server.wait_for_connections(1).await?;

    server.shutdown().await;

    assert_eq!(expect_close(&mut host).await?, Some(1001));
    Ok(())
}
