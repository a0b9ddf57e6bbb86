//! WebSocket tests through the real router and upgrade handshake.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use room_service::registry::Channel;
use room_test_utils::{wait_for_subscribers, TestRoomServer, WsTestClient};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_music_upgrade_delivers_current_position() -> Result<(), anyhow::Error> {
    let server =
        TestRoomServer::spawn_with(&[("ROOM_PLAYLIST", "/one.mp3,/two.mp3")], None).await?;

    let mut listener = WsTestClient::connect(server.addr(), "/ws/music").await?;

    let frame = listener.next_json(WAIT).await.unwrap();
    assert_eq!(frame["type"], "music");
    assert_eq!(frame["url"], "/one.mp3");
    wait_for_subscribers(server.state(), Channel::Music, 1, WAIT).await;
    Ok(())
}

#[tokio::test]
async fn test_chat_upgrade_relays_between_clients() -> Result<(), anyhow::Error> {
    let server = TestRoomServer::spawn_with(&[("ROOM_BANNED_WORDS", "spam")], None).await?;

    let mut alice = WsTestClient::connect(server.addr(), "/ws/chat").await?;
    let mut bob = WsTestClient::connect(server.addr(), "/ws/chat").await?;
    wait_for_subscribers(server.state(), Channel::Chat, 2, WAIT).await;

    alice.send_json(&json!({"username": "alice", "text": "spam spam"})).await?;
    alice.send_json(&json!({"username": "alice", "text": "hi bob"})).await?;

    let expected = json!({"type": "chat", "username": "alice", "text": "hi bob"});
    assert_eq!(bob.next_json(WAIT).await, Some(expected.clone()));
    assert_eq!(alice.next_json(WAIT).await, Some(expected));
    Ok(())
}

#[tokio::test]
async fn test_dropped_socket_is_unregistered() -> Result<(), anyhow::Error> {
    let server = TestRoomServer::spawn().await?;

    let client = WsTestClient::connect(server.addr(), "/ws/chat").await?;
    wait_for_subscribers(server.state(), Channel::Chat, 1, WAIT).await;

    drop(client);

    wait_for_subscribers(server.state(), Channel::Chat, 0, WAIT).await;
    Ok(())
}

#[tokio::test]
async fn test_upgrade_on_unknown_path_is_refused() -> Result<(), anyhow::Error> {
    let server = TestRoomServer::spawn().await?;

    let result = WsTestClient::connect(server.addr(), "/ws/news").await;

    assert!(result.is_err());
    Ok(())
}
