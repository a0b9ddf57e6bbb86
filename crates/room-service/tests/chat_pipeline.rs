//! End-to-end tests for the chat channel.
//!
//! Drives `serve_chat` over in-memory sockets to verify:
//! - Fan-out of permitted messages to every chat client
//! - Silent drop of blocked messages
//! - Agent reply ordering and failure handling
//! - Teardown of the subscriber and agent session on every exit path

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use room_service::handlers::chat::serve_chat;
use room_service::registry::Channel;
use room_service::room::{Collaborators, Room};
use room_service::routes::AppState;
use room_test_utils::{
    socket_pair, test_config, wait_for_subscribers, MockAgent, RecordingStore, TestClient,
};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(100);

fn chat_room(
    vars: &[(&str, &str)],
    agent: Option<&MockAgent>,
    store: Arc<RecordingStore>,
) -> Arc<AppState> {
    let config = test_config(vars).unwrap();
    let collaborators = Collaborators {
        store,
        agent: agent.map(MockAgent::connector),
    };
    let room = Room::build(&config, collaborators, CancellationToken::new()).unwrap();
    Arc::clone(room.state())
}

fn connect(state: &Arc<AppState>) -> (TestClient, JoinHandle<()>) {
    connect_buffered(state, 64)
}

fn connect_buffered(state: &Arc<AppState>, buffer: usize) -> (TestClient, JoinHandle<()>) {
    let (sink, stream, client) = socket_pair(buffer);
    let handle = tokio::spawn(serve_chat(sink, stream, Arc::clone(state)));
    (client, handle)
}

fn texts(frames: &[serde_json::Value]) -> Vec<(String, String)> {
    frames
        .iter()
        .map(|f| {
            (
                f["username"].as_str().unwrap().to_string(),
                f["text"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

// ============================================================================
// Fan-out and moderation
// ============================================================================

#[tokio::test]
async fn test_message_reaches_every_chat_client() {
    let state = chat_room(&[], None, Arc::new(RecordingStore::new()));
    let (alice, _a) = connect(&state);
    let (mut bob, _b) = connect(&state);
    let (mut carol, _c) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 3, WAIT).await;

    alice.send_json(&json!({"username": "alice", "text": "hello room"}));

    let expected = json!({"type": "chat", "username": "alice", "text": "hello room"});
    assert_eq!(bob.next_json(WAIT).await, Some(expected.clone()));
    assert_eq!(carol.next_json(WAIT).await, Some(expected));
}

#[tokio::test]
async fn test_sender_receives_own_message_with_default_username() {
    let state = chat_room(&[], None, Arc::new(RecordingStore::new()));
    let (mut client, _h) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 1, WAIT).await;

    client.send_json(&json!({"message": "legacy field"}));

    let frame = client.next_json(WAIT).await.unwrap();
    assert_eq!(frame["username"], "Anonymous");
    assert_eq!(frame["text"], "legacy field");
}

#[tokio::test]
async fn test_blocked_messages_are_dropped_silently() {
    let state = chat_room(
        &[("ROOM_BANNED_WORDS", "spam")],
        None,
        Arc::new(RecordingStore::new()),
    );
    let (sender, _s) = connect(&state);
    let (mut listener, _l) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 2, WAIT).await;

    sender.send_json(&json!({"text": "buy SPAM now"}));
    sender.send_json(&json!({"text": "check http://x.com"}));
    sender.send_json(&json!({"text": "hello"}));

    let frames = listener.drain_json(QUIET).await;
    assert_eq!(texts(&frames), vec![("Anonymous".to_string(), "hello".to_string())]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_from_one_client_keeps_readers_connected() {
    let state = chat_room(&[], None, Arc::new(RecordingStore::new()));
    let (sender, _s) = connect_buffered(&state, 1024);
    let (mut reader, _r) = connect_buffered(&state, 1024);
    wait_for_subscribers(&state, Channel::Chat, 2, WAIT).await;

    // Far more than one mailbox holds, sent without pause
    for i in 0..200 {
        sender.send_json(&json!({"text": format!("m{i}")}));
    }

    let mut received = Vec::new();
    while received.len() < 200 {
        match reader.next_json(WAIT).await {
            Some(frame) => received.push(frame["text"].as_str().unwrap().to_string()),
            None => break,
        }
    }

    assert_eq!(received.len(), 200);
    assert_eq!(received.first().map(String::as_str), Some("m0"));
    assert_eq!(received.last().map(String::as_str), Some("m199"));
    assert_eq!(state.registry.subscriber_count(Channel::Chat), 2);
}

#[tokio::test]
async fn test_malformed_frames_do_not_close_connection() {
    let state = chat_room(&[], None, Arc::new(RecordingStore::new()));
    let (mut client, _h) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 1, WAIT).await;

    client.send_text("{not json");
    client.send_json(&json!({"type": "typing"}));
    client.send_json(&json!({"text": "still here"}));

    let frame = client.next_json(WAIT).await.unwrap();
    assert_eq!(frame["text"], "still here");
    assert_eq!(state.registry.subscriber_count(Channel::Chat), 1);
}

#[tokio::test]
async fn test_policy_replacement_applies_to_next_message() {
    let state = chat_room(&[], None, Arc::new(RecordingStore::new()));
    let (mut client, _h) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 1, WAIT).await;

    client.send_json(&json!({"text": "rutabaga"}));
    assert!(client.next_json(WAIT).await.is_some());

    state.relay.filter().replace_policy(["Rutabaga"]);
    client.send_json(&json!({"text": "RUTABAGA again"}));
    client.send_json(&json!({"text": "fine"}));

    let frames = client.drain_json(QUIET).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames.first().unwrap()["text"], "fine");
}

// ============================================================================
// Agent relay
// ============================================================================

#[tokio::test]
async fn test_agent_reply_precedes_original() {
    let agent = MockAgent::echoing();
    let state = chat_room(&[], Some(&agent), Arc::new(RecordingStore::new()));
    let (asker, _a) = connect(&state);
    let (mut listener, _l) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 2, WAIT).await;

    asker.send_json(&json!({"username": "ana", "text": "@Agent what is playing?"}));

    let frames = listener.drain_json(QUIET).await;
    assert_eq!(
        texts(&frames),
        vec![
            ("Agent".to_string(), "echo: @Agent what is playing?".to_string()),
            ("ana".to_string(), "@Agent what is playing?".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_untriggered_message_skips_agent() {
    let agent = MockAgent::echoing();
    let state = chat_room(&[], Some(&agent), Arc::new(RecordingStore::new()));
    let (mut client, _h) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 1, WAIT).await;

    client.send_json(&json!({"text": "just chatting"}));

    let frames = client.drain_json(QUIET).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(agent.connect_count(), 0);
}

#[tokio::test]
async fn test_failing_agent_still_delivers_original() {
    let agent = MockAgent::failing();
    let state = chat_room(&[], Some(&agent), Arc::new(RecordingStore::new()));
    let (mut client, _h) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 1, WAIT).await;

    client.send_json(&json!({"text": "@agent hello?"}));

    let frames = client.drain_json(QUIET).await;
    assert_eq!(
        texts(&frames),
        vec![("Anonymous".to_string(), "@agent hello?".to_string())]
    );
    assert_eq!(agent.exchange_count(), 1);
}

#[tokio::test]
async fn test_refused_agent_still_delivers_original() {
    let agent = MockAgent::refusing();
    let state = chat_room(&[], Some(&agent), Arc::new(RecordingStore::new()));
    let (mut client, _h) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 1, WAIT).await;

    client.send_json(&json!({"text": "@agent anyone?"}));
    client.send_json(&json!({"text": "@agent retry"}));

    let frames = client.drain_json(QUIET).await;
    assert_eq!(frames.len(), 2);
    // A failed connect is retried on the next trigger
    assert_eq!(agent.connect_count(), 2);
}

#[tokio::test]
async fn test_hanging_agent_times_out() {
    let agent = MockAgent::hanging();
    let state = chat_room(
        &[("ROOM_AGENT_TIMEOUT_MS", "50")],
        Some(&agent),
        Arc::new(RecordingStore::new()),
    );
    let (mut client, _h) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 1, WAIT).await;

    client.send_json(&json!({"text": "@agent are you there"}));

    let frame = client.next_json(WAIT).await.unwrap();
    assert_eq!(frame["username"], "Anonymous");
    assert_eq!(frame["text"], "@agent are you there");
    assert!(client.next_json(QUIET).await.is_none());
}

#[tokio::test]
async fn test_agent_session_closed_on_disconnect() {
    let agent = MockAgent::replying("hi");
    let state = chat_room(&[], Some(&agent), Arc::new(RecordingStore::new()));
    let (mut client, handle) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 1, WAIT).await;

    client.send_json(&json!({"text": "@agent hi"}));
    client.send_json(&json!({"text": "@agent again"}));
    assert_eq!(client.drain_json(QUIET).await.len(), 4);
    assert_eq!(agent.connect_count(), 1, "session should be reused");

    client.send_close();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();

    assert_eq!(agent.close_count(), 1);
    assert_eq!(state.registry.subscriber_count(Channel::Chat), 0);
}

// ============================================================================
// Store and teardown
// ============================================================================

#[tokio::test]
async fn test_delivered_messages_are_stored_in_order() {
    let agent = MockAgent::replying("sure");
    let store = Arc::new(RecordingStore::new());
    let state = chat_room(&[], Some(&agent), Arc::clone(&store));
    let (client, _h) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 1, WAIT).await;

    client.send_json(&json!({"username": "bo", "text": "@agent play more"}));

    let stored = store.wait_for(2, WAIT).await;
    let mut pairs: Vec<_> = stored
        .iter()
        .map(|m| (m.username.as_str(), m.text.as_str()))
        .collect();
    // Inserts run on separate tasks and may land in either order
    pairs.sort_unstable();
    assert_eq!(pairs, vec![("Agent", "sure"), ("bo", "@agent play more")]);
}

#[tokio::test]
async fn test_failing_store_does_not_block_delivery() {
    let state = chat_room(&[], None, Arc::new(RecordingStore::failing()));
    let (mut client, _h) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 1, WAIT).await;

    client.send_json(&json!({"text": "one"}));
    client.send_json(&json!({"text": "two"}));

    assert_eq!(client.drain_json(QUIET).await.len(), 2);
}

#[tokio::test]
async fn test_peer_vanishing_unregisters_subscriber() {
    let state = chat_room(&[], None, Arc::new(RecordingStore::new()));
    let (mut client, handle) = connect(&state);
    let (mut other, _o) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 2, WAIT).await;

    client.hang_up();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    wait_for_subscribers(&state, Channel::Chat, 1, WAIT).await;

    // The survivor is unaffected
    let (sender, _s) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 2, WAIT).await;
    sender.send_json(&json!({"text": "still on"}));
    assert_eq!(other.next_json(WAIT).await.unwrap()["text"], "still on");
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let config = test_config(&[]).unwrap();
    let token = CancellationToken::new();
    let room = Room::build(&config, Collaborators::from_config(&config), token.clone()).unwrap();
    let state = Arc::clone(room.state());

    let (mut first, h1) = connect(&state);
    let (mut second, h2) = connect(&state);
    wait_for_subscribers(&state, Channel::Chat, 2, WAIT).await;

    token.cancel();

    tokio::time::timeout(WAIT, h1).await.unwrap().unwrap();
    tokio::time::timeout(WAIT, h2).await.unwrap().unwrap();
    assert!(first.is_closed_by_server(WAIT).await);
    assert!(second.is_closed_by_server(WAIT).await);
    assert_eq!(state.registry.subscriber_count(Channel::Chat), 0);
}
