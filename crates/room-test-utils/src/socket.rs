//! In-memory stand-in for an upgraded WebSocket.
//!
//! `socket_pair` returns the two halves a socket task expects (a sink of
//! outbound messages and a stream of inbound results) plus a `TestClient`
//! holding the other ends.

use axum::extract::ws::Message;
use futures::channel::mpsc;
use futures::StreamExt;
use room_service::registry::Channel;
use room_service::routes::AppState;
use std::time::Duration;

/// Outbound half handed to the socket task.
pub type ServerSink = mpsc::Sender<Message>;

/// Inbound half handed to the socket task.
pub type ServerStream = mpsc::UnboundedReceiver<Result<Message, axum::Error>>;

/// Wait until `channel` has exactly `count` subscribers. Panics after `timeout`.
///
/// Socket tasks register asynchronously after being spawned.
pub async fn wait_for_subscribers(
    state: &AppState,
    channel: Channel,
    count: usize,
    timeout: Duration,
) {
    tokio::time::timeout(timeout, async {
        while state.registry.subscriber_count(channel) != count {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {count} {channel} subscribers, found {}",
            state.registry.subscriber_count(channel)
        )
    });
}

/// Client side of an in-memory socket.
pub struct TestClient {
    inbound: Option<mpsc::UnboundedSender<Result<Message, axum::Error>>>,
    outbound: mpsc::Receiver<Message>,
}

/// Create a connected in-memory socket whose outbound side buffers
/// `buffer` messages.
pub fn socket_pair(buffer: usize) -> (ServerSink, ServerStream, TestClient) {
    let (server_tx, client_rx) = mpsc::channel(buffer);
    let (client_tx, server_rx) = mpsc::unbounded();
    (
        server_tx,
        server_rx,
        TestClient {
            inbound: Some(client_tx),
            outbound: client_rx,
        },
    )
}

impl TestClient {
    /// Send a text frame to the server.
    pub fn send_text(&self, text: impl Into<String>) {
        if let Some(inbound) = &self.inbound {
            inbound
                .unbounded_send(Ok(Message::Text(text.into())))
                .expect("server side of the socket is gone");
        }
    }

    /// Send a JSON value as a text frame.
    pub fn send_json(&self, value: &serde_json::Value) {
        self.send_text(value.to_string());
    }

    /// Send a close frame.
    pub fn send_close(&self) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.unbounded_send(Ok(Message::Close(None)));
        }
    }

    /// End the inbound stream, as if the peer vanished without a close frame.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Next text frame parsed as JSON, or `None` if nothing arrives within
    /// `timeout` or the server closed the socket.
    pub async fn next_json(&mut self, timeout: Duration) -> Option<serde_json::Value> {
        loop {
            match tokio::time::timeout(timeout, self.outbound.next()).await {
                Ok(Some(Message::Text(text))) => {
                    return Some(serde_json::from_str(&text).expect("server sent invalid JSON"));
                }
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Collect JSON frames until none arrives within `quiet`.
    pub async fn drain_json(&mut self, quiet: Duration) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_json(quiet).await {
            frames.push(frame);
        }
        frames
    }

    /// Whether the server closed its outbound side.
    pub async fn is_closed_by_server(&mut self, timeout: Duration) -> bool {
        loop {
            match tokio::time::timeout(timeout, self.outbound.next()).await {
                Ok(None) => return true,
                Ok(Some(_)) => continue,
                Err(_) => return false,
            }
        }
    }
}
