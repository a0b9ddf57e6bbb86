//! `GET /ws/chat`: bidirectional chat channel.
//!
//! Inbound frames are JSON `{"username"?: string, "text": string}`
//! (`"message"` is accepted for `"text"`). Frames that do not parse are
//! logged and skipped; the connection stays open.

use super::connection::{release, spawn_writer};
use crate::models::{ChatMessage, InboundChat};
use crate::registry::{Channel, Subscriber};
use crate::relay::RelaySession;
use crate::routes::AppState;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{Sink, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Upgrade to a chat socket.
pub async fn chat_socket(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        serve_chat(sink, stream, state).await;
    })
}

/// Run one chat connection.
///
/// Outbound frames are written by a separate task, so a slow agent round
/// trip on this connection never stalls its own mailbox. On exit the
/// subscriber is unregistered and the agent session closed.
#[instrument(skip_all, name = "room.ws.chat")]
pub async fn serve_chat<Si, St>(sink: Si, mut stream: St, state: Arc<AppState>)
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    let cancel_token = state.shutdown_token.child_token();
    let (subscriber, mailbox) =
        Subscriber::new(Channel::Chat, state.subscriber_buffer, cancel_token.clone());
    let registration = state.registry.enroll(subscriber);
    let connection_id = registration.subscriber().connection_id().to_string();
    info!(target: "room.ws.chat", connection_id = %connection_id, "Chat client connected");

    let writer = spawn_writer(sink, mailbox, cancel_token.clone());
    let mut relay_session = RelaySession::new(connection_id.clone());

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let Some(message) = parse_inbound(&text, &connection_id) else {
                        continue;
                    };
                    tokio::select! {
                        () = cancel_token.cancelled() => break,
                        _ = state.relay.handle(&mut relay_session, message) => {}
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!(target: "room.ws.chat", connection_id = %connection_id, bytes = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(target: "room.ws.chat", connection_id = %connection_id, error = %e, "Socket read failed");
                    break;
                }
            }
        }
    }

    relay_session.close().await;
    release(registration, cancel_token, writer).await;
    info!(target: "room.ws.chat", connection_id = %connection_id, "Chat client disconnected");
}

fn parse_inbound(text: &str, connection_id: &str) -> Option<ChatMessage> {
    match serde_json::from_str::<InboundChat>(text) {
        Ok(inbound) => {
            let message = inbound.into_message();
            if message.is_none() {
                debug!(target: "room.ws.chat", connection_id = %connection_id, "Skipping non-chat or empty frame");
            }
            message
        }
        Err(e) => {
            warn!(
                target: "room.ws.chat",
                connection_id = %connection_id,
                frame_len = text.len(),
                error = %e,
                "Malformed chat frame"
            );
            None
        }
    }
}
