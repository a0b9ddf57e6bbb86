//! `GET /ws/music`: push-only playback channel.

use super::connection::{release, spawn_writer};
use crate::models::{OutboundMessage, PlaybackPush};
use crate::registry::{Channel, Frame, Subscriber};
use crate::routes::AppState;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{Sink, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Upgrade to a music socket.
pub async fn music_socket(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        serve_music(sink, stream, state).await;
    })
}

/// Run one music connection until the client leaves, delivery fails, or
/// the service shuts down.
///
/// The listener gets the current position immediately, then every tick.
/// Anything the client sends is ignored except a close.
#[instrument(skip_all, name = "room.ws.music")]
pub async fn serve_music<Si, St>(sink: Si, mut stream: St, state: Arc<AppState>)
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    let cancel_token = state.shutdown_token.child_token();
    let (subscriber, mailbox) =
        Subscriber::new(Channel::Music, state.subscriber_buffer, cancel_token.clone());

    let current = OutboundMessage::Music(PlaybackPush::from(&*state.playback.borrow()));
    match serde_json::to_string(&current) {
        Ok(text) => {
            if let Err(e) = subscriber.try_deliver(Frame::from(text)) {
                debug!(
                    target: "room.ws.music",
                    connection_id = %subscriber.connection_id(),
                    error = %e,
                    "Failed to queue current position for new listener"
                );
            }
        }
        Err(e) => {
            debug!(target: "room.ws.music", error = %e, "Failed to serialize current position");
        }
    }

    let registration = state.registry.enroll(subscriber);
    let connection_id = registration.subscriber().connection_id().to_string();
    info!(target: "room.ws.music", connection_id = %connection_id, "Listener connected");

    let writer = spawn_writer(sink, mailbox, cancel_token.clone());

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(target: "room.ws.music", connection_id = %connection_id, error = %e, "Socket read failed");
                    break;
                }
            }
        }
    }

    release(registration, cancel_token, writer).await;
    info!(target: "room.ws.music", connection_id = %connection_id, "Listener disconnected");
}
