//! Pieces shared by the music and chat socket tasks.

use crate::registry::{Frame, Registration};
use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long teardown waits for the writer before aborting it.
pub const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Spawn the task that drains a subscriber mailbox into the socket.
///
/// A failed socket write cancels `cancel_token`, which ends the reader too.
pub(crate) fn spawn_writer<S>(
    mut sink: S,
    mut mailbox: mpsc::Receiver<Frame>,
    cancel_token: CancellationToken,
) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                frame = mailbox.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                        debug!(target: "room.ws", error = %e, "Socket write failed, closing connection");
                        cancel_token.cancel();
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    })
}

/// Release everything a connection task holds.
///
/// Dropping the registration unregisters the subscriber and cancels the
/// connection token; the writer then gets a short window to finish.
pub(crate) async fn release(
    registration: Registration,
    cancel_token: CancellationToken,
    mut writer: JoinHandle<()>,
) {
    drop(registration);
    cancel_token.cancel();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}
