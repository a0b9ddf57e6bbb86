//! HTTP routes for the listening room.
//!
//! Defines the Axum router and application state.

use crate::clock::PlaybackState;
use crate::handlers;
use crate::registry::ConnectionRegistry;
use crate::relay::RelayOrchestrator;
use crate::store::ChatStore;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Subscribers of both channels.
    pub registry: Arc<ConnectionRegistry>,

    /// Chat pipeline; also owns the moderation filter.
    pub relay: RelayOrchestrator,

    /// Chat history collaborator.
    pub store: Arc<dyn ChatStore>,

    /// Latest position published by the clock task.
    pub playback: watch::Receiver<PlaybackState>,

    /// Parent of every connection token; cancelled on shutdown.
    pub shutdown_token: CancellationToken,

    /// Outbound mailbox size per subscriber.
    pub subscriber_buffer: usize,
}

/// Build the application routes.
///
/// - `/ws/music` - playback push socket
/// - `/ws/chat` - chat socket
/// - `/v1/playback` - current playback position
/// - `/v1/admin/banned-words` - read or replace the banned-word list
/// - `/v1/admin/chat/recent` - recent chat history
/// - TraceLayer for request logging
/// - Permissive CORS when `cors_allow_any_origin` is set
pub fn build_routes(state: Arc<AppState>, cors_allow_any_origin: bool) -> Router {
    let router = Router::new()
        .route("/ws/music", get(handlers::music_socket))
        .route("/ws/chat", get(handlers::chat_socket))
        .route("/v1/playback", get(handlers::get_playback))
        .route(
            "/v1/admin/banned-words",
            get(handlers::get_banned_words).put(handlers::put_banned_words),
        )
        .route("/v1/admin/chat/recent", get(handlers::recent_chat))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_allow_any_origin {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
