//! Administrative HTTP endpoints.
//!
//! - `GET /v1/admin/banned-words` - current banned-word list
//! - `PUT /v1/admin/banned-words` - replace the list wholesale
//! - `GET /v1/admin/chat/recent?limit=N` - recent chat history
//! - `GET /v1/playback` - latest playback position

use crate::errors::RoomError;
use crate::models::{BannedWords, PlaybackPush, RecentChatQuery, RecentChatResponse};
use crate::observability::metrics::record_store_failure;
use crate::routes::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use std::sync::Arc;
use tracing::{info, instrument};

/// Entries returned when `limit` is omitted.
pub const DEFAULT_RECENT_LIMIT: usize = 50;

/// Largest `limit` honored.
pub const MAX_RECENT_LIMIT: usize = 500;

/// Handler for `GET /v1/admin/banned-words`.
#[instrument(skip_all, name = "room.admin.get_banned_words")]
pub async fn get_banned_words(State(state): State<Arc<AppState>>) -> Json<BannedWords> {
    Json(BannedWords {
        words: state.relay.filter().banned_words(),
    })
}

/// Handler for `PUT /v1/admin/banned-words`.
///
/// Replaces the whole list and returns it as installed (trimmed, empty
/// entries removed, duplicates collapsed case-insensitively).
#[instrument(skip_all, name = "room.admin.put_banned_words")]
pub async fn put_banned_words(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BannedWords>, JsonRejection>,
) -> Result<Json<BannedWords>, RoomError> {
    let Json(request) = payload.map_err(|e| RoomError::BadRequest(e.body_text()))?;

    let words = state.relay.filter().replace_policy(&request.words);
    info!(
        target: "room.admin",
        requested = request.words.len(),
        installed = words.len(),
        "Banned-word list replaced"
    );
    Ok(Json(BannedWords { words }))
}

/// Handler for `GET /v1/admin/chat/recent`.
#[instrument(skip_all, name = "room.admin.recent_chat")]
pub async fn recent_chat(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RecentChatQuery>, QueryRejection>,
) -> Result<Json<RecentChatResponse>, RoomError> {
    let Query(query) = query.map_err(|e| RoomError::BadRequest(e.body_text()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(MAX_RECENT_LIMIT);

    let messages = state.store.fetch_recent(limit).await.map_err(|e| {
        record_store_failure("fetch_recent");
        RoomError::from(e)
    })?;
    Ok(Json(RecentChatResponse { messages }))
}

/// Handler for `GET /v1/playback`.
pub async fn get_playback(State(state): State<Arc<AppState>>) -> Json<PlaybackPush> {
    Json(PlaybackPush::from(&*state.playback.borrow()))
}
