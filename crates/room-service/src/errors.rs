//! Listening Room error types.
//!
//! `RoomError` is the HTTP-facing error for the admin API. It maps to status
//! codes via the `IntoResponse` impl. Messages returned to clients are generic;
//! the underlying cause is logged server-side.
//!
//! Component-local failures (delivery, relay, store) have their own error
//! types next to the component and never reach a client.

use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Listening Room HTTP error type.
///
/// Maps to HTTP status codes:
/// - `BadRequest`: 400 Bad Request
/// - `Store`: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Chat store error: {0}")]
    Store(String),
}

impl RoomError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            RoomError::BadRequest(_) => 400,
            RoomError::Store(_) => 500,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            RoomError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            RoomError::Store(err) => {
                tracing::error!(target: "room.store", error = %err, "Chat store operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    "Chat history is temporarily unavailable".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for RoomError {
    fn from(err: StoreError) -> Self {
        RoomError::Store(err.to_string())
    }
}
