//! HTTP and WebSocket handlers.

pub mod admin;
pub mod chat;
mod connection;
pub mod music;

pub use admin::{get_banned_words, get_playback, put_banned_words, recent_chat};
pub use chat::chat_socket;
pub use connection::WRITER_DRAIN_TIMEOUT;
pub use music::music_socket;
