//! Wire payloads for the WebSocket channels and the admin API.

use crate::clock::PlaybackState;
use crate::store::StoredChat;
use serde::{Deserialize, Serialize};

/// Username applied when a sender supplies none.
pub const DEFAULT_USERNAME: &str = "Anonymous";

/// Reserved username carried by agent replies. Senders cannot claim it.
pub const AGENT_USERNAME: &str = "Agent";

/// One chat line as delivered to the chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub text: String,
}

impl ChatMessage {
    /// A message from a human sender. Blank or reserved usernames become
    /// [`DEFAULT_USERNAME`].
    #[must_use]
    pub fn from_sender(username: Option<&str>, text: impl Into<String>) -> Self {
        let username = match username.map(str::trim) {
            Some(name) if !name.is_empty() && !name.eq_ignore_ascii_case(AGENT_USERNAME) => {
                name.to_string()
            }
            _ => DEFAULT_USERNAME.to_string(),
        };
        Self {
            username,
            text: text.into(),
        }
    }

    /// A reply from the external agent.
    #[must_use]
    pub fn from_agent(text: impl Into<String>) -> Self {
        Self {
            username: AGENT_USERNAME.to_string(),
            text: text.into(),
        }
    }
}

/// Playback position as pushed on the music channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackPush {
    pub track: usize,
    /// Seconds into the current track.
    pub time: f64,
    pub url: String,
}

impl From<&PlaybackState> for PlaybackPush {
    fn from(state: &PlaybackState) -> Self {
        Self {
            track: state.track_index,
            time: state.elapsed.as_secs_f64(),
            url: state.track_locator.as_str().to_string(),
        }
    }
}

/// Every message the server pushes to a socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Music(PlaybackPush),
    Chat(ChatMessage),
}

/// Chat frame received from a client.
///
/// `message` is accepted as an alias of `text`. A `type` other than `"chat"`
/// marks a frame the chat pipeline ignores.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundChat {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "message")]
    pub text: String,
}

impl InboundChat {
    /// Convert to a [`ChatMessage`], or `None` if the frame is not chat or carries no text.
    #[must_use]
    pub fn into_message(self) -> Option<ChatMessage> {
        if self.kind.as_deref().is_some_and(|kind| kind != "chat") {
            return None;
        }
        if self.text.trim().is_empty() {
            return None;
        }
        Some(ChatMessage::from_sender(self.username.as_deref(), self.text))
    }
}

/// Banned-word list, as read and written by the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedWords {
    pub words: Vec<String>,
}

/// Query for `GET /v1/admin/chat/recent`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecentChatQuery {
    pub limit: Option<usize>,
}

/// Response for `GET /v1/admin/chat/recent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentChatResponse {
    pub messages: Vec<StoredChat>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_defaults_username() {
        let inbound: InboundChat = serde_json::from_str(r#"{"text":"hello"}"#).unwrap();
        let message = inbound.into_message().unwrap();
        assert_eq!(message.username, DEFAULT_USERNAME);
        assert_eq!(message.text, "hello");
    }

    #[test]
    fn test_inbound_accepts_message_alias_and_chat_type() {
        let inbound: InboundChat =
            serde_json::from_str(r#"{"type":"chat","username":"ana","message":"yo"}"#).unwrap();
        let message = inbound.into_message().unwrap();
        assert_eq!(message.username, "ana");
        assert_eq!(message.text, "yo");
    }

    #[test]
    fn test_inbound_ignores_other_types_and_blank_text() {
        let other: InboundChat =
            serde_json::from_str(r#"{"type":"typing","text":"x"}"#).unwrap();
        assert!(other.into_message().is_none());

        let blank: InboundChat = serde_json::from_str(r#"{"text":"   "}"#).unwrap();
        assert!(blank.into_message().is_none());
    }

    #[test]
    fn test_reserved_username_cannot_be_claimed() {
        let message = ChatMessage::from_sender(Some("agent"), "I am the bot");
        assert_eq!(message.username, DEFAULT_USERNAME);

        let message = ChatMessage::from_sender(Some("  "), "blank");
        assert_eq!(message.username, DEFAULT_USERNAME);
    }

    #[test]
    fn test_outbound_shapes() {
        let chat = OutboundMessage::Chat(ChatMessage::from_agent("hi"));
        let json = serde_json::to_value(&chat).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "chat", "username": AGENT_USERNAME, "text": "hi"})
        );

        let music = OutboundMessage::Music(PlaybackPush {
            track: 2,
            time: 41.0,
            url: "/media/03.mp3".to_string(),
        });
        let json = serde_json::to_value(&music).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "music", "track": 2, "time": 41.0, "url": "/media/03.mp3"})
        );
    }
}
