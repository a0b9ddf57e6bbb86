//! Listening Room configuration.
//!
//! Configuration is loaded from environment variables. Values that are
//! present but malformed are rejected rather than silently defaulted.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket + admin API bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default fixed per-track duration in seconds.
pub const DEFAULT_TRACK_DURATION_SECONDS: u64 = 180;

/// Default token that routes a chat message through the external agent.
pub const DEFAULT_AGENT_TRIGGER: &str = "@agent";

/// Default bound on one agent round trip (connect + reply).
pub const DEFAULT_AGENT_TIMEOUT_MS: u64 = 10_000;

/// Default number of messages retained by the in-memory chat store.
pub const DEFAULT_CHAT_HISTORY_CAPACITY: usize = 500;

/// Default per-subscriber outbound mailbox size.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Default wait for space in a full subscriber mailbox.
pub const DEFAULT_DELIVERY_GRACE_MS: u64 = 250;

/// Playlist served when `ROOM_PLAYLIST` is not set.
pub const DEFAULT_PLAYLIST: &[&str] = &[
    "/media/01.%20Ma%20Holo.mp3",
    "/media/02.%20Beat%20Cop.mp3",
    "/media/03.%20The%20Stakeout%20%28feat.%20W.%20Giacchi%29.mp3",
    "/media/04.%20Conga%20Mind.mp3",
    "/media/05.%20Deep%20Cover.mp3",
    "/media/06.%20High%20Slide.mp3",
    "/media/07.%20The%20Stakeout_%20Reprise%20%28feat.%20W.%20Giacchi%29.mp3",
    "/media/08.%20Dimension%20Alley.mp3",
    "/media/09.%20Holodeck%20Blues.mp3",
];

/// Listening Room configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket + admin API bind address (default: "0.0.0.0:8000").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Ordered track locators. Never empty.
    pub playlist: Vec<String>,

    /// Fixed duration applied to every track, in seconds. Always > 0.
    pub track_duration_seconds: u64,

    /// Banned words active at startup.
    pub banned_words: Vec<String>,

    /// `host:port` of the external agent. `None` disables relaying.
    pub agent_address: Option<String>,

    /// Case-insensitive token that triggers an agent round trip.
    pub agent_trigger: String,

    /// Bound on one agent round trip, in milliseconds.
    pub agent_timeout_ms: u64,

    /// Capacity of the in-memory chat store.
    pub chat_history_capacity: usize,

    /// Per-subscriber outbound mailbox size.
    pub subscriber_buffer: usize,

    /// How long a broadcast waits on a full mailbox before removing the
    /// subscriber, in milliseconds.
    pub delivery_grace_ms: u64,

    /// Whether the app router allows any CORS origin.
    pub cors_allow_any_origin: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("ROOM_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("ROOM_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let playlist = match vars.get("ROOM_PLAYLIST") {
            Some(raw) => split_list(raw),
            None => DEFAULT_PLAYLIST.iter().map(|s| (*s).to_string()).collect(),
        };
        if playlist.is_empty() {
            return Err(ConfigError::InvalidValue(
                "ROOM_PLAYLIST must contain at least one track".to_string(),
            ));
        }

        let track_duration_seconds = parse_var(
            vars,
            "ROOM_TRACK_DURATION_SECONDS",
            DEFAULT_TRACK_DURATION_SECONDS,
        )?;
        if track_duration_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "ROOM_TRACK_DURATION_SECONDS must be greater than zero".to_string(),
            ));
        }

        let banned_words = vars
            .get("ROOM_BANNED_WORDS")
            .map(|raw| split_list(raw))
            .unwrap_or_default();

        let agent_address = vars
            .get("ROOM_AGENT_ADDRESS")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let agent_trigger = vars
            .get("ROOM_AGENT_TRIGGER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_AGENT_TRIGGER.to_string());
        if agent_trigger.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "ROOM_AGENT_TRIGGER must not be empty".to_string(),
            ));
        }

        let agent_timeout_ms = parse_var(vars, "ROOM_AGENT_TIMEOUT_MS", DEFAULT_AGENT_TIMEOUT_MS)?;
        if agent_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "ROOM_AGENT_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        let chat_history_capacity = parse_var(
            vars,
            "ROOM_CHAT_HISTORY_CAPACITY",
            DEFAULT_CHAT_HISTORY_CAPACITY,
        )?;

        let subscriber_buffer =
            parse_var(vars, "ROOM_SUBSCRIBER_BUFFER", DEFAULT_SUBSCRIBER_BUFFER)?;
        if subscriber_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "ROOM_SUBSCRIBER_BUFFER must be greater than zero".to_string(),
            ));
        }

        let delivery_grace_ms =
            parse_var(vars, "ROOM_DELIVERY_GRACE_MS", DEFAULT_DELIVERY_GRACE_MS)?;
        if delivery_grace_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "ROOM_DELIVERY_GRACE_MS must be greater than zero".to_string(),
            ));
        }

        let cors_allow_any_origin = parse_var(vars, "ROOM_CORS_ALLOW_ANY_ORIGIN", true)?;

        Ok(Config {
            bind_address,
            health_bind_address,
            playlist,
            track_duration_seconds,
            banned_words,
            agent_address,
            agent_trigger,
            agent_timeout_ms,
            chat_history_capacity,
            subscriber_buffer,
            delivery_grace_ms,
            cors_allow_any_origin,
        })
    }

    /// Fixed per-track duration.
    #[must_use]
    pub fn track_duration(&self) -> Duration {
        Duration::from_secs(self.track_duration_seconds)
    }

    /// Bound on one agent round trip.
    #[must_use]
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    /// Wait for space in a full subscriber mailbox.
    #[must_use]
    pub fn delivery_grace(&self) -> Duration {
        Duration::from_millis(self.delivery_grace_ms)
    }
}

/// Parse an optional variable, falling back to `default` when absent.
fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}

/// Split a comma-separated list, dropping blank entries.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
