//! Assembly of one listening room from configuration.
//!
//! [`Room::build`] wires the registry, fan-out, moderation, relay, and store
//! into an [`AppState`] and prepares the clock. [`Room::start`] moves the
//! clock into its task. The binary and the test harness both start here.

use crate::clock::{spawn_clock, ClockError, PlaybackClock, PlaybackState, Playlist};
use crate::config::Config;
use crate::fanout::BroadcastFanout;
use crate::moderation::{ModerationError, ModerationFilter};
use crate::registry::ConnectionRegistry;
use crate::relay::{AgentConnector, RelayOrchestrator, TcpAgentConnector};
use crate::routes::AppState;
use crate::store::{ChatStore, InMemoryChatStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid playback settings: {0}")]
    Clock(#[from] ClockError),

    #[error("invalid moderation settings: {0}")]
    Moderation(#[from] ModerationError),
}

/// External collaborators of a room.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ChatStore>,
    /// `None` disables the agent relay.
    pub agent: Option<Arc<dyn AgentConnector>>,
}

impl Collaborators {
    /// In-memory store and, when `agent_address` is set, a TCP agent.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            store: Arc::new(InMemoryChatStore::new(config.chat_history_capacity)),
            agent: config
                .agent_address
                .as_ref()
                .map(|address| Arc::new(TcpAgentConnector::new(address.clone())) as Arc<dyn AgentConnector>),
        }
    }
}

/// A built room whose clock has not started yet.
pub struct Room {
    state: Arc<AppState>,
    clock: PlaybackClock,
    fanout: BroadcastFanout,
    playback_tx: watch::Sender<PlaybackState>,
}

impl Room {
    /// Build every component. Connection and clock tasks derive their
    /// cancellation from `shutdown_token`.
    pub fn build(
        config: &Config,
        collaborators: Collaborators,
        shutdown_token: CancellationToken,
    ) -> Result<Self, StartupError> {
        let playlist = Playlist::from_locators(config.playlist.iter().cloned())?;
        let clock = PlaybackClock::new(playlist, config.track_duration())?;

        let registry = Arc::new(ConnectionRegistry::new());
        let fanout =
            BroadcastFanout::new(Arc::clone(&registry)).with_delivery_grace(config.delivery_grace());
        let filter = Arc::new(ModerationFilter::new(&config.banned_words)?);

        let mut relay = RelayOrchestrator::new(filter, fanout.clone())
            .with_store(Arc::clone(&collaborators.store));
        if let Some(connector) = collaborators.agent {
            relay = relay.with_agent(connector, &config.agent_trigger, config.agent_timeout());
        }

        let (playback_tx, playback) = watch::channel(clock.state());
        let state = Arc::new(AppState {
            registry,
            relay,
            store: collaborators.store,
            playback,
            shutdown_token,
            subscriber_buffer: config.subscriber_buffer,
        });

        info!(
            target: "room.startup",
            tracks = config.playlist.len(),
            banned_words = config.banned_words.len(),
            agent_enabled = config.agent_address.is_some(),
            "Room assembled"
        );

        Ok(Self {
            state,
            clock,
            fanout,
            playback_tx,
        })
    }

    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Replace the clock, e.g. to use a shorter tick in tests.
    #[must_use]
    pub fn with_clock(mut self, clock: PlaybackClock) -> Self {
        self.playback_tx.send_replace(clock.state());
        self.clock = clock;
        self
    }

    /// Start the clock task and return the shared state with its handle.
    pub fn start(self) -> (Arc<AppState>, JoinHandle<()>) {
        let clock_token = self.state.shutdown_token.child_token();
        let handle = spawn_clock(self.clock, self.fanout, self.playback_tx, clock_token);
        (self.state, handle)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_vars(&vars).unwrap()
    }

    #[tokio::test]
    async fn test_build_wires_configured_banned_words() {
        let config = config(&[("ROOM_BANNED_WORDS", "spam, scam")]);
        let room = Room::build(
            &config,
            Collaborators::from_config(&config),
            CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(
            room.state().relay.filter().banned_words(),
            vec!["spam", "scam"]
        );
        assert_eq!(room.state().playback.borrow().track_index, 0);
    }

    #[tokio::test]
    async fn test_agent_enabled_only_with_address() {
        let without = config(&[]);
        assert!(Collaborators::from_config(&without).agent.is_none());

        let with = config(&[("ROOM_AGENT_ADDRESS", "127.0.0.1:7000")]);
        assert!(Collaborators::from_config(&with).agent.is_some());
    }

    #[tokio::test]
    async fn test_clock_stops_on_shutdown() {
        let config = config(&[]);
        let token = CancellationToken::new();
        let room = Room::build(&config, Collaborators::from_config(&config), token.clone()).unwrap();

        let (_state, handle) = room.start();
        token.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("clock task should stop promptly")
            .unwrap();
    }
}
