//! Playback clock: the single authoritative "now playing" position.
//!
//! [`PlaybackClock`] is a plain state machine. [`run_clock`] owns it for the
//! life of the process, advances it once per [`TICK_INTERVAL`], publishes the
//! new state on a `watch` channel, and pushes it to the music channel on every
//! tick whether or not the track changed. Newly joined listeners therefore
//! converge within one tick without a separate join handshake.
//!
//! Every track lasts the same configured duration; actual media length is
//! not consulted.

use crate::fanout::BroadcastFanout;
use crate::models::{OutboundMessage, PlaybackPush};
use crate::observability::metrics::record_playback_tick;
use crate::registry::Channel;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Wall-clock time between two ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Opaque reference to a track's media, resolved by whoever serves the audio.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackLocator(String);

impl TrackLocator {
    #[must_use]
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("playlist must contain at least one track")]
    EmptyPlaylist,

    #[error("track duration must be greater than zero")]
    ZeroTrackDuration,

    #[error("tick interval must be greater than zero")]
    ZeroTickInterval,
}

/// Ordered, immutable, non-empty sequence of tracks.
#[derive(Debug, Clone)]
pub struct Playlist {
    tracks: Arc<[TrackLocator]>,
}

impl Playlist {
    /// Build a playlist. Fails if `tracks` is empty.
    pub fn new(tracks: Vec<TrackLocator>) -> Result<Self, ClockError> {
        if tracks.is_empty() {
            return Err(ClockError::EmptyPlaylist);
        }
        Ok(Self {
            tracks: tracks.into(),
        })
    }

    /// Build a playlist from raw locator strings.
    pub fn from_locators<I, S>(locators: I) -> Result<Self, ClockError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(locators.into_iter().map(TrackLocator::new).collect())
    }

    /// Number of tracks. Always at least one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TrackLocator> {
        self.tracks.get(index)
    }
}

/// Snapshot of the shared position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackState {
    /// Index into the playlist; always valid.
    pub track_index: usize,
    /// Time into the current track; always below the track duration.
    pub elapsed: Duration,
    pub track_locator: TrackLocator,
}

/// Fixed-step playback state machine.
#[derive(Debug)]
pub struct PlaybackClock {
    playlist: Playlist,
    track_duration: Duration,
    tick_interval: Duration,
    track_index: usize,
    elapsed: Duration,
    current: TrackLocator,
}

impl PlaybackClock {
    /// Start at the first track, zero seconds in.
    pub fn new(playlist: Playlist, track_duration: Duration) -> Result<Self, ClockError> {
        if track_duration.is_zero() {
            return Err(ClockError::ZeroTrackDuration);
        }
        let current = playlist.get(0).cloned().ok_or(ClockError::EmptyPlaylist)?;
        Ok(Self {
            playlist,
            track_duration,
            tick_interval: TICK_INTERVAL,
            track_index: 0,
            elapsed: Duration::ZERO,
            current,
        })
    }

    /// Override the step added per tick.
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Result<Self, ClockError> {
        if tick_interval.is_zero() {
            return Err(ClockError::ZeroTickInterval);
        }
        self.tick_interval = tick_interval;
        Ok(self)
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    #[must_use]
    pub fn track_duration(&self) -> Duration {
        self.track_duration
    }

    #[must_use]
    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    /// Current position.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            track_index: self.track_index,
            elapsed: self.elapsed,
            track_locator: self.current.clone(),
        }
    }

    /// Advance by one tick and return the new position.
    ///
    /// Reaching the track duration moves to the next track (wrapping at the
    /// end of the playlist) at zero seconds.
    pub fn tick(&mut self) -> PlaybackState {
        self.advance(1);
        self.state()
    }

    /// Advance by `ticks` ticks at once. Returns whether the track changed
    /// along the way.
    pub fn advance(&mut self, ticks: u32) -> bool {
        let mut track_changed = false;
        for _ in 0..ticks {
            self.elapsed += self.tick_interval;
            if self.elapsed >= self.track_duration {
                self.advance_track();
                track_changed = true;
            }
        }
        track_changed
    }

    fn advance_track(&mut self) {
        self.track_index = (self.track_index + 1) % self.playlist.len();
        self.elapsed = Duration::ZERO;
        if let Some(locator) = self.playlist.get(self.track_index) {
            self.current = locator.clone();
        }
    }
}

/// Spawn the clock task.
///
/// The task owns `clock`; nothing else can mutate the position.
pub fn spawn_clock(
    clock: PlaybackClock,
    fanout: BroadcastFanout,
    state_tx: watch::Sender<PlaybackState>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_clock(clock, fanout, state_tx, cancel_token))
}

/// Tick until `cancel_token` is cancelled.
///
/// Each tick advances the clock, publishes the state on `state_tx`, and
/// broadcasts it to the music channel. Ticks missed during a stall are
/// applied together, followed by a single broadcast.
#[instrument(skip_all, name = "room.task.clock")]
pub async fn run_clock(
    mut clock: PlaybackClock,
    fanout: BroadcastFanout,
    state_tx: watch::Sender<PlaybackState>,
    cancel_token: CancellationToken,
) {
    let period = clock.tick_interval();
    info!(
        target: "room.clock",
        tracks = clock.playlist().len(),
        track_duration_secs = clock.track_duration().as_secs(),
        tick_interval_ms = period.as_millis(),
        "Starting playback clock"
    );

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    // After a stall the missed ticks are folded into one step and one push
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "room.clock", "Playback clock received shutdown signal, exiting");
                break;
            }
            scheduled = ticker.tick() => {
                let ticks = ticks_due(scheduled, Instant::now(), period);
                if ticks > 1 {
                    debug!(target: "room.clock", ticks, "Clock fell behind, catching up");
                }
                let track_changed = clock.advance(ticks);
                let state = clock.state();
                if track_changed {
                    info!(
                        target: "room.clock",
                        track = state.track_index,
                        url = %state.track_locator.as_str(),
                        "Track changed"
                    );
                }
                record_playback_tick(track_changed);

                let push = OutboundMessage::Music(PlaybackPush::from(&state));
                let report = fanout.broadcast(Channel::Music, &push).await;
                debug!(
                    target: "room.clock",
                    track = state.track_index,
                    elapsed_secs = state.elapsed.as_secs_f64(),
                    listeners = report.delivered,
                    "Tick"
                );

                state_tx.send_replace(state);
            }
        }
    }

    info!(target: "room.clock", state = ?clock.state(), "Playback clock stopped");
}

/// Ticks owed at `now` for a tick scheduled at `scheduled`: the scheduled
/// one plus every whole period since.
fn ticks_due(scheduled: Instant, now: Instant, period: Duration) -> u32 {
    let late = now.saturating_duration_since(scheduled);
    let missed = late.as_nanos() / period.as_nanos().max(1);
    u32::try_from(missed).unwrap_or(u32::MAX).saturating_add(1)
}
