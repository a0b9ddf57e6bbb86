//! Metric definitions for the listening room.
//!
//! All metrics use the `room_` prefix, `_total` for counters and `_seconds`
//! for duration histograms.
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `channel`: `music`, `chat`
//! - `source`: `user`, `agent`
//! - `reason`: delivery failure (`mailbox_full`, `closed`) or verdict
//!   (`banned_word`, `link`)
//! - `outcome`: `success`, `empty`, or a relay error kind
//! - `operation`: `insert`, `fetch_recent`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metric is recorded.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed (e.g., one is
/// already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Agent round trips are bounded by the relay timeout (10s by default)
        .set_buckets_for_metric(
            Matcher::Prefix("room_relay".to_string()),
            &[
                0.050, 0.100, 0.250, 0.500, 1.000, 2.000, 5.000, 10.000, 15.000,
            ],
        )
        .map_err(|e| format!("Failed to set relay buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Connections and fan-out
// ============================================================================

/// Set the number of registered subscribers on a channel.
///
/// Metric: `room_connections_active`
/// Labels: `channel`
pub fn set_connections_active(channel: &str, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_connections_active", "channel" => channel.to_string()).set(count as f64);
}

/// Record frames accepted by mailboxes during one broadcast.
///
/// Metric: `room_broadcast_deliveries_total`
/// Labels: `channel`
pub fn record_broadcast(channel: &str, delivered: usize) {
    counter!("room_broadcast_deliveries_total", "channel" => channel.to_string())
        .increment(delivered as u64);
}

/// Record a subscriber removed because delivery failed.
///
/// Metric: `room_delivery_failures_total`
/// Labels: `channel`, `reason`
pub fn record_delivery_failure(channel: &str, reason: &str) {
    counter!("room_delivery_failures_total",
        "channel" => channel.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

// ============================================================================
// Playback
// ============================================================================

/// Record one clock tick.
///
/// Metrics: `room_playback_ticks_total`, `room_playback_track_changes_total`
pub fn record_playback_tick(track_changed: bool) {
    counter!("room_playback_ticks_total").increment(1);
    if track_changed {
        counter!("room_playback_track_changes_total").increment(1);
    }
}

// ============================================================================
// Chat pipeline
// ============================================================================

/// Record a chat message dropped by moderation.
///
/// Metric: `room_messages_blocked_total`
/// Labels: `reason`
pub fn record_message_blocked(reason: &str) {
    counter!("room_messages_blocked_total", "reason" => reason.to_string()).increment(1);
}

/// Record a chat message handed to the fan-out.
///
/// Metric: `room_messages_relayed_total`
/// Labels: `source` (`user`, `agent`)
pub fn record_message_relayed(source: &str) {
    counter!("room_messages_relayed_total", "source" => source.to_string()).increment(1);
}

/// Record a moderation policy replacement.
///
/// Metric: `room_policy_replacements_total`
pub fn record_policy_replaced() {
    counter!("room_policy_replacements_total").increment(1);
}

/// Record one agent round trip.
///
/// Metrics: `room_relay_requests_total`, `room_relay_duration_seconds`
/// Labels: `outcome`
pub fn record_relay_request(outcome: &str, duration: Duration) {
    histogram!("room_relay_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
    counter!("room_relay_requests_total", "outcome" => outcome.to_string()).increment(1);
}

// ============================================================================
// Store
// ============================================================================

/// Record a failed chat store operation.
///
/// Metric: `room_store_failures_total`
/// Labels: `operation`
pub fn record_store_failure(operation: &str) {
    counter!("room_store_failures_total", "operation" => operation.to_string()).increment(1);
}
