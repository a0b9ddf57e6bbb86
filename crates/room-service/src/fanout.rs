//! Broadcast fan-out with per-subscriber failure isolation.
//!
//! A broadcast serializes the message once, takes a registry snapshot, and
//! pushes the shared frame into each subscriber's mailbox. A mailbox that is
//! momentarily full gets a short grace period to drain; all such waits run
//! concurrently, so one slow subscriber never delays another. A subscriber
//! whose mailbox is closed, or still full once the grace period ends, is
//! unregistered and told to close. Nothing is returned to the caller as an
//! error: the [`FanoutReport`] is informational.

use crate::observability::metrics::{record_broadcast, record_delivery_failure};
use crate::registry::{Channel, ConnectionRegistry, Frame, Subscriber};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, trace, warn};

pub use crate::registry::DeliveryError;

/// Default wait for space in a full mailbox.
pub const DEFAULT_DELIVERY_GRACE: Duration = Duration::from_millis(250);

/// Outcome counts for one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    /// Subscribers in the snapshot.
    pub attempted: usize,
    /// Frames accepted by a mailbox.
    pub delivered: usize,
    /// Subscribers removed because delivery failed.
    pub failed: usize,
}

/// Delivers messages to every member of a channel.
#[derive(Debug, Clone)]
pub struct BroadcastFanout {
    registry: Arc<ConnectionRegistry>,
    grace: Duration,
}

impl BroadcastFanout {
    /// Create a fan-out over `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            grace: DEFAULT_DELIVERY_GRACE,
        }
    }

    /// Override how long a full mailbox may take to make room.
    #[must_use]
    pub fn with_delivery_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// The registry this fan-out delivers to.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serialize `message` as JSON and deliver it to every member of `channel`.
    pub async fn broadcast<T: Serialize>(&self, channel: Channel, message: &T) -> FanoutReport {
        match serde_json::to_string(message) {
            Ok(text) => self.broadcast_frame(channel, Frame::from(text)).await,
            Err(e) => {
                error!(
                    target: "room.fanout",
                    channel = %channel,
                    error = %e,
                    "Failed to serialize broadcast message"
                );
                FanoutReport::default()
            }
        }
    }

    /// Deliver a pre-serialized frame to every member of `channel`.
    pub async fn broadcast_frame(&self, channel: Channel, frame: Frame) -> FanoutReport {
        let members = self.registry.snapshot(channel);
        let mut report = FanoutReport {
            attempted: members.len(),
            ..FanoutReport::default()
        };

        let mut backlogged = Vec::new();
        for subscriber in members {
            match subscriber.try_deliver(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::MailboxFull) => backlogged.push(subscriber),
                Err(e) => self.evict(channel, &subscriber, e, &mut report),
            }
        }

        if !backlogged.is_empty() {
            let results = join_all(
                backlogged
                    .iter()
                    .map(|subscriber| subscriber.deliver_within(Arc::clone(&frame), self.grace)),
            )
            .await;
            for (subscriber, result) in backlogged.iter().zip(results) {
                match result {
                    Ok(()) => report.delivered += 1,
                    Err(e) => self.evict(channel, subscriber, e, &mut report),
                }
            }
        }

        record_broadcast(channel.as_str(), report.delivered);
        trace!(
            target: "room.fanout",
            channel = %channel,
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast complete"
        );
        report
    }

    fn evict(
        &self,
        channel: Channel,
        subscriber: &Subscriber,
        error: DeliveryError,
        report: &mut FanoutReport,
    ) {
        report.failed += 1;
        record_delivery_failure(channel.as_str(), error.as_str());
        warn!(
            target: "room.fanout",
            channel = %channel,
            connection_id = %subscriber.connection_id(),
            error = %error,
            "Delivery failed, removing subscriber"
        );
        self.registry.unregister(subscriber);
        subscriber.close();
    }
}
