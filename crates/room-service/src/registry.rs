//! Connection registry: live subscriber handles per channel.
//!
//! A [`Subscriber`] is the handle the server holds for one connected socket.
//! Its identity is the handle itself: two clones of the same subscriber are
//! equal, two separately created subscribers never are. Delivery goes through
//! a bounded mailbox drained by the connection's writer, so pushing a frame
//! waits on a slow socket for at most a short grace period.
//!
//! The registry keeps one set per [`Channel`]. Mutations hold the write lock
//! for a single set operation; [`ConnectionRegistry::snapshot`] copies the set
//! under the read lock and returns, so iteration never observes a torn set
//! and never waits on anything but another short critical section.

use crate::observability::metrics::set_connections_active;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One serialized outbound message, shared by every recipient of a broadcast.
pub type Frame = Arc<str>;

/// Audience partition with its own subscriber set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Playback-state pushes (outbound only).
    Music,
    /// Chat relay (bidirectional).
    Chat,
}

impl Channel {
    /// All channels.
    pub const ALL: [Channel; 2] = [Channel::Music, Channel::Chat];

    /// Returns the channel name for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Channel::Music => "music",
            Channel::Chat => "chat",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-subscriber delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The mailbox stayed full: the socket is not keeping up.
    #[error("subscriber mailbox full")]
    MailboxFull,

    /// The connection's writer has gone away.
    #[error("subscriber connection closed")]
    Closed,
}

impl DeliveryError {
    /// Returns the failure reason for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeliveryError::MailboxFull => "mailbox_full",
            DeliveryError::Closed => "closed",
        }
    }
}

struct SubscriberInner {
    channel: Channel,
    connection_id: String,
    sender: mpsc::Sender<Frame>,
    cancel_token: CancellationToken,
}

/// Handle to one connected socket on one channel.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

impl Subscriber {
    /// Create a subscriber with a mailbox of `buffer` frames.
    ///
    /// Returns the handle and the mailbox receiver the connection's writer
    /// drains. `cancel_token` is cancelled when the subscriber is closed, so
    /// the owning connection can observe a removal initiated by fan-out.
    pub fn new(
        channel: Channel,
        buffer: usize,
        cancel_token: CancellationToken,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let subscriber = Self {
            inner: Arc::new(SubscriberInner {
                channel,
                connection_id: uuid::Uuid::new_v4().to_string(),
                sender,
                cancel_token,
            }),
        };
        (subscriber, receiver)
    }

    /// The channel this subscriber belongs to.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.inner.channel
    }

    /// Connection ID, for logs only.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    /// Push a frame without waiting.
    pub fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.inner.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::MailboxFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Push a frame, waiting up to `grace` for mailbox space.
    ///
    /// A writer that is draining frees a slot well within the grace period;
    /// one that is stalled does not.
    pub async fn deliver_within(&self, frame: Frame, grace: Duration) -> Result<(), DeliveryError> {
        self.inner
            .sender
            .send_timeout(frame, grace)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => DeliveryError::MailboxFull,
                mpsc::error::SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Signal the owning connection to shut down. Idempotent.
    pub fn close(&self) {
        self.inner.cancel_token.cancel();
    }

    /// Whether [`Subscriber::close`] has been called (or the parent token cancelled).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.cancel_token.is_cancelled()
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Subscriber {}

impl Hash for Subscriber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("channel", &self.inner.channel)
            .field("connection_id", &self.inner.connection_id)
            .finish()
    }
}

/// Set of live subscribers per channel.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    channels: RwLock<HashMap<Channel, HashSet<Subscriber>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber to its channel. Returns `false` if it was already present.
    pub fn register(&self, subscriber: &Subscriber) -> bool {
        let channel = subscriber.channel();
        let (added, count) = {
            let mut channels = self
                .channels
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let members = channels.entry(channel).or_default();
            let added = members.insert(subscriber.clone());
            (added, members.len())
        };

        if added {
            set_connections_active(channel.as_str(), count);
            info!(
                target: "room.registry",
                channel = %channel,
                connection_id = %subscriber.connection_id(),
                connections = count,
                "Subscriber registered"
            );
        }
        added
    }

    /// Remove a subscriber from its channel. Returns `false` if it was not present.
    pub fn unregister(&self, subscriber: &Subscriber) -> bool {
        let channel = subscriber.channel();
        let (removed, count) = {
            let mut channels = self
                .channels
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match channels.get_mut(&channel) {
                Some(members) => {
                    let removed = members.remove(subscriber);
                    (removed, members.len())
                }
                None => (false, 0),
            }
        };

        if removed {
            set_connections_active(channel.as_str(), count);
            info!(
                target: "room.registry",
                channel = %channel,
                connection_id = %subscriber.connection_id(),
                connections = count,
                "Subscriber unregistered"
            );
        } else {
            debug!(
                target: "room.registry",
                channel = %channel,
                connection_id = %subscriber.connection_id(),
                "Subscriber already unregistered"
            );
        }
        removed
    }

    /// Copy of the channel's current members.
    #[must_use]
    pub fn snapshot(&self, channel: Channel) -> Vec<Subscriber> {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(&channel)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of members on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels.get(&channel).map_or(0, HashSet::len)
    }

    /// Whether the subscriber is currently registered.
    #[must_use]
    pub fn contains(&self, subscriber: &Subscriber) -> bool {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(&subscriber.channel())
            .is_some_and(|members| members.contains(subscriber))
    }

    /// Register `subscriber` and return a guard that unregisters it on drop.
    ///
    /// Connection tasks hold the guard for their whole lifetime, so every exit
    /// path (normal close, error, cancellation, panic unwind) releases the
    /// registration.
    #[must_use]
    pub fn enroll(self: &Arc<Self>, subscriber: Subscriber) -> Registration {
        self.register(&subscriber);
        Registration {
            registry: Arc::clone(self),
            subscriber,
        }
    }
}

/// Scoped registration; unregisters its subscriber when dropped.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    subscriber: Subscriber,
}

impl Registration {
    /// The registered subscriber.
    #[must_use]
    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.subscriber);
        self.subscriber.close();
    }
}
