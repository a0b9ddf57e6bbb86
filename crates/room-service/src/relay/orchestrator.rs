//! Chat pipeline: moderation, optional agent round trip, fan-out.
//!
//! For each inbound message, in order:
//!
//! 1. Classify with the [`ModerationFilter`]. Blocked messages are dropped
//!    (logged and counted, never echoed).
//! 2. If the text contains the trigger token, forward it on this connection's
//!    [`RelaySession`] and wait a bounded time for one reply. Any failure is
//!    logged and processing continues.
//! 3. Broadcast the agent reply, if any.
//! 4. Broadcast the original message.
//!
//! The agent reply is always delivered before the original. Delivered
//! messages are handed to the chat store on a background task.

use super::agent::{AgentConnector, AgentSession, RelayError};
use crate::fanout::{BroadcastFanout, FanoutReport};
use crate::models::{ChatMessage, OutboundMessage};
use crate::moderation::{ModerationFilter, Verdict};
use crate::observability::metrics::{
    record_message_blocked, record_message_relayed, record_relay_request,
};
use crate::registry::Channel;
use crate::store::{spawn_insert, ChatStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Upper bound on a best-effort session close.
pub const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Dropped by moderation.
    Blocked(Verdict),
    /// Broadcast on the chat channel.
    Delivered {
        /// An agent reply was broadcast ahead of the message.
        agent_replied: bool,
        /// Fan-out counts for the original message.
        report: FanoutReport,
    },
}

#[derive(Clone)]
struct AgentSettings {
    connector: Arc<dyn AgentConnector>,
    trigger: String,
    timeout: Duration,
}

/// Per-connection agent session holder.
///
/// The session is opened on the first triggering message and reused after
/// that. It is discarded after any failed round trip so the next trigger
/// reconnects. Dropping the holder drops the session.
pub struct RelaySession {
    connection_id: String,
    agent: Option<Box<dyn AgentSession>>,
}

impl RelaySession {
    #[must_use]
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            agent: None,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Whether an agent session is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.agent.is_some()
    }

    /// Close the agent session, if one is open.
    ///
    /// Failures and slow closes are logged, never returned.
    pub async fn close(&mut self) {
        let Some(mut agent) = self.agent.take() else {
            return;
        };
        match tokio::time::timeout(SESSION_CLOSE_TIMEOUT, agent.close()).await {
            Ok(Ok(())) => {
                debug!(target: "room.relay", connection_id = %self.connection_id, "Agent session closed");
            }
            Ok(Err(e)) => {
                warn!(
                    target: "room.relay",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Agent session close failed"
                );
            }
            Err(_) => {
                warn!(
                    target: "room.relay",
                    connection_id = %self.connection_id,
                    "Agent session close timed out"
                );
            }
        }
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("connection_id", &self.connection_id)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Composes moderation, the optional agent, and chat fan-out.
#[derive(Clone)]
pub struct RelayOrchestrator {
    filter: Arc<ModerationFilter>,
    fanout: BroadcastFanout,
    agent: Option<AgentSettings>,
    store: Option<Arc<dyn ChatStore>>,
}

impl RelayOrchestrator {
    /// Pipeline with moderation and fan-out only.
    #[must_use]
    pub fn new(filter: Arc<ModerationFilter>, fanout: BroadcastFanout) -> Self {
        Self {
            filter,
            fanout,
            agent: None,
            store: None,
        }
    }

    /// Enable the agent round trip for messages containing `trigger`
    /// (matched case-insensitively).
    #[must_use]
    pub fn with_agent(
        mut self,
        connector: Arc<dyn AgentConnector>,
        trigger: &str,
        timeout: Duration,
    ) -> Self {
        self.agent = Some(AgentSettings {
            connector,
            trigger: trigger.to_lowercase(),
            timeout,
        });
        self
    }

    /// Record delivered messages in `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn filter(&self) -> &Arc<ModerationFilter> {
        &self.filter
    }

    /// Whether `text` would invoke the agent.
    #[must_use]
    pub fn is_triggered(&self, text: &str) -> bool {
        self.agent
            .as_ref()
            .is_some_and(|agent| text.to_lowercase().contains(&agent.trigger))
    }

    /// Run one inbound message through the pipeline.
    #[instrument(skip_all, name = "room.relay.handle", fields(connection_id = %session.connection_id()))]
    pub async fn handle(&self, session: &mut RelaySession, message: ChatMessage) -> RelayOutcome {
        let verdict = self.filter.check(&message.text);
        if verdict.is_blocked() {
            record_message_blocked(verdict.as_str());
            info!(
                target: "room.relay",
                username = %message.username,
                text_len = message.text.len(),
                verdict = verdict.as_str(),
                "Chat message blocked by moderation"
            );
            return RelayOutcome::Blocked(verdict);
        }

        let mut agent_replied = false;
        if let Some(agent) = self.agent.as_ref().filter(|_| self.is_triggered(&message.text)) {
            if let Some(reply) = Self::ask_agent(agent, session, &message.text).await {
                self.deliver(ChatMessage::from_agent(reply), "agent").await;
                agent_replied = true;
            }
        }

        let report = self.deliver(message, "user").await;
        RelayOutcome::Delivered {
            agent_replied,
            report,
        }
    }

    async fn deliver(&self, message: ChatMessage, source: &'static str) -> FanoutReport {
        let report = self
            .fanout
            .broadcast(Channel::Chat, &OutboundMessage::Chat(message.clone()))
            .await;
        record_message_relayed(source);
        debug!(
            target: "room.relay",
            source = source,
            text_len = message.text.len(),
            delivered = report.delivered,
            "Chat message broadcast"
        );
        if let Some(store) = self.store.as_ref() {
            spawn_insert(Arc::clone(store), message);
        }
        report
    }

    /// One bounded round trip. `None` when no usable reply arrived.
    async fn ask_agent(
        agent: &AgentSettings,
        session: &mut RelaySession,
        text: &str,
    ) -> Option<String> {
        let started = Instant::now();
        let result = match tokio::time::timeout(agent.timeout, Self::exchange(agent, session, text))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout(agent.timeout)),
        };
        let elapsed = started.elapsed();

        match result {
            Ok(reply) if !reply.trim().is_empty() => {
                record_relay_request("success", elapsed);
                debug!(
                    target: "room.relay",
                    connection_id = %session.connection_id(),
                    reply_len = reply.len(),
                    elapsed_ms = elapsed.as_millis(),
                    "Agent replied"
                );
                Some(reply)
            }
            Ok(_) => {
                record_relay_request("empty", elapsed);
                debug!(
                    target: "room.relay",
                    connection_id = %session.connection_id(),
                    "Agent reply was empty, skipping"
                );
                None
            }
            Err(e) => {
                record_relay_request(e.as_str(), elapsed);
                warn!(
                    target: "room.relay",
                    connection_id = %session.connection_id(),
                    error = %e,
                    elapsed_ms = elapsed.as_millis(),
                    "Agent unavailable, delivering message without reply"
                );
                // The session state is unknown after a failure
                session.agent = None;
                None
            }
        }
    }

    async fn exchange(
        agent: &AgentSettings,
        session: &mut RelaySession,
        text: &str,
    ) -> Result<String, RelayError> {
        if session.agent.is_none() {
            session.agent = Some(agent.connector.connect().await?);
        }
        match session.agent.as_mut() {
            Some(open) => open.exchange(text).await,
            None => Err(RelayError::Closed),
        }
    }
}

impl std::fmt::Debug for RelayOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayOrchestrator")
            .field("agent_enabled", &self.agent.is_some())
            .field("store_enabled", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionRegistry, Frame, Subscriber};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct EchoConnector {
        connects: AtomicUsize,
    }

    struct EchoSession;

    #[async_trait]
    impl AgentConnector for EchoConnector {
        async fn connect(&self) -> Result<Box<dyn AgentSession>, RelayError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoSession))
        }
    }

    #[async_trait]
    impl AgentSession for EchoSession {
        async fn exchange(&mut self, text: &str) -> Result<String, RelayError> {
            Ok(format!("echo: {text}"))
        }

        async fn close(&mut self) -> Result<(), RelayError> {
            Ok(())
        }
    }

    fn pipeline(words: &[&str]) -> (RelayOrchestrator, mpsc::Receiver<Frame>, Subscriber) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (listener, rx) = Subscriber::new(Channel::Chat, 16, CancellationToken::new());
        registry.register(&listener);
        let filter = Arc::new(ModerationFilter::new(words).unwrap());
        (
            RelayOrchestrator::new(filter, BroadcastFanout::new(registry)),
            rx,
            listener,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<serde_json::Value> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|frame| serde_json::from_str(&frame).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_blocked_message_is_not_broadcast() {
        let (relay, mut rx, _listener) = pipeline(&["spam"]);
        let mut session = RelaySession::new("test-connection");

        let outcome = relay
            .handle(&mut session, ChatMessage::from_sender(None, "buy SPAM now"))
            .await;

        assert_eq!(outcome, RelayOutcome::Blocked(Verdict::BlockedByWord));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_permitted_message_reaches_chat() {
        let (relay, mut rx, _listener) = pipeline(&["spam"]);
        let mut session = RelaySession::new("test-connection");

        let outcome = relay
            .handle(&mut session, ChatMessage::from_sender(Some("ana"), "hello"))
            .await;

        assert!(matches!(
            outcome,
            RelayOutcome::Delivered {
                agent_replied: false,
                ..
            }
        ));
        assert_eq!(
            drain(&mut rx),
            vec![serde_json::json!({"type": "chat", "username": "ana", "text": "hello"})]
        );
    }

    #[tokio::test]
    async fn test_agent_session_is_opened_lazily_and_reused() {
        let (relay, mut rx, _listener) = pipeline(&[]);
        let connector = Arc::new(EchoConnector {
            connects: AtomicUsize::new(0),
        });
        let relay = relay.with_agent(
            Arc::clone(&connector) as Arc<dyn AgentConnector>,
            "@agent",
            Duration::from_secs(1),
        );
        let mut session = RelaySession::new("test-connection");

        relay
            .handle(&mut session, ChatMessage::from_sender(None, "no trigger"))
            .await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        assert!(!session.is_open());

        relay
            .handle(&mut session, ChatMessage::from_sender(None, "@Agent one"))
            .await;
        relay
            .handle(&mut session, ChatMessage::from_sender(None, "@AGENT two"))
            .await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert!(session.is_open());

        let usernames: Vec<_> = drain(&mut rx)
            .into_iter()
            .map(|m| m["username"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            usernames,
            vec!["Anonymous", "Agent", "Anonymous", "Agent", "Anonymous"]
        );

        session.close().await;
        assert!(!session.is_open());
    }

    #[test]
    fn test_trigger_match_is_case_insensitive() {
        let (relay, _rx, _listener) = pipeline(&[]);
        assert!(!relay.is_triggered("@agent hi"), "no agent configured");

        let relay = relay.with_agent(
            Arc::new(EchoConnector {
                connects: AtomicUsize::new(0),
            }),
            "@Agent",
            Duration::from_secs(1),
        );
        assert!(relay.is_triggered("hey @AGENT"));
        assert!(!relay.is_triggered("hey agent"));
    }
}
