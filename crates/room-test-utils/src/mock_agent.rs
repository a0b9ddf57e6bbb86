//! Scripted agent connector for relay tests.

use async_trait::async_trait;
use room_service::relay::{AgentConnector, AgentSession, RelayError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Behavior {
    Reply(String),
    Echo,
    FailExchange,
    RefuseConnect,
    Hang,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    exchanges: AtomicUsize,
    closes: AtomicUsize,
}

/// Mock agent for relay tests.
///
/// Counts connects, exchanges, and closes across every session it opened.
#[derive(Debug, Clone)]
pub struct MockAgent {
    behavior: Behavior,
    counters: Arc<Counters>,
}

impl MockAgent {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Always replies with `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self::with_behavior(Behavior::Reply(reply.into()))
    }

    /// Replies with `echo: <text>`.
    pub fn echoing() -> Self {
        Self::with_behavior(Behavior::Echo)
    }

    /// Connects, then fails every exchange with a transport error.
    pub fn failing() -> Self {
        Self::with_behavior(Behavior::FailExchange)
    }

    /// Refuses every connection.
    pub fn refusing() -> Self {
        Self::with_behavior(Behavior::RefuseConnect)
    }

    /// Connects, then never replies.
    pub fn hanging() -> Self {
        Self::with_behavior(Behavior::Hang)
    }

    /// Shareable connector handle backed by this mock's counters.
    pub fn connector(&self) -> Arc<dyn AgentConnector> {
        Arc::new(self.clone())
    }

    pub fn connect_count(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn exchange_count(&self) -> usize {
        self.counters.exchanges.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentConnector for MockAgent {
    async fn connect(&self) -> Result<Box<dyn AgentSession>, RelayError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if matches!(self.behavior, Behavior::RefuseConnect) {
            return Err(RelayError::Connect("connection refused".to_string()));
        }
        Ok(Box::new(MockSession {
            behavior: self.behavior.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct MockSession {
    behavior: Behavior,
    counters: Arc<Counters>,
}

#[async_trait]
impl AgentSession for MockSession {
    async fn exchange(&mut self, text: &str) -> Result<String, RelayError> {
        self.counters.exchanges.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Reply(reply) => Ok(reply.clone()),
            Behavior::Echo => Ok(format!("echo: {text}")),
            Behavior::FailExchange | Behavior::RefuseConnect => {
                Err(RelayError::Transport("mock transport failure".to_string()))
            }
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Err(RelayError::Closed)
            }
        }
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
