//! External conversational agent transport.
//!
//! An [`AgentConnector`] opens [`AgentSession`]s; a session sends one text
//! and waits for exactly one reply. The orchestrator owns the timeout, so
//! implementations may wait indefinitely.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

/// Longest reply line accepted from the agent.
pub const MAX_REPLY_BYTES: usize = 16 * 1024;

/// Why an agent round trip produced no reply.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("agent did not reply within {0:?}")]
    Timeout(Duration),

    #[error("failed to connect to agent: {0}")]
    Connect(String),

    #[error("agent transport error: {0}")]
    Transport(String),

    #[error("agent closed the session")]
    Closed,
}

impl RelayError {
    /// Returns the error kind for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RelayError::Timeout(_) => "timeout",
            RelayError::Connect(_) => "connect",
            RelayError::Transport(_) => "transport",
            RelayError::Closed => "closed",
        }
    }
}

/// Opens sessions to the external agent.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn AgentSession>, RelayError>;
}

/// One open conversation with the agent.
#[async_trait]
pub trait AgentSession: Send {
    /// Send `text` and wait for one reply.
    async fn exchange(&mut self, text: &str) -> Result<String, RelayError>;

    /// Close the session.
    async fn close(&mut self) -> Result<(), RelayError>;
}

/// Agent reachable over TCP, one UTF-8 line per request and per reply.
#[derive(Debug, Clone)]
pub struct TcpAgentConnector {
    address: String,
}

impl TcpAgentConnector {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl AgentConnector for TcpAgentConnector {
    async fn connect(&self) -> Result<Box<dyn AgentSession>, RelayError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        debug!(target: "room.relay", address = %self.address, "Agent session opened");
        Ok(Box::new(TcpAgentSession {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_REPLY_BYTES)),
        }))
    }
}

struct TcpAgentSession {
    framed: Framed<TcpStream, LinesCodec>,
}

#[async_trait]
impl AgentSession for TcpAgentSession {
    async fn exchange(&mut self, text: &str) -> Result<String, RelayError> {
        // One request per line
        let line = text.replace(['\r', '\n'], " ");
        self.framed
            .send(line)
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        match self.framed.next().await {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(RelayError::Transport(e.to_string())),
            None => Err(RelayError::Closed),
        }
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        SinkExt::<String>::close(&mut self.framed)
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))
    }
}
