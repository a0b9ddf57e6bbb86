//! Chat relay pipeline and the external agent it may consult.

pub mod agent;
pub mod orchestrator;

pub use agent::{AgentConnector, AgentSession, RelayError, TcpAgentConnector};
pub use orchestrator::{RelayOutcome, RelayOrchestrator, RelaySession};
