//! # Room Test Utilities
//!
//! Shared test utilities for the listening room service.
//!
//! This crate provides:
//! - Server test harness (`TestRoomServer` for HTTP tests over a real listener)
//! - In-memory sockets (`socket_pair`) for driving the WebSocket pipelines
//! - `MockAgent`, a scripted agent connector
//! - `RecordingStore`, a chat store that records or rejects inserts
//! - `WsTestClient`, a minimal client for the real WebSocket upgrade path
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestRoomServer::spawn().await?;
//!
//!     let response = reqwest::get(format!("{}/v1/playback", server.url())).await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod mock_agent;
pub mod recording_store;
pub mod server_harness;
pub mod socket;
pub mod ws_client;

// Re-export commonly used items
pub use mock_agent::*;
pub use recording_store::*;
pub use server_harness::*;
pub use socket::*;
pub use ws_client::*;
