//! Listening Room Service Library
//!
//! This library provides the core functionality for the Listening Room - a
//! real-time coordination server responsible for:
//!
//! - Keeping one shared "now playing" position synchronized across every
//!   connected listener
//! - Relaying chat text among the same population
//! - Filtering chat through a replaceable moderation policy
//! - Optionally augmenting chat with replies from an external conversational agent
//!
//! # Architecture
//!
//! ```text
//! clock task (one per process)          chat connection task (one per socket)
//! ├── owns PlaybackClock                ├── owns Subscriber registration
//! └── every tick ──┐                    ├── owns optional RelaySession
//!                  │                    └── inbound text ──► RelayOrchestrator
//!                  ▼                                          ├── ModerationFilter
//!          BroadcastFanout ◄──────────────────────────────────┘   (+ agent round trip)
//!                  │
//!                  ▼
//!          ConnectionRegistry (music | chat) ──► per-subscriber mailboxes ──► sockets
//! ```
//!
//! # Modules
//!
//! - [`registry`] - Per-channel subscriber sets
//! - [`fanout`] - Failure-isolated broadcast
//! - [`clock`] - Playback clock state machine and its supervised task
//! - [`moderation`] - Banned-word and link classification
//! - [`relay`] - Chat pipeline and external agent sessions
//! - [`store`] - Chat store collaborator interface
//! - [`handlers`] / [`routes`] - WebSocket and admin HTTP surface
//! - [`room`] - Assembly of all components from configuration
//! - [`config`] - Service configuration from environment
//! - [`errors`] - HTTP-facing error type

pub mod clock;
pub mod config;
pub mod errors;
pub mod fanout;
pub mod handlers;
pub mod models;
pub mod moderation;
pub mod observability;
pub mod registry;
pub mod relay;
pub mod room;
pub mod routes;
pub mod store;
