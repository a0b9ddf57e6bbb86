//! Chat store collaborator.
//!
//! The relay pipeline records every delivered chat line through
//! [`ChatStore`]. Writes go through [`spawn_insert`], which runs the insert on
//! its own task: a slow or failing store never delays delivery. History is
//! exposed to operators only and is never replayed to joining clients.

use crate::models::ChatMessage;
use crate::observability::metrics::record_store_failure;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chat store unavailable: {0}")]
    Unavailable(String),
}

/// A chat line as recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChat {
    pub username: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl StoredChat {
    #[must_use]
    pub fn now(message: &ChatMessage) -> Self {
        Self {
            username: message.username.clone(),
            text: message.text.clone(),
            received_at: Utc::now(),
        }
    }
}

/// Storage for delivered chat lines.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Record one delivered message.
    async fn insert(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Up to `limit` most recent messages, oldest first.
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<StoredChat>, StoreError>;
}

/// Record `message` on a background task.
///
/// Failures are logged and counted; the caller never observes them.
pub fn spawn_insert(store: Arc<dyn ChatStore>, message: ChatMessage) {
    tokio::spawn(async move {
        match store.insert(&message).await {
            Ok(()) => debug!(target: "room.store", username = %message.username, "Chat message stored"),
            Err(e) => {
                record_store_failure("insert");
                warn!(target: "room.store", error = %e, "Failed to store chat message");
            }
        }
    });
}

/// Bounded in-memory history. The oldest entries are evicted first.
#[derive(Debug)]
pub struct InMemoryChatStore {
    capacity: usize,
    entries: Mutex<VecDeque<StoredChat>>,
}

impl InMemoryChatStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn insert(&self, message: &ChatMessage) -> Result<(), StoreError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(StoredChat::now(message));
        Ok(())
    }

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<StoredChat>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.iter().skip(skip).cloned().collect())
    }
}
