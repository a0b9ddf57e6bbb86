//! Chat store that records inserts, or rejects them.

use async_trait::async_trait;
use room_service::models::ChatMessage;
use room_service::store::{ChatStore, StoreError, StoredChat};
use std::sync::Mutex;
use std::time::Duration;

/// In-test chat store.
#[derive(Debug, Default)]
pub struct RecordingStore {
    messages: Mutex<Vec<ChatMessage>>,
    fail: bool,
}

impl RecordingStore {
    /// Store that accepts and records every insert.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose every operation fails.
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Messages inserted so far, in insert order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Wait until at least `count` messages were inserted, or `timeout` passes.
    ///
    /// Inserts run on background tasks, so tests poll for them.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<ChatMessage> {
        let _ = tokio::time::timeout(timeout, async {
            while self.messages.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        self.messages()
    }
}

#[async_trait]
impl ChatStore for RecordingStore {
    async fn insert(&self, message: &ChatMessage) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Unavailable("recording store set to fail".to_string()));
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<StoredChat>, StoreError> {
        if self.fail {
            return Err(StoreError::Unavailable("recording store set to fail".to_string()));
        }
        let messages = self.messages.lock().unwrap();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.iter().skip(skip).map(StoredChat::now).collect())
    }
}
