//! In-process message store. Lives as long as the process.

use super::{MessageRecord, MessageStore};
use crate::error::StoreError;
use async_trait::async_trait;
use tokio::sync::RwLock;

struct Log {
    next_id: i64,
    records: Vec<MessageRecord>,
}

/// Id assignment and insertion happen under one write lock, so concurrent appends never
/// share an id and id order always matches insertion order.
pub struct MemoryMessageStore {
    inner: RwLock<Log>,
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Log {
                next_id: 1,
                records: Vec::new(),
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, content: &str) -> Result<MessageRecord, StoreError> {
        let mut g = self.inner.write().await;
        let record = MessageRecord {
            id: g.next_id,
            time: chrono::Utc::now(),
            content: content.to_string(),
        };
        g.next_id += 1;
        g.records.push(record.clone());
        Ok(record)
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
        let g = self.inner.read().await;
        Ok(g.records.iter().rev().take(limit).cloned().collect())
    }
}
