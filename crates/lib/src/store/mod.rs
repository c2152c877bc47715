//! Message store: append-only persistence of text records with store-assigned ids and timestamps.
//!
//! Two backends: in-memory (default) and SQLite. Both assign strictly increasing ids in
//! write order and never reuse an id.

mod memory;
mod sqlite;

pub use memory::MemoryMessageStore;
pub use sqlite::SqliteMessageStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

/// One persisted message. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub content: String,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one record; the store assigns `id` and `time`.
    async fn append(&self, content: &str) -> Result<MessageRecord, StoreError>;

    /// Up to `limit` most recent records, newest first (by id).
    async fn query_recent(&self, limit: usize) -> Result<Vec<MessageRecord>, StoreError>;
}

/// Open the configured backend. `config_path` anchors a relative sqlite path.
pub async fn open(config: &StoreConfig, config_path: &Path) -> Result<Arc<dyn MessageStore>> {
    match config.backend {
        StoreBackend::Memory => {
            log::info!("message store: in-memory");
            Ok(Arc::new(MemoryMessageStore::new()))
        }
        StoreBackend::Sqlite => {
            let path = crate::config::resolve_store_path(config, config_path);
            let store = SqliteMessageStore::open(&path)
                .await
                .with_context(|| format!("opening message store at {}", path.display()))?;
            log::info!("message store: sqlite at {}", path.display());
            Ok(Arc::new(store))
        }
    }
}
