//! SQLite-backed message store.
//!
//! Schema: `messages(id INTEGER PRIMARY KEY AUTOINCREMENT, time INTEGER, content TEXT)` where
//! `time` is unix milliseconds. AUTOINCREMENT keeps ids strictly increasing and never reused,
//! even after the newest row is gone. Each append is one INSERT, so a cancelled turn either
//! wrote its row or did not.

use super::{MessageRecord, MessageStore};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Open (creating if needed) the database file and ensure the schema exists.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("creating {}: {}", parent.display(), e)))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database. A single connection that is never recycled, since every
    /// sqlite `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        Self::init(&pool).await?;
        Ok(Self { pool })
    }

    async fn init(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                time    INTEGER NOT NULL,
                content TEXT    NOT NULL
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, content: &str) -> Result<MessageRecord, StoreError> {
        let now = Utc::now().timestamp_millis();
        let res = sqlx::query("INSERT INTO messages (time, content) VALUES (?, ?)")
            .bind(now)
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(MessageRecord {
            id: res.last_insert_rowid(),
            time: from_millis(now),
            content: content.to_string(),
        })
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, (i64, i64, String)>(
            "SELECT id, time, content FROM messages ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, time, content)| MessageRecord {
                id,
                time: from_millis(time),
                content,
            })
            .collect())
    }
}
