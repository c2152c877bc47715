//! Channel registry: register and look up channel connectors by id.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("channel api error: {0}")]
    Api(String),
    #[error("channel not configured: {0}")]
    NotConfigured(&'static str),
}

/// Handle to a running channel (stop, send reply).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "telegram"); matches `Turn::channel_id` of turns it produces.
    fn id(&self) -> &str;
    /// Stop the channel connector.
    fn stop(&self);
    /// Deliver a reply to a conversation (e.g. Telegram chat_id).
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError>;
}

/// Registry of channel ids to handles. Shared across the gateway.
pub struct ChannelRegistry {
    inner: Arc<RwLock<BTreeMap<String, Arc<dyn ChannelHandle>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Register a handle; a previous handle with the same id is stopped and replaced.
    pub async fn register(&self, id: String, handle: Arc<dyn ChannelHandle>) {
        let mut g = self.inner.write().await;
        if let Some(old) = g.insert(id, handle) {
            old.stop();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn ChannelHandle>> {
        self.inner.read().await.get(id).cloned()
    }

    /// Registered ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeChannel {
        stopped: AtomicBool,
    }

    #[async_trait]
    impl ChannelHandle for FakeChannel {
        fn id(&self) -> &str {
            "fake"
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        async fn send_message(&self, _conversation_id: &str, _text: &str) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn replacing_a_channel_stops_the_old_one() {
        let registry = ChannelRegistry::new();
        let first = Arc::new(FakeChannel {
            stopped: AtomicBool::new(false),
        });
        let second = Arc::new(FakeChannel {
            stopped: AtomicBool::new(false),
        });
        registry.register("fake".to_string(), first.clone()).await;
        registry.register("fake".to_string(), second.clone()).await;

        assert!(first.stopped.load(Ordering::SeqCst));
        assert!(!second.stopped.load(Ordering::SeqCst));
        assert_eq!(registry.ids().await, vec!["fake".to_string()]);
        assert!(registry.get("fake").await.is_some());
        assert!(registry.get("other").await.is_none());
    }
}
