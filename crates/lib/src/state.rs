//! Per-conversation scoped state: named properties keyed by conversation id.
//!
//! Entries are created on first write and live for the lifetime of the store; there is no
//! expiry. Different conversations never see each other's properties. Each entry has its own
//! lock, so writers to one conversation do not wait on another.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type Properties = HashMap<String, Value>;

/// In-memory conversation state, shared across turns.
pub struct ConversationStates {
    inner: RwLock<HashMap<String, Arc<Mutex<Properties>>>>,
}

impl Default for ConversationStates {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStates {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    async fn entry(&self, conversation_id: &str) -> Option<Arc<Mutex<Properties>>> {
        self.inner.read().await.get(conversation_id).cloned()
    }

    async fn entry_or_create(&self, conversation_id: &str) -> Arc<Mutex<Properties>> {
        if let Some(e) = self.entry(conversation_id).await {
            return e;
        }
        self.inner
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Value of `property` for the conversation, if set. Does not create an entry.
    pub async fn get(&self, conversation_id: &str, property: &str) -> Option<Value> {
        let entry = self.entry(conversation_id).await?;
        let props = entry.lock().await;
        props.get(property).cloned()
    }

    pub async fn set(&self, conversation_id: &str, property: &str, value: impl Into<Value>) {
        let entry = self.entry_or_create(conversation_id).await;
        entry.lock().await.insert(property.to_string(), value.into());
    }

    /// Read-modify-write of one property while holding the conversation's lock; returns the new value.
    pub async fn update<F>(&self, conversation_id: &str, property: &str, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let entry = self.entry_or_create(conversation_id).await;
        let mut props = entry.lock().await;
        let next = f(props.get(property));
        props.insert(property.to_string(), next.clone());
        next
    }

    pub async fn contains(&self, conversation_id: &str) -> bool {
        self.inner.read().await.contains_key(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_does_not_materialize_entry() {
        let states = ConversationStates::new();
        assert_eq!(states.get("c1", "turnCount").await, None);
        assert!(!states.contains("c1").await);

        states.set("c1", "turnCount", 1).await;
        assert!(states.contains("c1").await);
        assert_eq!(states.get("c1", "turnCount").await, Some(Value::from(1)));
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let states = ConversationStates::new();
        states.set("c1", "name", "alice").await;
        states.set("c2", "name", "bob").await;
        assert_eq!(states.get("c1", "name").await, Some(Value::from("alice")));
        assert_eq!(states.get("c2", "name").await, Some(Value::from("bob")));
        assert_eq!(states.get("c3", "name").await, None);
    }

    #[tokio::test]
    async fn concurrent_updates_to_one_conversation_are_not_lost() {
        let states = Arc::new(ConversationStates::new());
        let mut tasks = Vec::new();
        for _ in 0..50 {
            let states = states.clone();
            tasks.push(tokio::spawn(async move {
                states
                    .update("c1", "counter", |v| {
                        Value::from(v.and_then(Value::as_u64).unwrap_or(0) + 1)
                    })
                    .await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(states.get("c1", "counter").await, Some(Value::from(50)));
    }
}
