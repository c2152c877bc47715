//! Command handlers. Each one is independent of the others and of the transport.

use crate::error::{StoreError, TurnError};
use crate::store::{MessageRecord, MessageStore};
use rand::Rng;
use std::time::Duration;

const INJECTED_FAULT_MESSAGE: &str = "fault requested by the 'error' command";

/// The `error` command: always fails.
pub fn inject_fault() -> TurnError {
    TurnError::InjectedFault(INJECTED_FAULT_MESSAGE)
}

/// The `slow` command: sleep for a random duration in `[0, max)` and return it.
///
/// The sleep is a tokio timer, so the worker thread keeps serving other turns meanwhile,
/// and dropping the future cancels it.
pub async fn simulate_latency(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    let delay = if max_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    };
    tokio::time::sleep(delay).await;
    delay
}

/// The `save <text>` command.
pub async fn save_message(
    store: &dyn MessageStore,
    content: &str,
) -> Result<MessageRecord, StoreError> {
    let record = store.append(content).await?;
    log::debug!("saved message {} ({} bytes)", record.id, content.len());
    Ok(record)
}

/// The `load` command: contents of the most recent messages, newest first.
pub async fn load_recent(
    store: &dyn MessageStore,
    limit: usize,
) -> Result<Vec<String>, StoreError> {
    let records = store.query_recent(limit).await?;
    Ok(records.into_iter().map(|r| r.content).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMessageStore;

    #[tokio::test(start_paused = true)]
    async fn latency_is_bounded_and_actually_slept() {
        let max = Duration::from_millis(5000);
        for _ in 0..20 {
            let started = tokio::time::Instant::now();
            let delay = simulate_latency(max).await;
            let elapsed = started.elapsed();
            assert!(delay < max);
            assert!(elapsed >= delay && elapsed <= delay + Duration::from_millis(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_bound_means_no_delay() {
        assert_eq!(simulate_latency(Duration::ZERO).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn load_recent_respects_limit() {
        let store = MemoryMessageStore::new();
        for s in ["a", "b", "c"] {
            save_message(&store, s).await.unwrap();
        }
        assert_eq!(load_recent(&store, 2).await.unwrap(), vec!["c", "b"]);
        assert_eq!(load_recent(&store, 0).await.unwrap(), Vec::<String>::new());
    }

    #[test]
    fn fault_is_classified() {
        assert!(matches!(inject_fault(), TurnError::InjectedFault(_)));
    }
}
