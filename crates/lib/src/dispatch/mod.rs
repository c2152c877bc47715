//! Turn dispatcher: classify an inbound turn into one command, run its handler, build the reply.
//!
//! The dispatcher holds no per-turn state; the message store, conversation state and telemetry
//! sink are shared, owned by the caller, and outlive any single turn. Handler failures are not
//! caught here; they propagate to the top-level turn handler (see [`crate::gateway::respond`]).

pub mod handlers;

use crate::config::Config;
use crate::error::TurnError;
use crate::state::ConversationStates;
use crate::store::MessageStore;
use crate::telemetry::{Properties, TelemetrySink, BOT_QUESTION_EVENT};
use crate::turn::{Turn, TurnKind};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const SAVE_PREFIX: &str = "save ";
const LOAD_PREFIX: &str = "load";
const LOAD_HEADER: &str = "Loaded these messages from the DB:\n";
const TURN_COUNT_PROPERTY: &str = "turnCount";

/// Anything that turns one inbound turn into one reply. Hosting transports only depend on this.
#[async_trait]
pub trait TurnProcessor: Send + Sync {
    async fn process_turn(&self, turn: &Turn) -> Result<String, TurnError>;
}

/// The command a message text selects. First match wins, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Exactly `error`.
    Fault,
    /// Exactly `slow`.
    Slow,
    /// `save <payload>`; payload is everything after the 5-character prefix.
    Save(&'a str),
    /// Anything starting with `load` (including e.g. `loader`).
    Load,
    Echo(&'a str),
}

/// Case-sensitive, no trimming.
pub fn classify(text: &str) -> Command<'_> {
    if text == "error" {
        Command::Fault
    } else if text == "slow" {
        Command::Slow
    } else if let Some(payload) = text.strip_prefix(SAVE_PREFIX) {
        Command::Save(payload)
    } else if text.starts_with(LOAD_PREFIX) {
        Command::Load
    } else {
        Command::Echo(text)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Most messages `load` returns.
    pub recent_limit: usize,
    /// Exclusive upper bound of the `slow` delay.
    pub max_delay: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            recent_limit: 5,
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl DispatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            recent_limit: config.store.recent_limit,
            max_delay: Duration::from_millis(config.commands.max_delay_ms),
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    state: Arc<ConversationStates>,
    telemetry: Arc<dyn TelemetrySink>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        state: Arc<ConversationStates>,
        telemetry: Arc<dyn TelemetrySink>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            state,
            telemetry,
            options,
        }
    }

    pub fn state(&self) -> &Arc<ConversationStates> {
        &self.state
    }

    /// BotQuestion event for a message turn; skipped for empty text.
    fn track_question(&self, turn: &Turn, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut props = Properties::new();
        props.insert("BotQuestion".to_string(), text.to_string());
        if let Some(name) = &turn.sender_name {
            props.insert("Name".to_string(), name.clone());
        }
        props.insert("Channel".to_string(), turn.channel_id.clone());
        props.insert("ConversationId".to_string(), turn.conversation_id.clone());
        self.telemetry.track_event(BOT_QUESTION_EVENT, &props);
    }

    async fn count_turn(&self, conversation_id: &str) -> u64 {
        let next = self
            .state
            .update(conversation_id, TURN_COUNT_PROPERTY, |v| {
                Value::from(v.and_then(Value::as_u64).unwrap_or(0) + 1)
            })
            .await;
        next.as_u64().unwrap_or(0)
    }

    async fn run_command(&self, command: Command<'_>) -> Result<String, TurnError> {
        match command {
            Command::Fault => Err(handlers::inject_fault()),
            Command::Slow => {
                let delay = handlers::simulate_latency(self.options.max_delay).await;
                Ok(format!("That was slow... {}ms", delay.as_millis()))
            }
            Command::Save(payload) => {
                handlers::save_message(self.store.as_ref(), payload).await?;
                Ok(format!("Saved {} to the DB", payload))
            }
            Command::Load => {
                let contents =
                    handlers::load_recent(self.store.as_ref(), self.options.recent_limit).await?;
                let mut reply = String::from(LOAD_HEADER);
                for content in contents {
                    reply.push_str(&content);
                    reply.push('\n');
                }
                Ok(reply)
            }
            Command::Echo(text) => Ok(format!("You sent '{}'", text)),
        }
    }
}

#[async_trait]
impl TurnProcessor for Dispatcher {
    async fn process_turn(&self, turn: &Turn) -> Result<String, TurnError> {
        let text = match &turn.kind {
            TurnKind::Event { name } => return Ok(format!("{} event detected", name)),
            TurnKind::Message { text } => text.as_str(),
        };
        self.track_question(turn, text);
        let count = self.count_turn(&turn.conversation_id).await;
        let command = classify(text);
        log::debug!(
            "turn {} in conversation {} ({}): {:?}",
            count,
            turn.conversation_id,
            turn.channel_id,
            command
        );
        self.run_command(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryMessageStore, MessageRecord};
    use crate::telemetry::MemoryTelemetry;
    use proptest::prelude::*;

    struct Harness {
        dispatcher: Dispatcher,
        store: Arc<MemoryMessageStore>,
        telemetry: Arc<MemoryTelemetry>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryMessageStore::new());
        let telemetry = Arc::new(MemoryTelemetry::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(ConversationStates::new()),
            telemetry.clone(),
            DispatchOptions::default(),
        );
        Harness {
            dispatcher,
            store,
            telemetry,
        }
    }

    fn msg(text: &str) -> Turn {
        Turn::message("test", "conv-1", text)
    }

    /// Store that is always unreachable.
    struct DownStore;

    #[async_trait]
    impl MessageStore for DownStore {
        async fn append(&self, _content: &str) -> Result<MessageRecord, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn query_recent(&self, _limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[test]
    fn classify_commands() {
        assert_eq!(classify("error"), Command::Fault);
        assert_eq!(classify("slow"), Command::Slow);
        assert_eq!(classify("save hello"), Command::Save("hello"));
        assert_eq!(classify("save "), Command::Save(""));
        assert_eq!(classify("load"), Command::Load);
        assert_eq!(classify("loader"), Command::Load);
        assert_eq!(classify("save"), Command::Echo("save"));
        assert_eq!(classify("Error"), Command::Echo("Error"));
        assert_eq!(classify(" slow"), Command::Echo(" slow"));
        assert_eq!(classify("errors"), Command::Echo("errors"));
    }

    #[tokio::test]
    async fn event_turns_are_acknowledged_without_side_effects() {
        let h = harness();
        let turn = Turn::event("test", "conv-1", "conversationUpdate");
        let reply = h.dispatcher.process_turn(&turn).await.unwrap();
        assert_eq!(reply, "conversationUpdate event detected");
        assert!(h.telemetry.records().is_empty());
        assert!(!h.dispatcher.state().contains("conv-1").await);
    }

    #[tokio::test]
    async fn echo_reply() {
        let h = harness();
        let reply = h.dispatcher.process_turn(&msg("hi there")).await.unwrap();
        assert_eq!(reply, "You sent 'hi there'");
    }

    #[tokio::test]
    async fn error_command_propagates_fault_without_store_mutation() {
        let h = harness();
        let err = h.dispatcher.process_turn(&msg("error")).await.unwrap_err();
        assert!(matches!(err, TurnError::InjectedFault(_)));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_command_reports_delay() {
        let h = harness();
        let started = tokio::time::Instant::now();
        let reply = h.dispatcher.process_turn(&msg("slow")).await.unwrap();
        let elapsed = started.elapsed();

        let ms: u64 = reply
            .strip_prefix("That was slow... ")
            .and_then(|s| s.strip_suffix("ms"))
            .and_then(|s| s.parse().ok())
            .unwrap();
        assert!(ms < 5000);
        assert!(elapsed >= Duration::from_millis(ms));
        assert!(elapsed <= Duration::from_millis(ms + 1));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn slow_turn_does_not_block_other_conversations() {
        let Harness { dispatcher, .. } = harness();
        let dispatcher = Arc::new(dispatcher);

        let slow = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                let reply = dispatcher
                    .process_turn(&Turn::message("test", "a", "slow"))
                    .await;
                (reply, tokio::time::Instant::now())
            }
        });
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        let echo = dispatcher
            .process_turn(&Turn::message("test", "b", "hi"))
            .await
            .unwrap();
        let echo_done = tokio::time::Instant::now();
        assert_eq!(echo, "You sent 'hi'");
        assert_eq!(echo_done - started, Duration::ZERO);

        let (reply, slow_done) = slow.await.unwrap();
        assert!(reply.unwrap().starts_with("That was slow... "));
        assert!(slow_done >= echo_done);
    }

    #[tokio::test]
    async fn cancelled_save_leaves_whole_record_or_nothing() {
        let h = harness();
        let _ = tokio::time::timeout(
            Duration::ZERO,
            h.dispatcher.process_turn(&msg("save dropped")),
        )
        .await;

        let records = h.store.query_recent(10).await.unwrap();
        assert!(records.len() <= 1);
        if let Some(r) = records.first() {
            assert_eq!(r.id, 1);
            assert_eq!(r.content, "dropped");
        }

        let next = h.store.append("next").await.unwrap();
        assert_eq!(next.id, records.len() as i64 + 1);
        let saved = h.dispatcher.process_turn(&msg("save after")).await.unwrap();
        assert_eq!(saved, "Saved after to the DB");
        let recent = h.store.query_recent(10).await.unwrap();
        assert_eq!(recent[0].content, "after");
        assert!(recent.windows(2).all(|p| p[0].id > p[1].id));
    }

    #[tokio::test]
    async fn save_then_load() {
        let h = harness();
        let saved = h.dispatcher.process_turn(&msg("save hello")).await.unwrap();
        assert_eq!(saved, "Saved hello to the DB");
        let loaded = h.dispatcher.process_turn(&msg("load")).await.unwrap();
        assert_eq!(loaded, "Loaded these messages from the DB:\nhello\n");
    }

    #[tokio::test]
    async fn load_returns_five_newest_first() {
        let h = harness();
        for i in 1..=7 {
            h.dispatcher
                .process_turn(&msg(&format!("save p{}", i)))
                .await
                .unwrap();
        }
        let loaded = h.dispatcher.process_turn(&msg("load")).await.unwrap();
        let lines: Vec<&str> = loaded.lines().collect();
        assert_eq!(
            lines,
            vec!["Loaded these messages from the DB:", "p7", "p6", "p5", "p4", "p3"]
        );
    }

    #[tokio::test]
    async fn load_on_empty_store_is_header_only() {
        let h = harness();
        let loaded = h.dispatcher.process_turn(&msg("load more")).await.unwrap();
        assert_eq!(loaded, LOAD_HEADER);
    }

    #[tokio::test]
    async fn store_failures_propagate_as_persistence() {
        let dispatcher = Dispatcher::new(
            Arc::new(DownStore),
            Arc::new(ConversationStates::new()),
            Arc::new(MemoryTelemetry::new()),
            DispatchOptions::default(),
        );
        for text in ["save x", "load"] {
            let err = dispatcher.process_turn(&msg(text)).await.unwrap_err();
            assert!(matches!(err, TurnError::Persistence(StoreError::Unavailable(_))));
        }
    }

    #[tokio::test]
    async fn question_event_carries_turn_properties() {
        let h = harness();
        let turn = Turn::message("telegram", "42", "hello").with_sender("ada");
        h.dispatcher.process_turn(&turn).await.unwrap();

        let events = h.telemetry.events(BOT_QUESTION_EVENT);
        assert_eq!(events.len(), 1);
        let props = &events[0];
        assert_eq!(props.get("BotQuestion").map(String::as_str), Some("hello"));
        assert_eq!(props.get("Name").map(String::as_str), Some("ada"));
        assert_eq!(props.get("Channel").map(String::as_str), Some("telegram"));
        assert_eq!(props.get("ConversationId").map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn question_event_skipped_for_empty_text_and_emitted_for_failures() {
        let h = harness();
        assert_eq!(h.dispatcher.process_turn(&msg("")).await.unwrap(), "You sent ''");
        assert!(h.telemetry.events(BOT_QUESTION_EVENT).is_empty());

        let _ = h.dispatcher.process_turn(&msg("error")).await;
        let events = h.telemetry.events(BOT_QUESTION_EVENT);
        assert_eq!(events.len(), 1);
        assert!(!events[0].contains_key("Name"));
    }

    #[tokio::test]
    async fn turn_count_is_scoped_per_conversation() {
        let h = harness();
        for _ in 0..3 {
            h.dispatcher
                .process_turn(&Turn::message("test", "a", "hi"))
                .await
                .unwrap();
        }
        h.dispatcher
            .process_turn(&Turn::message("test", "b", "hi"))
            .await
            .unwrap();
        let state = h.dispatcher.state();
        assert_eq!(state.get("a", TURN_COUNT_PROPERTY).await, Some(Value::from(3)));
        assert_eq!(state.get("b", TURN_COUNT_PROPERTY).await, Some(Value::from(1)));
    }

    proptest! {
        #[test]
        fn non_command_text_is_echoed(text in any::<String>()) {
            prop_assume!(text != "error" && text != "slow");
            prop_assume!(!text.starts_with("save ") && !text.starts_with("load"));

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let h = harness();
            let reply = rt.block_on(h.dispatcher.process_turn(&msg(&text))).unwrap();
            prop_assert_eq!(reply, format!("You sent '{}'", text));
        }

        #[test]
        fn save_payload_is_everything_after_prefix(payload in ".*") {
            let text = format!("save {}", payload);
            prop_assert_eq!(classify(&text), Command::Save(payload.as_str()));
        }
    }
}
