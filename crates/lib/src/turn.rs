//! Inbound turn: one unit of conversational work that needs exactly one reply.
//!
//! Hosting transports (HTTP, Telegram, the CLI) adapt their native payloads into a [`Turn`]
//! and hand it to the dispatcher.

/// What arrived: a text message, or some other named activity (e.g. `conversationUpdate`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnKind {
    Message { text: String },
    Event { name: String },
}

/// A single inbound turn tied to a conversation identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub kind: TurnKind,
    /// Opaque, stable id grouping turns of the same conversation (e.g. Telegram chat id).
    pub conversation_id: String,
    pub sender_name: Option<String>,
    /// Channel the turn came from (e.g. "telegram", "http", "cli").
    pub channel_id: String,
}

impl Turn {
    pub fn message(
        channel_id: impl Into<String>,
        conversation_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind: TurnKind::Message { text: text.into() },
            conversation_id: conversation_id.into(),
            sender_name: None,
            channel_id: channel_id.into(),
        }
    }

    pub fn event(
        channel_id: impl Into<String>,
        conversation_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: TurnKind::Event { name: name.into() },
            conversation_id: conversation_id.into(),
            sender_name: None,
            channel_id: channel_id.into(),
        }
    }

    pub fn with_sender(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }
}
