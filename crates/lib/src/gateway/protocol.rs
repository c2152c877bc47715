//! HTTP wire types for `POST /api/messages`.

use crate::error::TurnError;
use crate::turn::{Turn, TurnKind};
use serde::{Deserialize, Serialize};

/// Inbound turn payload. `type` defaults to "message"; any other value is an event turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    #[serde(rename = "type", default = "default_turn_type")]
    pub typ: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
    #[serde(default)]
    pub conversation_id: String,
}

fn default_turn_type() -> String {
    "message".to_string()
}

fn default_channel_id() -> String {
    "http".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub reply: String,
}

impl TryFrom<TurnRequest> for Turn {
    type Error = TurnError;

    fn try_from(req: TurnRequest) -> Result<Self, Self::Error> {
        if req.conversation_id.trim().is_empty() {
            return Err(TurnError::InvalidInput("missing conversationId".to_string()));
        }
        let kind = if req.typ == "message" {
            let text = req
                .text
                .ok_or_else(|| TurnError::InvalidInput("message turn without text".to_string()))?;
            TurnKind::Message { text }
        } else {
            TurnKind::Event { name: req.typ }
        };
        Ok(Turn {
            kind,
            conversation_id: req.conversation_id,
            sender_name: req.sender_name.filter(|s| !s.is_empty()),
            channel_id: req.channel_id,
        })
    }
}
