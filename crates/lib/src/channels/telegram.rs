//! Telegram channel: long-poll getUpdates (or webhook) in, sendMessage out.

use crate::channels::registry::{ChannelError, ChannelHandle};
use crate::turn::Turn;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;

/// Event name used for edits to earlier messages.
const EDITED_MESSAGE_EVENT: &str = "messageUpdate";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub edited_message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

impl TelegramUser {
    fn display_name(&self) -> Option<&str> {
        self.username
            .as_deref()
            .or(self.first_name.as_deref())
            .filter(|s| !s.is_empty())
    }
}

impl TelegramUpdate {
    /// Text messages become message turns and edits become `messageUpdate` events.
    /// Anything else (stickers, joins, callbacks) yields None.
    pub fn into_turn(self, channel_id: &str) -> Option<Turn> {
        if let Some(msg) = self.message {
            let text = msg.text?;
            let turn = Turn::message(channel_id, msg.chat.id.to_string(), text);
            return Some(match msg.from.as_ref().and_then(TelegramUser::display_name) {
                Some(name) => turn.with_sender(name),
                None => turn,
            });
        }
        let edited = self.edited_message?;
        Some(Turn::event(
            channel_id,
            edited.chat.id.to_string(),
            EDITED_MESSAGE_EVENT,
        ))
    }
}

/// Telegram channel connector: long-polls for updates and sends replies via sendMessage.
pub struct TelegramChannel {
    token: Option<String>,
    api_base: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub const ID: &'static str = "telegram";

    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            api_base: telegram_api_base(),
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn method_url(&self, method: &str) -> Result<String, ChannelError> {
        let token = self
            .token
            .as_ref()
            .ok_or(ChannelError::NotConfigured("telegram bot token"))?;
        Ok(format!("{}/bot{}/{}", self.api_base, token, method))
    }

    /// Start the getUpdates long-poll loop and forward turns to the gateway. Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<Turn>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        method: &str,
    ) -> Result<Option<T>, ChannelError> {
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!("{} failed: {} {}", method, status, body)));
        }
        let data: ApiResponse<T> = res.json().await?;
        if !data.ok {
            return Err(ChannelError::Api(format!(
                "{} returned ok: false ({})",
                method,
                data.description.unwrap_or_default()
            )));
        }
        Ok(data.result)
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), ChannelError> {
        let mut url = format!("{}?timeout={}", self.method_url("getUpdates")?, LONG_POLL_TIMEOUT);
        if let Some(off) = offset {
            url.push_str(&format!("&offset={}", off));
        }
        let updates: Vec<TelegramUpdate> = self
            .call(self.client.get(&url), "getUpdates")
            .await?
            .unwrap_or_default();
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        Ok((updates, next_offset))
    }

    /// Set webhook URL (and optional secret). When set, Telegram POSTs updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({ "url": url });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        let req = self.client.post(self.method_url("setWebhook")?).json(&body);
        self.call::<serde_json::Value>(req, "setWebhook").await?;
        Ok(())
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        let req = self.client.post(self.method_url("deleteWebhook")?);
        self.call::<serde_json::Value>(req, "deleteWebhook").await?;
        Ok(())
    }

    /// Send a text message to a chat via sendMessage API.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let req = self.client.post(self.method_url("sendMessage")?).json(&body);
        self.call::<serde_json::Value>(req, "sendMessage").await?;
        Ok(())
    }
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, inbound_tx: mpsc::Sender<Turn>) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                offset = next.or(offset);
                for turn in updates
                    .into_iter()
                    .filter_map(|u| u.into_turn(TelegramChannel::ID))
                {
                    if inbound_tx.send(turn).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        Self::ID
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        TelegramChannel::send_message(self, conversation_id, text).await
    }
}

/// Telegram bot API base URL; TELEGRAM_API_BASE overrides it (tests, self-hosted bot API servers).
fn telegram_api_base() -> String {
    std::env::var("TELEGRAM_API_BASE")
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| TELEGRAM_API_BASE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::TurnKind;

    fn update(json: &str) -> TelegramUpdate {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn text_message_becomes_message_turn() {
        let u = update(
            r#"{"update_id":1,"message":{"chat":{"id":42},"from":{"username":"ada","first_name":"Ada"},"text":"save hi"}}"#,
        );
        let turn = u.into_turn("telegram").unwrap();
        assert_eq!(
            turn,
            Turn::message("telegram", "42", "save hi").with_sender("ada")
        );
    }

    #[test]
    fn sender_falls_back_to_first_name() {
        let u = update(r#"{"update_id":1,"message":{"chat":{"id":7},"from":{"first_name":"Ada"},"text":"hi"}}"#);
        assert_eq!(u.into_turn("telegram").unwrap().sender_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn edit_becomes_event_turn() {
        let u = update(r#"{"update_id":2,"edited_message":{"chat":{"id":42},"text":"fixed"}}"#);
        let turn = u.into_turn("telegram").unwrap();
        assert_eq!(
            turn.kind,
            TurnKind::Event {
                name: "messageUpdate".to_string()
            }
        );
        assert_eq!(turn.conversation_id, "42");
    }

    #[test]
    fn non_text_updates_are_skipped() {
        let u = update(r#"{"update_id":3,"message":{"chat":{"id":42}}}"#);
        assert!(u.into_turn("telegram").is_none());
        let u = update(r#"{"update_id":4}"#);
        assert!(u.into_turn("telegram").is_none());
    }

    #[tokio::test]
    async fn missing_token_is_not_configured() {
        let channel = TelegramChannel::new(None);
        assert!(matches!(
            channel.send_message("1", "hi").await,
            Err(ChannelError::NotConfigured(_))
        ));
    }
}
