//! Telegram Bot HTTP API client.

use std::time::Duration;

use async_trait::async_trait;
use interfaces::{ChatId, ChatPlatform, MessageId, PlatformError};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::types::Result;

const API_BASE: &str = "https://api.telegram.org";
const NOT_MODIFIED: &str = "message is not modified";

/// Longest message text Telegram accepts, in characters after entity parsing.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Seconds a `getUpdates` call waits for new updates.
pub const LONG_POLL_SECONDS: u64 = 30;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: MessageId,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: MessageId,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    username: Option<String>,
}

pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(api_token: &str) -> Result<Self> {
        Self::with_base_url(format!("{API_BASE}/bot{api_token}"))
    }

    /// `base_url` already includes the `bot<token>` path segment.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECONDS + 30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> std::result::Result<T, PlatformError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        let reply: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        if reply.ok {
            if let Some(result) = reply.result {
                return Ok(result);
            }
        }

        let description = reply
            .description
            .unwrap_or_else(|| format!("{method} returned no result"));
        if description.contains(NOT_MODIFIED) {
            return Err(PlatformError::NotModified);
        }
        Err(PlatformError::Api {
            code: reply.error_code.unwrap_or_default(),
            description,
        })
    }

    /// Username of the bot, used to recognise `/command@username`.
    pub async fn username(&self) -> std::result::Result<Option<String>, PlatformError> {
        let me: BotUser = self.call("getMe", json!({})).await?;
        Ok(me.username)
    }

    /// Long-polls for updates after `offset`.
    pub async fn get_updates(&self, offset: Option<i64>) -> std::result::Result<Vec<Update>, PlatformError> {
        let mut body = json!({
            "timeout": LONG_POLL_SECONDS,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call("getUpdates", body).await
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> std::result::Result<MessageId, PlatformError> {
        let sent: SentMessage = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": true,
                }),
            )
            .await
            .inspect_err(|e| log_rejected_text("sendMessage", chat_id, text, e))?;
        debug!(chat_id, message_id = sent.message_id, "Message sent");
        Ok(sent.message_id)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> std::result::Result<(), PlatformError> {
        // The result is the edited message, or `true` for inline messages.
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "text": text,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": true,
                }),
            )
            .await
            .inspect_err(|e| log_rejected_text("editMessageText", chat_id, text, e))?;
        Ok(())
    }

    async fn pin_message(&self, chat_id: ChatId, message_id: MessageId) -> std::result::Result<(), PlatformError> {
        let _: bool = self
            .call(
                "pinChatMessage",
                json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "disable_notification": true,
                }),
            )
            .await?;
        Ok(())
    }
}

fn log_rejected_text(method: &str, chat_id: ChatId, text: &str, error: &PlatformError) {
    if error.is_not_modified() {
        return;
    }
    let chars = text.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        warn!(
            method,
            chat_id,
            chars,
            limit = MAX_MESSAGE_CHARS,
            "Message text exceeds the Telegram limit: {}", error
        );
    } else {
        warn!(method, chat_id, chars, "Telegram rejected message: {}", error);
    }
}
