// src/services/telegram.rs

//! Telegram Bot API transport.
//!
//! Provides the outbound [`MessageSender`] used by the dispatcher and a
//! long-polling loop that turns incoming text messages into [`Command`]s.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{AppError, Result};
use crate::models::{BotConfig, ChatId, Command};

/// Markup applied to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Markdown,
}

/// Outbound chat transport.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Deliver one message to a chat.
    async fn send_message(&self, chat_id: ChatId, text: &str, format: TextFormat) -> Result<()>;
}

/// Delay before polling again after a failed `getUpdates` call.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Standard Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Bot account returned by `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    from: Option<BotUser>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

impl Update {
    /// Text messages from a known user become commands; everything else is
    /// ignored.
    fn into_command(self) -> Option<(Command, Option<String>)> {
        let message = self.message?;
        let from = message.from?;
        let text = message.text?;

        let command = Command::new(from.id, message.chat.id, text).with_sender_name(from.first_name);
        Some((command, from.username))
    }
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: ChatId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

/// Telegram bot client.
pub struct TelegramBot {
    client: reqwest::Client,
    base_url: String,
    poll_timeout_secs: u64,
}

impl TelegramBot {
    /// Create a client for the bot identified by `token`.
    pub fn new(config: &BotConfig, token: &str) -> Result<Self> {
        // Long polls must not be cut off by the client timeout.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                config.poll_timeout_secs + config.send_timeout_secs,
            ))
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", config.api_base.trim_end_matches('/'), token),
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response: ApiResponse<T> = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await?
            .json()
            .await?;
        unwrap_response(method, response)
    }

    /// Identify the bot account behind the token.
    pub async fn get_me(&self) -> Result<BotUser> {
        self.call("getMe", &serde_json::json!({})).await
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let request = GetUpdates {
            offset,
            timeout: self.poll_timeout_secs,
            allowed_updates: ["message"],
        };
        self.call("getUpdates", &request).await
    }

    /// Long-poll for incoming messages and forward them as commands.
    ///
    /// Returns when the receiving side of `commands` is gone. Polling errors
    /// are logged and retried after a short delay.
    pub async fn poll_commands(&self, commands: UnboundedSender<Command>) -> Result<()> {
        let mut offset = 0;
        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    log::warn!("Polling for updates failed: {}", e);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some((command, username)) = update.into_command() else {
                    continue;
                };
                log::info!(
                    "[{}] {}",
                    username.as_deref().unwrap_or("unknown"),
                    command.text
                );
                if commands.send(command).is_err() {
                    log::info!("Command receiver closed, stopping update polling");
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl MessageSender for TelegramBot {
    async fn send_message(&self, chat_id: ChatId, text: &str, format: TextFormat) -> Result<()> {
        let request = SendMessage {
            chat_id,
            text,
            parse_mode: match format {
                TextFormat::Plain => None,
                TextFormat::Markdown => Some("Markdown"),
            },
        };
        self.call::<_, serde_json::Value>("sendMessage", &request)
            .await
            .map(|_| ())
            .map_err(|e| AppError::send(chat_id, e))
    }
}

fn unwrap_response<T>(method: &str, response: ApiResponse<T>) -> Result<T> {
    match response {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse { description, .. } => Err(AppError::Telegram(format!(
            "{method} failed: {}",
            description.unwrap_or_else(|| "no description".to_string())
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_with_text_becomes_command() {
        let update: Update = serde_json::from_str(
            r#"{
                "update_id": 42,
                "message": {
                    "message_id": 1,
                    "chat": {"id": 11, "type": "private"},
                    "from": {"id": 1, "is_bot": false, "first_name": "Anna", "username": "anna"},
                    "text": "8045"
                }
            }"#,
        )
        .unwrap();

        let (command, username) = update.into_command().unwrap();
        assert_eq!(command.user_id, 1);
        assert_eq!(command.chat_id, 11);
        assert_eq!(command.text, "8045");
        assert_eq!(command.sender_name.as_deref(), Some("Anna"));
        assert_eq!(username.as_deref(), Some("anna"));
    }

    #[test]
    fn test_update_without_message_is_ignored() {
        let update: Update =
            serde_json::from_str(r#"{"update_id": 43, "edited_message": {}}"#).unwrap();
        assert!(update.into_command().is_none());
    }

    #[test]
    fn test_send_message_payload() {
        let request = SendMessage {
            chat_id: 11,
            text: "*Sturm*",
            parse_mode: Some("Markdown"),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"chat_id":11,"text":"*Sturm*","parse_mode":"Markdown"}"#
        );

        let plain = SendMessage {
            chat_id: 11,
            text: "hi",
            parse_mode: None,
        };
        assert_eq!(
            serde_json::to_string(&plain).unwrap(),
            r#"{"chat_id":11,"text":"hi"}"#
        );
    }

    #[test]
    fn test_error_response_is_telegram_error() {
        let response: ApiResponse<BotUser> =
            serde_json::from_str(r#"{"ok": false, "description": "Unauthorized"}"#).unwrap();
        let err = unwrap_response("getMe", response).unwrap_err();
        assert_eq!(err.to_string(), "Telegram error: getMe failed: Unauthorized");
    }

    #[test]
    fn test_base_url_contains_token() {
        let bot = TelegramBot::new(&BotConfig::default(), "123:abc").unwrap();
        assert_eq!(bot.base_url, "https://api.telegram.org/bot123:abc");
    }
}
