//! Subscriber and inbound command data structures.

use serde::{Deserialize, Serialize};

/// Chat platform user identifier.
pub type UserId = i64;

/// Chat identifier used as delivery address.
pub type ChatId = i64;

/// One entry on a region's subscriber list.
///
/// Serialized with the capitalized keys used by existing volume files;
/// camel-case keys are accepted on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    /// External identity, unique per region
    #[serde(rename = "UserID", alias = "userID")]
    pub user_id: UserId,

    /// Where warnings are delivered
    #[serde(rename = "ChatID", alias = "chatID")]
    pub chat_id: ChatId,
}

impl Subscriber {
    pub fn new(user_id: UserId, chat_id: ChatId) -> Self {
        Self { user_id, chat_id }
    }
}

/// A text message received from a chat user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub text: String,
    /// First name of the sender, if the platform provides one
    pub sender_name: Option<String>,
}

impl Command {
    pub fn new(user_id: UserId, chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            user_id,
            chat_id,
            text: text.into(),
            sender_name: None,
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }
}
