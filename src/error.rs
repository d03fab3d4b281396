// src/error.rs

//! Unified error handling for the warning bot.

use std::fmt;

use thiserror::Error;

/// Result type alias for bot operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Bulletin page could not be fetched for a region
    #[error("Fetch error for region {region}: {message}")]
    Fetch { region: String, message: String },

    /// Bulletin page did not have the expected structure
    #[error("Parse error: {0}")]
    Parse(String),

    /// User is already on the region's subscriber list
    #[error("user {user_id} is already subscribed to region {region:?}")]
    AlreadySubscribed { user_id: i64, region: String },

    /// Outbound chat message was rejected or failed
    #[error("Send error for chat {chat_id}: {message}")]
    Send { chat_id: i64, message: String },

    /// Chat API returned an error payload
    #[error("Telegram error: {0}")]
    Telegram(String),

    /// Operation exceeded its time budget
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a fetch error for a region.
    pub fn fetch(region: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            region: region.into(),
            message: message.to_string(),
        }
    }

    /// Create a structural parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create a send error for a chat.
    pub fn send(chat_id: i64, message: impl fmt::Display) -> Self {
        Self::Send {
            chat_id,
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the failure only affects the current fetch cycle.
    ///
    /// Fetch and structural parse failures are retried on the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::Parse(_) | Self::Http(_) | Self::Timeout(_)
        )
    }
}
