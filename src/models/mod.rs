// src/models/mod.rs

//! Domain models for the warning bot.
//!
//! This module contains the data structures shared by the parser, the
//! dispatcher and the storage layer.

mod config;
mod region;
mod subscriber;
mod warning;

// Re-export all public types
pub use config::{
    BotConfig, Config, FetchConfig, LoggingConfig, MessagesConfig, ParserConfig, StorageConfig,
};
pub use region::Region;
pub use subscriber::{ChatId, Command, Subscriber, UserId};
pub use warning::Warning;
