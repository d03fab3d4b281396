//! Service layer for the warning bot.
//!
//! This module contains the adapters around the core:
//! - Bulletin page parsing (`WarningParser`)
//! - Bulletin page fetching (`PageSource`, `HttpPageSource`)
//! - Chat transport (`MessageSender`, `TelegramBot`)

mod fetcher;
mod parser;
mod telegram;

pub use fetcher::{HttpPageSource, PageSource};
pub use parser::WarningParser;
pub use telegram::{BotUser, MessageSender, TelegramBot, TextFormat};
