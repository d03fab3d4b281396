// src/pipeline/command.rs

//! Inbound chat command classification.

use crate::models::Region;

/// Keyword that unsubscribes a user from all regions.
pub const UNSUBSCRIBE_KEYWORD: &str = "abmelden";

/// What a chat message asks the bot to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Subscribe to a region's warnings
    Register(Region),
    /// Drop all subscriptions
    Unregister,
    /// Anything else: greet and explain
    Start,
}

/// Classify message text. A postal code wins over the unsubscribe keyword.
pub fn classify(text: &str) -> Intent {
    if let Some(region) = Region::find_in(text) {
        Intent::Register(region)
    } else if text.contains(UNSUBSCRIBE_KEYWORD) {
        Intent::Unregister
    } else {
        Intent::Start
    }
}
