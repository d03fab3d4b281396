//! Postal-code region identifier.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A 4-digit Swiss postal code identifying one warning feed.
///
/// The code is an opaque key. It is only validated when it enters the
/// system (chat commands, CLI arguments).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    /// Number of digits in a postal code.
    pub const WIDTH: usize = 4;

    /// Parse a region from a string that must be exactly four digits.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() == Self::WIDTH && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(AppError::validation(format!(
                "'{s}' is not a {}-digit postal code",
                Self::WIDTH
            )))
        }
    }

    /// Find the first run of exactly four ASCII digits anywhere in free text.
    ///
    /// The run may touch letters ("PLZ8045"); longer digit runs never match.
    pub fn find_in(text: &str) -> Option<Self> {
        let digits = Regex::new(r"[0-9]+").ok()?;
        digits
            .find_iter(text)
            .find(|m| m.len() == Self::WIDTH)
            .map(|m| Self(m.as_str().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
