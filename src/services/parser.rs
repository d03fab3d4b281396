// src/services/parser.rs

//! Bulletin page parser.
//!
//! Turns the HTML of a region's bulletin page into structured [`Warning`]s.
//! The text handling is an ordered pipeline of small steps over line
//! sequences:
//!
//! 1. [`WarningParser::extract_window`]: keep the warning section only
//! 2. [`WarningParser::is_all_clear`]: detect the "no warning" page
//! 3. [`WarningParser::segment_items`]: cut the section into items
//! 4. [`WarningParser::drop_region_qualifier`] and
//!    [`WarningParser::emphasize_validity`]: per-item rewrites
//! 5. [`WarningParser::split_item`]: title, body and issued line

use regex::Regex;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{ParserConfig, Warning};

/// Parser for meteocentrale bulletin pages.
#[derive(Debug, Clone)]
pub struct WarningParser {
    config: ParserConfig,
    content: Selector,
    field_gap: Regex,
    item_marker: Regex,
}

impl WarningParser {
    /// Create a parser for the given markers.
    pub fn new(config: ParserConfig) -> Result<Self> {
        let content = Selector::parse(&config.content_selector).map_err(|e| {
            AppError::config(format!(
                "Invalid selector '{}': {e:?}",
                config.content_selector
            ))
        })?;
        let field_gap = Regex::new(r"\s{2,}")
            .map_err(|e| AppError::config(format!("field gap pattern: {e}")))?;
        let item_marker = Regex::new(r"^\(\d+\)$")
            .map_err(|e| AppError::config(format!("item marker pattern: {e}")))?;

        Ok(Self {
            config,
            content,
            field_gap,
            item_marker,
        })
    }

    /// Parse a bulletin page.
    ///
    /// Returns an empty list when the region has no active warnings and
    /// [`AppError::Parse`] when the content container is missing.
    pub fn parse(&self, html: &str) -> Result<Vec<Warning>> {
        let text = self.content_text(html)?;
        Ok(self.parse_text(&text))
    }

    /// Run the line pipeline on already extracted page text.
    pub fn parse_text(&self, text: &str) -> Vec<Warning> {
        let window = self.extract_window(text);
        if self.is_all_clear(&window) {
            return Vec::new();
        }

        self.segment_items(&window)
            .into_iter()
            .map(|item| self.drop_region_qualifier(item))
            .map(|item| self.emphasize_validity(item))
            .map(|item| self.split_item(&item))
            .collect()
    }

    /// Text of the content container, one text node per line.
    fn content_text(&self, html: &str) -> Result<String> {
        let document = Html::parse_document(html);
        let container = document.select(&self.content).next().ok_or_else(|| {
            AppError::parse(format!(
                "content container '{}' not found",
                self.config.content_selector
            ))
        })?;
        Ok(container.text().collect::<Vec<_>>().join("\n"))
    }

    /// Keep the lines between the header and the footer marker.
    ///
    /// Post: every header line, the footer line and everything after it
    /// are gone; remaining lines are trimmed and non-empty. No header means
    /// an empty window.
    pub fn extract_window(&self, text: &str) -> Vec<String> {
        let mut window = Vec::new();
        let mut inside = false;

        for line in text.lines() {
            if line.contains(&self.config.header_marker) {
                inside = true;
                continue;
            }
            if !inside {
                continue;
            }
            if line.contains(&self.config.footer_marker) {
                break;
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                window.push(trimmed.to_string());
            }
        }
        window
    }

    /// Whether the window states that no warning is active.
    pub fn is_all_clear(&self, window: &[String]) -> bool {
        window
            .iter()
            .any(|line| line.contains(&self.config.all_clear_marker))
    }

    /// Cut the window into raw items.
    ///
    /// Pre: trimmed, non-empty lines. Post: each item starts with a `(N)`
    /// marker line and its last line ends with the item end phrase. A marker
    /// whose block never reaches the phrase produces no item.
    pub fn segment_items(&self, window: &[String]) -> Vec<Vec<String>> {
        let end_marker = self.config.item_end_marker.as_str();
        let mut items = Vec::new();
        let mut current: Option<Vec<String>> = None;

        for line in window {
            let Some(mut item) = current.take() else {
                if self.item_marker.is_match(line) {
                    current = Some(vec![line.clone()]);
                }
                continue;
            };

            match line.find(end_marker) {
                Some(pos) => {
                    item.push(line[..pos + end_marker.len()].to_string());
                    items.push(item);
                }
                None => {
                    item.push(line.clone());
                    current = Some(item);
                }
            }
        }

        if let Some(unterminated) = current {
            log::debug!(
                "Dropping item {:?} without '{}'",
                unterminated.first(),
                end_marker
            );
        }
        items
    }

    /// Remove the region qualifier line (`gültig für: ...`).
    ///
    /// Post: no line starts with the qualifier prefix; order is unchanged.
    pub fn drop_region_qualifier(&self, item: Vec<String>) -> Vec<String> {
        item.into_iter()
            .filter(|line| !line.starts_with(&self.config.region_qualifier_prefix))
            .collect()
    }

    /// Emphasize the second field of validity lines.
    ///
    /// Pre: a validity line reads `gültig <A>  <B>` with the fields separated
    /// by two or more whitespace characters. Post: it reads
    /// `gültig <A> *<B>*`. Lines of any other shape are left alone.
    pub fn emphasize_validity(&self, item: Vec<String>) -> Vec<String> {
        item.into_iter()
            .map(|line| self.emphasize_line(&line).unwrap_or(line))
            .collect()
    }

    fn emphasize_line(&self, line: &str) -> Option<String> {
        let marker = self.config.validity_marker.as_str();
        let rest = line.strip_prefix(marker)?.strip_prefix(' ')?;
        let gap = self.field_gap.find(rest)?;

        let first = rest[..gap.start()].trim();
        let second = rest[gap.end()..].trim();
        if first.is_empty() || second.is_empty() {
            return None;
        }
        Some(format!("{marker} {first} *{second}*"))
    }

    /// Split a rewritten item into a warning.
    ///
    /// The title joins the lines after the marker up to the first validity
    /// line, the last line is the issued line and the body is everything in
    /// between. Without a validity line the title stays empty.
    pub fn split_item(&self, item: &[String]) -> Warning {
        let Some((issued, rest)) = item.split_last() else {
            return Warning::default();
        };
        let lines = rest.get(1..).unwrap_or_default();

        match lines
            .iter()
            .position(|line| line.contains(&self.config.validity_marker))
        {
            Some(k) => Warning::new(lines[..k].join(" "), lines[k..].to_vec(), issued.clone()),
            None => {
                log::debug!("Item without validity line: {:?}", item.first());
                Warning::new(String::new(), lines.to_vec(), issued.clone())
            }
        }
    }
}

impl Default for WarningParser {
    fn default() -> Self {
        Self::new(ParserConfig::default()).expect("default parser markers are valid")
    }
}
