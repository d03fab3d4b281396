//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::Region;

/// Placeholder substituted with the postal code in the page URL template.
pub const REGION_PLACEHOLDER: &str = "{region}";

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Bulletin page fetching
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Section markers of the bulletin page
    #[serde(default)]
    pub parser: ParserConfig,

    /// Chat transport settings
    #[serde(default)]
    pub bot: BotConfig,

    /// Where subscriber and cache state is kept
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// User-facing reply templates
    #[serde(default)]
    pub messages: MessagesConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    ///
    /// A file that exists but does not parse is still an error. The flag
    /// tells whether a file was read.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<(Self, bool)> {
        let path = path.as_ref();
        if path.exists() {
            Ok((Self::load(path)?, true))
        } else {
            Ok((Self::default(), false))
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if !self.fetch.url_template.contains(REGION_PLACEHOLDER) {
            return Err(AppError::validation(format!(
                "fetch.url_template must contain {REGION_PLACEHOLDER}"
            )));
        }
        self.fetch.page_url(&Region::parse("8000")?)?;
        if self.fetch.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetch.user_agent is empty"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if self.fetch.interval_secs == 0 {
            return Err(AppError::validation("fetch.interval_secs must be > 0"));
        }
        if self.bot.send_timeout_secs == 0 {
            return Err(AppError::validation("bot.send_timeout_secs must be > 0"));
        }
        Url::parse(&self.bot.api_base)?;
        self.parser.validate()?;
        Ok(())
    }
}

/// Bulletin page fetching behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Page URL with a `{region}` placeholder
    #[serde(default = "defaults::url_template")]
    pub url_template: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Pause between two fetch cycles in seconds
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,
}

impl FetchConfig {
    /// Build the bulletin page URL for a region.
    pub fn page_url(&self, region: &Region) -> Result<Url> {
        let raw = self.url_template.replace(REGION_PLACEHOLDER, region.as_str());
        Ok(Url::parse(&raw)?)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url_template: defaults::url_template(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            interval_secs: defaults::interval(),
        }
    }
}

/// Literal markers that delimit the warning section of a bulletin page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// CSS selector of the element holding the bulletin text
    #[serde(default = "defaults::content_selector")]
    pub content_selector: String,

    /// Line marking the start of the warning section
    #[serde(default = "defaults::header_marker")]
    pub header_marker: String,

    /// Line marking the end of the warning section
    #[serde(default = "defaults::footer_marker")]
    pub footer_marker: String,

    /// Phrase shown when the region has no warnings
    #[serde(default = "defaults::all_clear_marker")]
    pub all_clear_marker: String,

    /// Phrase closing each warning item
    #[serde(default = "defaults::item_end_marker")]
    pub item_end_marker: String,

    /// Keyword of the validity-range line
    #[serde(default = "defaults::validity_marker")]
    pub validity_marker: String,

    /// Prefix of the region qualifier line dropped from items
    #[serde(default = "defaults::region_qualifier_prefix")]
    pub region_qualifier_prefix: String,
}

impl ParserConfig {
    pub fn validate(&self) -> Result<()> {
        let markers = [
            ("parser.content_selector", &self.content_selector),
            ("parser.header_marker", &self.header_marker),
            ("parser.footer_marker", &self.footer_marker),
            ("parser.all_clear_marker", &self.all_clear_marker),
            ("parser.item_end_marker", &self.item_end_marker),
            ("parser.validity_marker", &self.validity_marker),
            ("parser.region_qualifier_prefix", &self.region_qualifier_prefix),
        ];
        for (name, value) in markers {
            if value.trim().is_empty() {
                return Err(AppError::validation(format!("{name} is empty")));
            }
        }
        Ok(())
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            content_selector: defaults::content_selector(),
            header_marker: defaults::header_marker(),
            footer_marker: defaults::footer_marker(),
            all_clear_marker: defaults::all_clear_marker(),
            item_end_marker: defaults::item_end_marker(),
            validity_marker: defaults::validity_marker(),
            region_qualifier_prefix: defaults::region_qualifier_prefix(),
        }
    }
}

/// Telegram bot transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot API base URL
    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// Bot token; read from `token_env` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable holding the bot token
    #[serde(default = "defaults::token_env")]
    pub token_env: String,

    /// Long-polling timeout for `getUpdates` in seconds
    #[serde(default = "defaults::poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Upper bound for a single outbound message in seconds
    #[serde(default = "defaults::send_timeout")]
    pub send_timeout_secs: u64,
}

impl BotConfig {
    /// Resolve the bot token from the config file or the environment.
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.trim().is_empty()) {
            return Ok(token.clone());
        }
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                AppError::config(format!(
                    "No bot token: set bot.token or the {} environment variable",
                    self.token_env
                ))
            })
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::api_base(),
            token: None,
            token_env: defaults::token_env(),
            poll_timeout_secs: defaults::poll_timeout(),
            send_timeout_secs: defaults::send_timeout(),
        }
    }
}

/// Local state file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the state files
    #[serde(default = "defaults::storage_dir")]
    pub dir: PathBuf,

    /// Subscriber registry file name
    #[serde(default = "defaults::registry_file")]
    pub registry_file: String,

    /// Dedup cache file name
    #[serde(default = "defaults::cache_file")]
    pub cache_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: defaults::storage_dir(),
            registry_file: defaults::registry_file(),
            cache_file: defaults::cache_file(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

/// Reply templates.
///
/// Supported placeholders: `{name}` in `welcome`, `{region}` in `registered`,
/// `{count}` in `unregistered`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "defaults::msg_welcome")]
    pub welcome: String,
    #[serde(default = "defaults::msg_registered")]
    pub registered: String,
    #[serde(default = "defaults::msg_register_failed")]
    pub register_failed: String,
    #[serde(default = "defaults::msg_unregistered")]
    pub unregistered: String,
}

impl MessagesConfig {
    /// Without a name the slot and the space before it are dropped.
    pub fn welcome(&self, name: Option<&str>) -> String {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => self.welcome.replace("{name}", name),
            None => self.welcome.replace(" {name}", "").replace("{name}", ""),
        }
    }

    pub fn registered(&self, region: &Region) -> String {
        self.registered.replace("{region}", region.as_str())
    }

    pub fn unregistered(&self, count: usize) -> String {
        self.unregistered.replace("{count}", &count.to_string())
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            welcome: defaults::msg_welcome(),
            registered: defaults::msg_registered(),
            register_failed: defaults::msg_register_failed(),
            unregistered: defaults::msg_unregistered(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Fetch defaults
    pub fn url_template() -> String {
        "http://alarm.meteocentrale.ch/getwarning_de.php?plz={region}&uwz=UWZ-CH&lang=de".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; unwetter/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn interval() -> u64 {
        600
    }

    // Parser defaults
    pub fn content_selector() -> String {
        "#content".into()
    }
    pub fn header_marker() -> String {
        "Unwetterwarnungen".into()
    }
    pub fn footer_marker() -> String {
        "Die Höhenstufen des Bereichs".into()
    }
    pub fn all_clear_marker() -> String {
        "keine Warnung aktiv".into()
    }
    pub fn item_end_marker() -> String {
        "zuletzt aktualisiert".into()
    }
    pub fn validity_marker() -> String {
        "gültig".into()
    }
    pub fn region_qualifier_prefix() -> String {
        "gültig für:".into()
    }

    // Bot defaults
    pub fn api_base() -> String {
        "https://api.telegram.org".into()
    }
    pub fn token_env() -> String {
        "TOKEN".into()
    }
    pub fn poll_timeout() -> u64 {
        60
    }
    pub fn send_timeout() -> u64 {
        10
    }

    // Storage defaults
    pub fn storage_dir() -> PathBuf {
        PathBuf::from("storage")
    }
    pub fn registry_file() -> String {
        "volume.json".into()
    }
    pub fn cache_file() -> String {
        "cache.json".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    // Message defaults
    pub fn msg_welcome() -> String {
        "Hallo {name}!\n\
         Dieser Bot liefert Unwetterwarnungen für die Schweiz.\n\n\
         Bitte gib Deine Postleitzahl ein."
            .into()
    }
    pub fn msg_registered() -> String {
        "Du wirst ab jetzt alle Unwetterwarnungen für die PLZ \"{region}\" von mir erhalten!\n\n\
         Um Dich abzumelden, einfach die Nachricht \"abmelden\" schicken."
            .into()
    }
    pub fn msg_register_failed() -> String {
        "Ich konnte Dich nicht für diese PLZ anmelden!".into()
    }
    pub fn msg_unregistered() -> String {
        "Du wurdest von {count} PLZ'en abgemeldet.".into()
    }
}
