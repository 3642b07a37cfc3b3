//! TOML configuration.
//!
//! ```toml
//! locale = "de_DE"
//! timezone = "Europe/Berlin"
//! db_path = "database.db"
//!
//! [crawler]
//! crawl_every = 300
//! date_range = [0, 6]
//!
//! [crawler.markdown]
//! date_format = "%A, %d. %B"
//! time_format = "%H:%M"
//!
//! [telegram]
//! api_token = "123:abc"
//! chat_ids = [-1001234]
//!
//! [[calendar_groups.family]]
//! type = "ical"
//! url = "https://example.com/family.ics"
//! name = "Family"
//! color = "#ff0000"
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{Locale, TimeZone, Utc};
use chrono_tz::Tz;
use interfaces::{CalendarFeedDescriptor, ChatId};
use serde::Deserialize;
use tracing::info;

use crate::types::{KnowseeError, Result};

pub const DEFAULT_WELCOME_MESSAGE: &str = "Hi! I keep a pinned digest of upcoming calendar events in this chat.\n\
Use /attach GROUP to add a calendar group, /calendars to list attached calendars, \
/detach NAME to remove one and /sync to refresh the digest now.";

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_db_path() -> String {
    "database.db".to_string()
}

fn default_crawl_every() -> u64 {
    300
}

fn default_date_range() -> (u32, u32) {
    (0, 6)
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_time_format() -> String {
    "%H:%M".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub calendar_groups: BTreeMap<String, Vec<CalendarFeedDescriptor>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Seconds between the end of one sync cycle and the start of the next.
    #[serde(default = "default_crawl_every")]
    pub crawl_every: u64,
    /// Days before and after today.
    #[serde(default = "default_date_range")]
    pub date_range: (u32, u32),
    #[serde(default)]
    pub skip_malformed_events: bool,
    #[serde(default)]
    pub markdown: MarkdownFormatConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            crawl_every: default_crawl_every(),
            date_range: default_date_range(),
            skip_malformed_events: false,
            markdown: MarkdownFormatConfig::default(),
        }
    }
}

impl CrawlerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.crawl_every)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkdownFormatConfig {
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_time_format")]
    pub time_format: String,
}

impl Default for MarkdownFormatConfig {
    fn default() -> Self {
        Self {
            date_format: default_date_format(),
            time_format: default_time_format(),
        }
    }
}

/// Chat ids may be written as numbers or strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ChatIdValue {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    chat_ids: Vec<ChatIdValue>,
    #[serde(default)]
    welcome_message: Option<String>,
}

impl TelegramConfig {
    /// Chats allowed to use the bot.
    pub fn authorized_chats(&self) -> Result<Vec<ChatId>> {
        self.chat_ids
            .iter()
            .map(|value| match value {
                ChatIdValue::Number(id) => Ok(*id),
                ChatIdValue::Text(text) => text
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| KnowseeError::Config(format!("invalid chat id `{text}`"))),
            })
            .collect()
    }

    pub fn welcome_message(&self) -> &str {
        self.welcome_message
            .as_deref()
            .unwrap_or(DEFAULT_WELCOME_MESSAGE)
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(KnowseeError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!(
            path = %path.display(),
            groups = config.calendar_groups.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.crawler.crawl_every == 0 {
            return Err(KnowseeError::Config(
                "crawler.crawl_every must be greater than zero".to_string(),
            ));
        }
        self.zone()?;
        self.chrono_locale()?;
        self.telegram.authorized_chats()?;
        validate_pattern("crawler.markdown.date_format", &self.crawler.markdown.date_format)?;
        validate_pattern("crawler.markdown.time_format", &self.crawler.markdown.time_format)?;
        Ok(())
    }

    pub fn zone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| KnowseeError::Config(format!("unknown timezone `{}`", self.timezone)))
    }

    /// Locale for month and day names; `None` keeps the POSIX names.
    ///
    /// An encoding suffix such as `.UTF-8` is ignored.
    pub fn chrono_locale(&self) -> Result<Option<Locale>> {
        let Some(name) = self.locale.as_deref() else {
            return Ok(None);
        };
        let name = name.split('.').next().unwrap_or(name).trim();
        Locale::try_from(name)
            .map(Some)
            .map_err(|_| KnowseeError::Config(format!("unknown locale `{name}`")))
    }

    pub fn group(&self, name: &str) -> Option<&[CalendarFeedDescriptor]> {
        self.calendar_groups.get(name).map(Vec::as_slice)
    }
}

/// Rejects strftime patterns chrono cannot format.
fn validate_pattern(field: &str, pattern: &str) -> Result<()> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(KnowseeError::Config(format!("{field}: invalid pattern `{pattern}`")));
    }

    // Some specifiers parse but cannot be rendered.
    let sample = Utc
        .with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| KnowseeError::General("invalid sample date".to_string()))?;
    let mut out = String::new();
    write!(out, "{}", sample.format(pattern))
        .map_err(|_| KnowseeError::Config(format!("{field}: unusable pattern `{pattern}`")))?;
    Ok(())
}
