use chrono::{Days, NaiveDate};
use interfaces::{DescriptorError, FetchError, PersistenceError, PlatformError};

/// An iCalendar value or component that does not have a recognised shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{context}: {message}")]
pub struct FormatError {
    pub context: String,
    pub message: String,
}

impl FormatError {
    pub fn new(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KnowseeError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Feed format error: {0}")]
    Format(#[from] FormatError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid calendar: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, KnowseeError>;

/// Closed range of calendar dates an expansion covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// `days_before` days before `today` through `days_after` days after it.
    pub fn around(today: NaiveDate, days_before: u32, days_after: u32) -> Self {
        Self {
            from: today - Days::new(u64::from(days_before)),
            to: today + Days::new(u64::from(days_after)),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Knowsee/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 2,
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}
