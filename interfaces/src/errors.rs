use thiserror::Error;

/// Rejected calendar descriptor shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("Unsupported calendar type: {0}")]
    UnsupportedKind(String),

    #[error("Calendar field `{0}` must not be empty")]
    EmptyField(&'static str),
}

/// Failure to retrieve the raw bytes of a calendar feed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} while fetching {url}")]
    Status { url: String, status: u16 },

    #[error("Transport error while fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Feed at {url} exceeds {limit_mb}MB")]
    TooLarge { url: String, limit_mb: usize },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid value in column `{column}`: {message}")]
    Decode { column: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform refused an edit because the text is identical to the
    /// current content of the message.
    #[error("Message is not modified")]
    NotModified,

    #[error("Platform API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Platform transport error: {0}")]
    Transport(String),
}

impl PlatformError {
    pub fn is_not_modified(&self) -> bool {
        matches!(self, PlatformError::NotModified)
    }
}
