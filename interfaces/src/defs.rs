use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::errors::{DescriptorError, FetchError, PersistenceError, PlatformError};

pub type ChatId = i64;
pub type MessageId = i64;

/// Age after which a tracked message is replaced instead of edited.
pub const STALENESS_CUTOFF_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Ical,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Ical => "ical",
        }
    }
}

impl FromStr for FeedKind {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ical" => Ok(FeedKind::Ical),
            other => Err(DescriptorError::UnsupportedKind(other.to_string())),
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape accepted from configuration files before validation.
#[derive(Debug, Deserialize)]
struct DescriptorSpec {
    #[serde(rename = "type")]
    kind: String,
    url: String,
    name: String,
    color: String,
    #[serde(default)]
    icloud: Option<bool>,
}

/// An external calendar feed attached to a chat, directly or through a
/// calendar group.
///
/// Values are validated on construction and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorSpec")]
pub struct CalendarFeedDescriptor {
    #[serde(rename = "type")]
    kind: FeedKind,
    url: String,
    name: String,
    color: String,
    icloud: bool,
}

impl CalendarFeedDescriptor {
    /// `icloud` defaults to `false` when not given.
    pub fn new(
        kind: &str,
        url: impl Into<String>,
        name: impl Into<String>,
        color: impl Into<String>,
        icloud: Option<bool>,
    ) -> Result<Self, DescriptorError> {
        let kind = kind.parse::<FeedKind>()?;
        let url = url.into();
        let name = name.into();

        if url.trim().is_empty() {
            return Err(DescriptorError::EmptyField("url"));
        }
        if name.trim().is_empty() {
            return Err(DescriptorError::EmptyField("name"));
        }

        Ok(Self {
            kind,
            url,
            name,
            color: color.into(),
            icloud: icloud.unwrap_or(false),
        })
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    /// Whether the feed needs the iCloud timezone-offset correction.
    pub fn icloud(&self) -> bool {
        self.icloud
    }
}

impl TryFrom<DescriptorSpec> for CalendarFeedDescriptor {
    type Error = DescriptorError;

    fn try_from(spec: DescriptorSpec) -> Result<Self, Self::Error> {
        Self::new(&spec.kind, spec.url, spec.name, spec.color, spec.icloud)
    }
}

/// One concrete instance of a calendar event, already placed in the display
/// time zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOccurrence {
    pub title: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub all_day: bool,
}

impl EventOccurrence {
    pub fn timed(title: impl Into<String>, start: DateTime<Tz>, end: DateTime<Tz>) -> Self {
        Self {
            title: title.into(),
            start,
            end,
            all_day: false,
        }
    }

    pub fn all_day(title: impl Into<String>, start: DateTime<Tz>, end: DateTime<Tz>) -> Self {
        Self {
            title: title.into(),
            start,
            end,
            all_day: true,
        }
    }

    /// Calendar date of the start instant in its zone.
    pub fn date(&self) -> NaiveDate {
        self.start.date_naive()
    }
}

/// Persisted record of the platform message that shows a chat's digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedMessage {
    chat_id: ChatId,
    message_id: MessageId,
    pinned: bool,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

impl TrackedMessage {
    pub fn new(
        chat_id: ChatId,
        message_id: MessageId,
        pinned: bool,
        create_time: DateTime<Utc>,
        update_time: DateTime<Utc>,
    ) -> Self {
        Self {
            chat_id,
            message_id,
            pinned,
            create_time,
            update_time,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn pinned(&self) -> bool {
        self.pinned
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn update_time(&self) -> DateTime<Utc> {
        self.update_time
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.create_time)
    }

    /// True once the message is older than [`STALENESS_CUTOFF_DAYS`].
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age(now) > Duration::days(STALENESS_CUTOFF_DAYS)
    }
}

/// Retrieves the text of a calendar feed.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str, icloud: bool) -> Result<String, FetchError>;
}

/// Durable state: chats, their calendars, and tracked digest messages.
///
/// Every mutating operation is a single atomic statement.
#[async_trait]
pub trait Store: Send + Sync {
    /// Registers a chat; a no-op when it already exists.
    async fn touch_chat(&self, chat_id: ChatId) -> Result<(), PersistenceError>;

    async fn list_chats(&self) -> Result<Vec<ChatId>, PersistenceError>;

    async fn calendars_for_chat(
        &self,
        chat_id: ChatId,
    ) -> Result<Vec<CalendarFeedDescriptor>, PersistenceError>;

    /// Returns `false` when a calendar with the same name is already attached.
    async fn add_calendar(
        &self,
        chat_id: ChatId,
        calendar: &CalendarFeedDescriptor,
    ) -> Result<bool, PersistenceError>;

    /// Returns `false` when no calendar had that name.
    async fn remove_calendar(&self, chat_id: ChatId, name: &str) -> Result<bool, PersistenceError>;

    /// Returns the number of calendars removed.
    async fn clear_calendars(&self, chat_id: ChatId) -> Result<u64, PersistenceError>;

    async fn add_tracked_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        pinned: bool,
    ) -> Result<TrackedMessage, PersistenceError>;

    async fn delete_tracked_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), PersistenceError>;

    async fn set_pinned(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        pinned: bool,
    ) -> Result<(), PersistenceError>;

    /// Sets the update time of a tracked message to now.
    async fn touch_tracked_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), PersistenceError>;

    async fn latest_tracked_message(
        &self,
        chat_id: ChatId,
    ) -> Result<Option<TrackedMessage>, PersistenceError>;

    /// Newest first.
    async fn tracked_messages(&self, chat_id: ChatId) -> Result<Vec<TrackedMessage>, PersistenceError>;
}

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId, PlatformError>;

    /// Fails with [`PlatformError::NotModified`] when the text is unchanged.
    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), PlatformError>;

    async fn pin_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), PlatformError>;
}
