#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use interfaces::{
    CalendarFeedDescriptor, ChatId, ChatPlatform, FeedFetcher, FetchError, MessageId, PersistenceError,
    PlatformError, SqliteStore, Store, TrackedMessage,
};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub fn calendar(name: &str, url: &str) -> CalendarFeedDescriptor {
    CalendarFeedDescriptor::new("ical", url, name, "#3366ff", None).unwrap()
}

/// Wraps a calendar body in a VCALENDAR object with CRLF line endings.
pub fn ics(events: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//knowsee//tests//EN\r\n{}END:VCALENDAR\r\n",
        events.replace('\n', "\r\n")
    )
}

/// In-memory SQLite store that fails every call touching one of `failing`.
pub struct FlakyStore {
    inner: SqliteStore,
    failing: Mutex<HashSet<ChatId>>,
}

impl FlakyStore {
    pub async fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStore::in_memory().await.unwrap(),
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_chat(&self, chat_id: ChatId) {
        self.failing.lock().unwrap().insert(chat_id);
    }

    fn check(&self, chat_id: ChatId) -> Result<(), PersistenceError> {
        if self.failing.lock().unwrap().contains(&chat_id) {
            return Err(PersistenceError::Decode {
                column: "chat_id",
                message: format!("injected failure for chat {chat_id}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn touch_chat(&self, chat_id: ChatId) -> Result<(), PersistenceError> {
        self.check(chat_id)?;
        self.inner.touch_chat(chat_id).await
    }

    async fn list_chats(&self) -> Result<Vec<ChatId>, PersistenceError> {
        self.inner.list_chats().await
    }

    async fn calendars_for_chat(&self, chat_id: ChatId) -> Result<Vec<CalendarFeedDescriptor>, PersistenceError> {
        self.check(chat_id)?;
        self.inner.calendars_for_chat(chat_id).await
    }

    async fn add_calendar(&self, chat_id: ChatId, calendar: &CalendarFeedDescriptor) -> Result<bool, PersistenceError> {
        self.check(chat_id)?;
        self.inner.add_calendar(chat_id, calendar).await
    }

    async fn remove_calendar(&self, chat_id: ChatId, name: &str) -> Result<bool, PersistenceError> {
        self.check(chat_id)?;
        self.inner.remove_calendar(chat_id, name).await
    }

    async fn clear_calendars(&self, chat_id: ChatId) -> Result<u64, PersistenceError> {
        self.check(chat_id)?;
        self.inner.clear_calendars(chat_id).await
    }

    async fn add_tracked_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        pinned: bool,
    ) -> Result<TrackedMessage, PersistenceError> {
        self.check(chat_id)?;
        self.inner.add_tracked_message(chat_id, message_id, pinned).await
    }

    async fn delete_tracked_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), PersistenceError> {
        self.check(chat_id)?;
        self.inner.delete_tracked_message(chat_id, message_id).await
    }

    async fn set_pinned(&self, chat_id: ChatId, message_id: MessageId, pinned: bool) -> Result<(), PersistenceError> {
        self.check(chat_id)?;
        self.inner.set_pinned(chat_id, message_id, pinned).await
    }

    async fn touch_tracked_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), PersistenceError> {
        self.check(chat_id)?;
        self.inner.touch_tracked_message(chat_id, message_id).await
    }

    async fn latest_tracked_message(&self, chat_id: ChatId) -> Result<Option<TrackedMessage>, PersistenceError> {
        self.check(chat_id)?;
        self.inner.latest_tracked_message(chat_id).await
    }

    async fn tracked_messages(&self, chat_id: ChatId) -> Result<Vec<TrackedMessage>, PersistenceError> {
        self.check(chat_id)?;
        self.inner.tracked_messages(chat_id).await
    }
}

#[derive(Debug, Default)]
pub struct PlatformLog {
    pub sent: Vec<(ChatId, MessageId, String)>,
    pub edits: Vec<(ChatId, MessageId, String)>,
    pub pins: Vec<(ChatId, MessageId)>,
}

/// Records platform calls; edits of identical text report "not modified"
/// like Telegram does.
#[derive(Default)]
pub struct FakePlatform {
    log: Mutex<PlatformLog>,
    contents: Mutex<HashMap<(ChatId, MessageId), String>>,
    next_id: Mutex<MessageId>,
    fail_pins: Mutex<bool>,
    fail_edits: Mutex<bool>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_pins(&self, fail: bool) {
        *self.fail_pins.lock().unwrap() = fail;
    }

    pub fn fail_edits(&self, fail: bool) {
        *self.fail_edits.lock().unwrap() = fail;
    }

    pub fn sent(&self) -> Vec<(ChatId, MessageId, String)> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(chat, _, _)| *chat == chat_id)
            .map(|(_, _, text)| text)
            .collect()
    }

    pub fn edits(&self) -> Vec<(ChatId, MessageId, String)> {
        self.log.lock().unwrap().edits.clone()
    }

    pub fn pins(&self) -> Vec<(ChatId, MessageId)> {
        self.log.lock().unwrap().pins.clone()
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId, PlatformError> {
        let message_id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.contents
            .lock()
            .unwrap()
            .insert((chat_id, message_id), text.to_string());
        self.log
            .lock()
            .unwrap()
            .sent
            .push((chat_id, message_id, text.to_string()));
        Ok(message_id)
    }

    async fn edit_message(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<(), PlatformError> {
        if *self.fail_edits.lock().unwrap() {
            return Err(PlatformError::Api {
                code: 400,
                description: "Bad Request: message to edit not found".to_string(),
            });
        }

        let mut contents = self.contents.lock().unwrap();
        let current = contents
            .get_mut(&(chat_id, message_id))
            .ok_or_else(|| PlatformError::Api {
                code: 400,
                description: "Bad Request: message to edit not found".to_string(),
            })?;
        if current == text {
            return Err(PlatformError::NotModified);
        }
        *current = text.to_string();
        self.log
            .lock()
            .unwrap()
            .edits
            .push((chat_id, message_id, text.to_string()));
        Ok(())
    }

    async fn pin_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), PlatformError> {
        if *self.fail_pins.lock().unwrap() {
            return Err(PlatformError::Api {
                code: 400,
                description: "Bad Request: not enough rights to pin a message".to_string(),
            });
        }
        self.log.lock().unwrap().pins.push((chat_id, message_id));
        Ok(())
    }
}

/// Serves canned feed bodies by URL; unknown URLs answer 404.
#[derive(Default)]
pub struct FakeFetcher {
    feeds: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<(String, bool)>>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: impl Into<String>) {
        self.feeds.lock().unwrap().insert(url.to_string(), body.into());
    }

    pub fn requests(&self) -> Vec<(String, bool)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, icloud: bool) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push((url.to_string(), icloud));
        self.feeds
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}
