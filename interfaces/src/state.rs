use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::defs::{CalendarFeedDescriptor, ChatId, MessageId, Store, TrackedMessage};
use crate::errors::PersistenceError;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS chats (
        id INTEGER PRIMARY KEY
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tracked_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        message_id INTEGER NOT NULL,
        pinned BOOLEAN NOT NULL DEFAULT 0,
        create_time TEXT NOT NULL,
        update_time TEXT NOT NULL,
        UNIQUE(chat_id, message_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS calendars (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        type TEXT NOT NULL CHECK(type = 'ical'),
        url TEXT NOT NULL,
        icloud BOOLEAN NOT NULL DEFAULT 0,
        name TEXT NOT NULL,
        color TEXT NOT NULL,
        UNIQUE(chat_id, name)
    )
    "#,
];

/// SQLite implementation of [`Store`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file at `db_path`.
    pub async fn connect(db_path: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.setup_schema().await?;
        info!(db_path, "Opened SQLite store");
        Ok(store)
    }

    /// Private in-memory database, used by tests and previews.
    pub async fn in_memory() -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // A single connection that never expires, otherwise the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.setup_schema().await?;
        Ok(store)
    }

    async fn setup_schema(&self) -> Result<(), PersistenceError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn tracked_message_from_row(row: &SqliteRow) -> Result<TrackedMessage, PersistenceError> {
    Ok(TrackedMessage::new(
        row.try_get::<i64, _>("chat_id")?,
        row.try_get::<i64, _>("message_id")?,
        row.try_get::<bool, _>("pinned")?,
        row.try_get::<DateTime<Utc>, _>("create_time")?,
        row.try_get::<DateTime<Utc>, _>("update_time")?,
    ))
}

fn calendar_from_row(row: &SqliteRow) -> Result<CalendarFeedDescriptor, PersistenceError> {
    let kind: String = row.try_get("type")?;
    CalendarFeedDescriptor::new(
        &kind,
        row.try_get::<String, _>("url")?,
        row.try_get::<String, _>("name")?,
        row.try_get::<String, _>("color")?,
        Some(row.try_get::<bool, _>("icloud")?),
    )
    .map_err(|e| PersistenceError::Decode {
        column: "type",
        message: e.to_string(),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn touch_chat(&self, chat_id: ChatId) -> Result<(), PersistenceError> {
        sqlx::query("INSERT OR IGNORE INTO chats (id) VALUES (?)")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_chats(&self) -> Result<Vec<ChatId>, PersistenceError> {
        let rows = sqlx::query("SELECT id FROM chats ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(PersistenceError::from))
            .collect()
    }

    async fn calendars_for_chat(
        &self,
        chat_id: ChatId,
    ) -> Result<Vec<CalendarFeedDescriptor>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT type, url, name, color, icloud
            FROM calendars
            WHERE chat_id = ?
            ORDER BY id
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(calendar_from_row).collect()
    }

    async fn add_calendar(
        &self,
        chat_id: ChatId,
        calendar: &CalendarFeedDescriptor,
    ) -> Result<bool, PersistenceError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO calendars (chat_id, type, url, name, color, icloud)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chat_id)
        .bind(calendar.kind().as_str())
        .bind(calendar.url())
        .bind(calendar.name())
        .bind(calendar.color())
        .bind(calendar.icloud())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_calendar(&self, chat_id: ChatId, name: &str) -> Result<bool, PersistenceError> {
        let result = sqlx::query("DELETE FROM calendars WHERE chat_id = ? AND name = ?")
            .bind(chat_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_calendars(&self, chat_id: ChatId) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM calendars WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn add_tracked_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        pinned: bool,
    ) -> Result<TrackedMessage, PersistenceError> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO tracked_messages (chat_id, message_id, pinned, create_time, update_time)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (chat_id, message_id) DO UPDATE SET
                pinned = excluded.pinned,
                update_time = excluded.update_time
            RETURNING chat_id, message_id, pinned, create_time, update_time
            "#,
        )
        .bind(chat_id)
        .bind(message_id)
        .bind(pinned)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracked_message_from_row(&row)
    }

    async fn delete_tracked_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM tracked_messages WHERE chat_id = ? AND message_id = ?")
            .bind(chat_id)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_pinned(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        pinned: bool,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            UPDATE tracked_messages
            SET pinned = ?
            WHERE chat_id = ? AND message_id = ?
            "#,
        )
        .bind(pinned)
        .bind(chat_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_tracked_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            UPDATE tracked_messages
            SET update_time = ?
            WHERE chat_id = ? AND message_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(chat_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_tracked_message(
        &self,
        chat_id: ChatId,
    ) -> Result<Option<TrackedMessage>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT chat_id, message_id, pinned, create_time, update_time
            FROM tracked_messages
            WHERE chat_id = ?
            ORDER BY create_time DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(tracked_message_from_row).transpose()
    }

    async fn tracked_messages(&self, chat_id: ChatId) -> Result<Vec<TrackedMessage>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT chat_id, message_id, pinned, create_time, update_time
            FROM tracked_messages
            WHERE chat_id = ?
            ORDER BY create_time DESC, id DESC
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(tracked_message_from_row).collect()
    }
}
