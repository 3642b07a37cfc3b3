use interfaces::{CalendarFeedDescriptor, PersistenceError, SqliteStore, Store};

fn feed(name: &str) -> CalendarFeedDescriptor {
    CalendarFeedDescriptor::new("ical", format!("https://cal.example/{name}.ics"), name, "#123456", None)
        .unwrap()
}

async fn store() -> SqliteStore {
    SqliteStore::in_memory().await.unwrap()
}

#[tokio::test]
async fn chats_are_registered_once() -> Result<(), PersistenceError> {
    let store = store().await;
    store.touch_chat(7).await?;
    store.touch_chat(-3).await?;
    store.touch_chat(7).await?;

    assert_eq!(store.list_chats().await?, vec![-3, 7]);
    Ok(())
}

#[tokio::test]
async fn calendar_names_are_unique_per_chat() -> Result<(), PersistenceError> {
    let store = store().await;
    store.touch_chat(1).await?;
    store.touch_chat(2).await?;

    assert!(store.add_calendar(1, &feed("work")).await?);
    assert!(store.add_calendar(1, &feed("home")).await?);
    assert!(!store.add_calendar(1, &feed("work")).await?);
    assert!(store.add_calendar(2, &feed("work")).await?);

    let names: Vec<String> = store
        .calendars_for_chat(1)
        .await?
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    assert_eq!(names, vec!["work", "home"]);
    Ok(())
}

#[tokio::test]
async fn calendars_round_trip_all_fields() -> Result<(), PersistenceError> {
    let store = store().await;
    store.touch_chat(1).await?;
    let icloud = CalendarFeedDescriptor::new(
        "ical",
        "https://p01-caldav.icloud.com/published/2/x",
        "Shared",
        "#00ff00",
        Some(true),
    )
    .unwrap();
    store.add_calendar(1, &icloud).await?;

    assert_eq!(store.calendars_for_chat(1).await?, vec![icloud]);
    Ok(())
}

#[tokio::test]
async fn calendars_can_be_removed() -> Result<(), PersistenceError> {
    let store = store().await;
    store.touch_chat(1).await?;
    store.add_calendar(1, &feed("a")).await?;
    store.add_calendar(1, &feed("b")).await?;
    store.add_calendar(1, &feed("c")).await?;

    assert!(store.remove_calendar(1, "b").await?);
    assert!(!store.remove_calendar(1, "b").await?);
    assert_eq!(store.calendars_for_chat(1).await?.len(), 2);

    assert_eq!(store.clear_calendars(1).await?, 2);
    assert!(store.calendars_for_chat(1).await?.is_empty());
    assert_eq!(store.clear_calendars(1).await?, 0);
    Ok(())
}

#[tokio::test]
async fn tracked_messages_newest_first() -> Result<(), PersistenceError> {
    let store = store().await;
    store.touch_chat(1).await?;
    assert!(store.latest_tracked_message(1).await?.is_none());

    store.add_tracked_message(1, 10, true).await?;
    store.add_tracked_message(1, 11, false).await?;

    let latest = store.latest_tracked_message(1).await?.unwrap();
    assert_eq!(latest.message_id(), 11);
    assert!(!latest.pinned());

    let ids: Vec<i64> = store
        .tracked_messages(1)
        .await?
        .iter()
        .map(|m| m.message_id())
        .collect();
    assert_eq!(ids, vec![11, 10]);
    Ok(())
}

#[tokio::test]
async fn tracked_message_updates() -> Result<(), PersistenceError> {
    let store = store().await;
    store.touch_chat(1).await?;
    let created = store.add_tracked_message(1, 10, false).await?;
    assert_eq!(created.create_time(), created.update_time());

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    store.touch_tracked_message(1, 10).await?;
    store.set_pinned(1, 10, true).await?;

    let touched = store.latest_tracked_message(1).await?.unwrap();
    assert!(touched.pinned());
    assert_eq!(touched.create_time(), created.create_time());
    assert!(touched.update_time() > created.update_time());

    store.delete_tracked_message(1, 10).await?;
    assert!(store.latest_tracked_message(1).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn rows_require_a_registered_chat() {
    let store = store().await;
    assert!(store.add_calendar(99, &feed("orphan")).await.is_err());
    assert!(store.add_tracked_message(99, 1, false).await.is_err());
}
