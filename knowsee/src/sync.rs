use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Locale, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use interfaces::{CalendarFeedDescriptor, ChatId, ChatPlatform, EventOccurrence, FeedFetcher, Store};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregators::{render_footer, EventAggregator, LogTracker, Markup};
use crate::config::Config;
use crate::context::SyncContext;
use crate::expander::EventExpander;
use crate::lifecycle::{ChatMessageLifecycle, Transition};
use crate::telegram::MAX_MESSAGE_CHARS;
use crate::traits::EventTracker;
use crate::types::{DateWindow, KnowseeError, Result};

const TRUNCATED_NOTE: &str = "More events not shown.";

/// How digests are computed and rendered.
#[derive(Debug, Clone)]
pub struct DigestSettings {
    pub days_before: u32,
    pub days_after: u32,
    pub date_format: String,
    pub time_format: String,
    pub zone: Tz,
    pub locale: Option<Locale>,
    pub markup: Markup,
    /// Skip a malformed occurrence instead of the whole feed.
    pub skip_malformed_events: bool,
    /// Longest digest, footer included, in characters.
    pub max_message_chars: usize,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            days_before: 0,
            days_after: 6,
            date_format: "%Y-%m-%d".to_string(),
            time_format: "%H:%M".to_string(),
            zone: Tz::UTC,
            locale: None,
            markup: Markup::Html,
            skip_malformed_events: false,
            max_message_chars: MAX_MESSAGE_CHARS,
        }
    }
}

impl DigestSettings {
    pub fn from_config(config: &Config, markup: Markup) -> Result<Self> {
        let (days_before, days_after) = config.crawler.date_range;
        Ok(Self {
            days_before,
            days_after,
            date_format: config.crawler.markdown.date_format.clone(),
            time_format: config.crawler.markdown.time_format.clone(),
            zone: config.zone()?,
            locale: config.chrono_locale()?,
            markup,
            skip_malformed_events: config.crawler.skip_malformed_events,
            max_message_chars: MAX_MESSAGE_CHARS,
        })
    }

    /// Window around the date of `now` in the configured zone.
    pub fn window(&self, now: DateTime<Utc>) -> DateWindow {
        let today = now.with_timezone(&self.zone).date_naive();
        DateWindow::around(today, self.days_before, self.days_after)
    }
}

/// Fetches and expands feeds into a digest; no store or platform involved.
pub struct DigestBuilder {
    fetcher: Arc<dyn FeedFetcher>,
    settings: DigestSettings,
}

impl DigestBuilder {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, settings: DigestSettings) -> Self {
        Self { fetcher, settings }
    }

    /// Aggregates every feed that could be fetched and expanded.
    ///
    /// Feeds are processed concurrently and all of them finish before
    /// aggregation. A failing feed is logged and left out.
    pub async fn build(
        &self,
        ctx: &SyncContext,
        calendars: &[CalendarFeedDescriptor],
        now: DateTime<Utc>,
    ) -> Result<EventAggregator> {
        let window = self.settings.window(now);
        let results = join_all(
            calendars
                .iter()
                .map(|calendar| self.feed_occurrences(ctx, calendar, window)),
        )
        .await;

        let mut aggregator =
            EventAggregator::new(self.settings.zone, self.settings.markup).with_locale(self.settings.locale);
        let mut skipped = 0;

        for (calendar, result) in calendars.iter().zip(results) {
            match result {
                Ok(occurrences) => {
                    (&mut aggregator, LogTracker::new(calendar.name())).accept_all(occurrences);
                }
                Err(KnowseeError::Cancelled) => return Err(KnowseeError::Cancelled),
                Err(e) => {
                    skipped += 1;
                    warn!(
                        calendar = calendar.name(),
                        url = calendar.url(),
                        "Skipping feed: {}", e
                    );
                }
            }
        }

        debug!(
            feeds = calendars.len(),
            skipped,
            entries = aggregator.len(),
            from = %window.from,
            to = %window.to,
            "Digest built"
        );
        Ok(aggregator)
    }

    async fn feed_occurrences(
        &self,
        ctx: &SyncContext,
        calendar: &CalendarFeedDescriptor,
        window: DateWindow,
    ) -> Result<Vec<EventOccurrence>> {
        let text = ctx
            .guard(self.fetcher.fetch(calendar.url(), calendar.icloud()))
            .await??;
        let expander = EventExpander::parse(&text)?;

        let mut occurrences = Vec::new();
        for item in expander.occurrences(window, self.settings.zone) {
            match item {
                Ok(occurrence) => occurrences.push(occurrence),
                Err(e) if self.settings.skip_malformed_events => {
                    warn!(calendar = calendar.name(), "Skipping malformed event: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(occurrences)
    }

    /// Digest text with the generation footer.
    ///
    /// A digest longer than `max_message_chars` loses its last lines and gets
    /// a note saying so; the footer always stays.
    pub fn compose(&self, aggregator: &EventAggregator, now: DateTime<Utc>) -> String {
        let settings = &self.settings;
        let body = aggregator.render_text(&settings.date_format, &settings.time_format);
        let footer = render_footer(
            settings.markup,
            &now.with_timezone(&settings.zone),
            &settings.date_format,
            &settings.time_format,
            settings.locale,
        );

        let text = format!("{body}\n\n{footer}");
        let chars = text.chars().count();
        if chars <= settings.max_message_chars {
            return text;
        }

        let note = settings.markup.italic(TRUNCATED_NOTE);
        let fixed = note.chars().count() + footer.chars().count() + 4;
        let mut lines: Vec<&str> = body.lines().collect();
        let mut kept = lines.iter().map(|l| l.chars().count() + 1).sum::<usize>();
        while !lines.is_empty() && kept + fixed > settings.max_message_chars {
            if let Some(line) = lines.pop() {
                kept -= line.chars().count() + 1;
            }
        }
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }

        warn!(
            chars,
            limit = settings.max_message_chars,
            kept_lines = lines.len(),
            "Digest too long, truncating"
        );
        if lines.is_empty() {
            format!("{note}\n\n{footer}")
        } else {
            format!("{}\n{note}\n\n{footer}", lines.join("\n"))
        }
    }
}

/// Outcome counts of one [`SyncOrchestrator::sync_all`] round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Runs chat syncs: feeds to digest to one lifecycle transition.
pub struct SyncOrchestrator {
    store: Arc<dyn Store>,
    digest: DigestBuilder,
    lifecycle: ChatMessageLifecycle,
    /// Serializes syncs of the same chat.
    chat_locks: Mutex<HashMap<ChatId, Arc<Mutex<()>>>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn FeedFetcher>,
        platform: Arc<dyn ChatPlatform>,
        settings: DigestSettings,
    ) -> Self {
        Self {
            lifecycle: ChatMessageLifecycle::new(store.clone(), platform),
            digest: DigestBuilder::new(fetcher, settings),
            store,
            chat_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn chat_lock(&self, chat_id: ChatId) -> Arc<Mutex<()>> {
        let mut locks = self.chat_locks.lock().await;
        locks.entry(chat_id).or_default().clone()
    }

    #[instrument(skip(self, ctx))]
    pub async fn sync_chat(&self, ctx: &SyncContext, chat_id: ChatId) -> Result<Transition> {
        let lock = self.chat_lock(chat_id).await;
        let _held = ctx.guard(lock.lock()).await?;

        let calendars = ctx.guard(self.store.calendars_for_chat(chat_id)).await??;
        let now = Utc::now();
        let aggregator = self.digest.build(ctx, &calendars, now).await?;
        let text = self.digest.compose(&aggregator, now);

        let transition = self.lifecycle.apply(ctx, chat_id, &text).await?;
        info!(
            chat_id,
            calendars = calendars.len(),
            entries = aggregator.len(),
            ?transition,
            "Chat synced"
        );
        Ok(transition)
    }

    /// Syncs every known chat concurrently; one chat failing, even by
    /// panicking, does not affect the others.
    pub async fn sync_all(self: &Arc<Self>, ctx: &SyncContext) -> Result<SyncSummary> {
        let chats = ctx.guard(self.store.list_chats()).await??;
        info!(chats = chats.len(), "Starting sync round");

        let handles: Vec<_> = chats
            .into_iter()
            .map(|chat_id| {
                let this = Arc::clone(self);
                let task_ctx = ctx.clone();
                let handle = ctx.spawn(async move { this.sync_chat(&task_ctx, chat_id).await });
                (chat_id, handle)
            })
            .collect();

        let mut summary = SyncSummary::default();
        for (chat_id, handle) in handles {
            match handle.await {
                Ok(Ok(_)) => summary.succeeded += 1,
                Ok(Err(KnowseeError::Cancelled)) => summary.cancelled += 1,
                Ok(Err(e)) => {
                    summary.failed += 1;
                    error!(chat_id, "Chat sync failed: {}", e);
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(chat_id, "Chat sync task aborted: {}", e);
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Sync round finished"
        );
        Ok(summary)
    }
}
