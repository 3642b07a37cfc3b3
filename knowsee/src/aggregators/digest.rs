use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Locale, NaiveDate, Offset};
use chrono_tz::Tz;
use interfaces::EventOccurrence;
use serde::Serialize;
use tracing::debug;

use super::{format_instant, Markup};
use crate::traits::EventTracker;
use crate::types::Result;

pub const EMPTY_DIGEST: &str = "No upcoming events.";
pub const ALL_DAY_LABEL: &str = "All day";

#[derive(Debug, Default, Clone)]
struct Day {
    all_day: Vec<EventOccurrence>,
    /// Kept sorted by start; equal starts stay in insertion order.
    timed: Vec<EventOccurrence>,
}

impl Day {
    fn entries(&self) -> impl Iterator<Item = &EventOccurrence> {
        self.all_day.iter().chain(self.timed.iter())
    }
}

/// Structured form of one digest section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySnapshot {
    pub date: NaiveDate,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotEntry {
    pub title: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub all_day: bool,
}

impl From<&EventOccurrence> for SnapshotEntry {
    fn from(occurrence: &EventOccurrence) -> Self {
        Self {
            title: occurrence.title.clone(),
            start: fixed(&occurrence.start),
            end: fixed(&occurrence.end),
            all_day: occurrence.all_day,
        }
    }
}

fn fixed(instant: &DateTime<Tz>) -> DateTime<FixedOffset> {
    instant.with_timezone(&instant.offset().fix())
}

/// Groups occurrences by calendar date and renders the digest.
///
/// One aggregator belongs to one chat sync; [`EventTracker::reset`] empties it
/// for reuse.
#[derive(Debug, Clone)]
pub struct EventAggregator {
    zone: Tz,
    markup: Markup,
    locale: Option<Locale>,
    days: BTreeMap<NaiveDate, Day>,
}

impl EventAggregator {
    pub fn new(zone: Tz, markup: Markup) -> Self {
        Self {
            zone,
            markup,
            locale: None,
            days: BTreeMap::new(),
        }
    }

    pub fn with_locale(mut self, locale: Option<Locale>) -> Self {
        self.locale = locale;
        self
    }

    pub fn len(&self) -> usize {
        self.days
            .values()
            .map(|day| day.all_day.len() + day.timed.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Date sections separated by a blank line, or a single
    /// "No upcoming events." line.
    pub fn render_text(&self, date_format: &str, time_format: &str) -> String {
        if self.days.is_empty() {
            return self.markup.italic(EMPTY_DIGEST);
        }

        let markup = self.markup;
        let sections: Vec<String> = self
            .days
            .values()
            .filter_map(|day| {
                let first = day.entries().next()?;
                let heading = format_instant(&first.start.with_timezone(&self.zone), date_format, self.locale);

                let mut lines = vec![markup.bold(&markup.escape(&heading))];
                for entry in day.entries() {
                    let title = markup.escape(&entry.title);
                    let label = if entry.all_day {
                        ALL_DAY_LABEL.to_string()
                    } else {
                        format!(
                            "{}–{}",
                            format_instant(&entry.start.with_timezone(&self.zone), time_format, self.locale),
                            format_instant(&entry.end.with_timezone(&self.zone), time_format, self.locale),
                        )
                    };
                    lines.push(format!("{}: {}", markup.italic(&markup.escape(&label)), title));
                }
                Some(lines.join("\n"))
            })
            .collect();

        sections.join("\n\n")
    }

    /// Same grouping and ordering as [`render_text`](Self::render_text).
    pub fn render_structured(&self) -> Vec<DaySnapshot> {
        self.days
            .iter()
            .map(|(date, day)| DaySnapshot {
                date: *date,
                entries: day.entries().map(SnapshotEntry::from).collect(),
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.render_structured())?)
    }
}

impl EventTracker for EventAggregator {
    fn accept(&mut self, occurrence: EventOccurrence) {
        let date = occurrence.start.with_timezone(&self.zone).date_naive();
        let day = self.days.entry(date).or_default();

        if occurrence.all_day {
            day.all_day.push(occurrence);
        } else {
            let index = day.timed.partition_point(|e| e.start <= occurrence.start);
            day.timed.insert(index, occurrence);
        }
    }

    fn reset(&mut self) {
        debug!(entries = self.len(), "Resetting event aggregator");
        self.days.clear();
    }
}
