use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use interfaces::EventOccurrence;
use tracing::{debug, warn};

use crate::parser::{Component, FeedParser, Property};
use crate::recurrence::{parse_date, parse_datetime, RecurrenceRule, Until};
use crate::timezone::{FeedZone, ZoneRef, ZoneTable};
use crate::types::{DateWindow, FormatError};

/// A DTSTART/DTEND-style value as written in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    Date(NaiveDate),
    /// No zone information; interpreted in the display zone.
    Floating(NaiveDateTime),
    Utc(NaiveDateTime),
    Zoned(NaiveDateTime, Tz),
    /// Wall time in a zone defined by the feed's own `VTIMEZONE`.
    Defined(NaiveDateTime, Arc<FeedZone>),
}

impl EventTime {
    /// Parses one value of `property` (list-valued properties are split by the caller).
    ///
    /// `TZID` parameters are resolved against `zones`.
    pub fn parse(property: &Property, raw: &str, zones: &ZoneTable) -> Result<Self, FormatError> {
        let raw = raw.trim();
        let error = |message: String| FormatError::new(property.name.clone(), message);

        let value_type = property.param("VALUE").map(str::to_ascii_uppercase);
        match value_type.as_deref() {
            Some("DATE") => parse_date(raw)
                .map(EventTime::Date)
                .ok_or_else(|| error(format!("invalid date `{raw}`"))),
            None | Some("DATE-TIME") => {
                if parse_date(raw).is_some() {
                    return Err(error(format!("date value `{raw}` without VALUE=DATE")));
                }
                if let Some(utc) = raw.strip_suffix(['Z', 'z']) {
                    return parse_datetime(utc)
                        .map(EventTime::Utc)
                        .ok_or_else(|| error(format!("invalid date-time `{raw}`")));
                }
                let wall = parse_datetime(raw).ok_or_else(|| error(format!("invalid date-time `{raw}`")))?;
                match property.param("TZID") {
                    Some(tzid) => match zones.resolve(tzid) {
                        Some(ZoneRef::Iana(zone)) => Ok(EventTime::Zoned(wall, zone)),
                        Some(ZoneRef::Defined(zone)) => Ok(EventTime::Defined(wall, zone)),
                        None => {
                            warn!(tzid, "Unknown time zone, using the display zone");
                            Ok(EventTime::Floating(wall))
                        }
                    },
                    None => Ok(EventTime::Floating(wall)),
                }
            }
            Some(other) => Err(error(format!("unsupported value type {other}"))),
        }
    }

    /// Wall-clock reading in the value's own frame.
    pub fn wall(&self) -> NaiveDateTime {
        match self {
            EventTime::Date(date) => date.and_time(NaiveTime::MIN),
            EventTime::Floating(wall)
            | EventTime::Utc(wall)
            | EventTime::Zoned(wall, _)
            | EventTime::Defined(wall, _) => *wall,
        }
    }

    /// Same frame, different wall-clock reading.
    pub fn with_wall(&self, wall: NaiveDateTime) -> Self {
        match self {
            EventTime::Date(_) => EventTime::Date(wall.date()),
            EventTime::Floating(_) => EventTime::Floating(wall),
            EventTime::Utc(_) => EventTime::Utc(wall),
            EventTime::Zoned(_, zone) => EventTime::Zoned(wall, *zone),
            EventTime::Defined(_, zone) => EventTime::Defined(wall, Arc::clone(zone)),
        }
    }

    /// The instant this value denotes, expressed in `display`.
    pub fn resolve(&self, display: Tz) -> DateTime<Tz> {
        match self {
            EventTime::Date(date) => local_midnight(display, *date),
            EventTime::Floating(wall) => localize(display, *wall),
            EventTime::Utc(wall) => Utc.from_utc_datetime(wall).with_timezone(&display),
            EventTime::Zoned(wall, zone) => localize(*zone, *wall).with_timezone(&display),
            EventTime::Defined(wall, zone) => Utc.from_utc_datetime(&zone.to_utc(*wall)).with_timezone(&display),
        }
    }

    /// Identity used to match EXDATE and RECURRENCE-ID values against instances.
    fn key(&self, display: Tz) -> i64 {
        match self {
            EventTime::Date(date) => Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)).timestamp(),
            other => other.resolve(display).timestamp(),
        }
    }
}

/// How long each instance of an event lasts.
#[derive(Debug, Clone, Copy)]
enum Span {
    Days(i64),
    Exact(Duration),
}

/// Expands the events of one iCalendar feed into [`EventOccurrence`]s.
pub struct EventExpander {
    calendar: Component,
    zones: ZoneTable,
}

impl EventExpander {
    pub fn parse(content: &str) -> Result<Self, FormatError> {
        let calendar = FeedParser::parse(content)?;
        let zones = ZoneTable::from_calendar(&calendar);
        Ok(Self { calendar, zones })
    }

    /// Occurrences starting on a date in `window`, in `zone`.
    ///
    /// Events are expanded one at a time as the iterator is driven; calling
    /// this again starts over.
    pub fn occurrences(&self, window: DateWindow, zone: Tz) -> Occurrences<'_> {
        Occurrences {
            expander: self,
            window,
            zone,
            overrides: None,
            events: self.calendar.children.iter(),
            pending: Vec::new().into_iter(),
        }
    }

    /// Collects every occurrence, stopping at the first malformed event.
    pub fn expand(&self, window: DateWindow, zone: Tz) -> Result<Vec<EventOccurrence>, FormatError> {
        self.occurrences(window, zone).collect()
    }

    /// RECURRENCE-ID keys per UID; the matching series instances are replaced.
    fn overrides(&self, zone: Tz) -> HashMap<String, HashSet<i64>> {
        let mut overrides: HashMap<String, HashSet<i64>> = HashMap::new();
        for event in self.calendar.children_named("VEVENT") {
            let (Some(uid), Some(recurrence_id)) = (event.property("UID"), event.property("RECURRENCE-ID")) else {
                continue;
            };
            match EventTime::parse(recurrence_id, &recurrence_id.value, &self.zones) {
                Ok(time) => {
                    overrides
                        .entry(uid.value.clone())
                        .or_default()
                        .insert(time.key(zone));
                }
                Err(e) => warn!(uid = %uid.value, "Ignoring unreadable RECURRENCE-ID: {}", e),
            }
        }
        overrides
    }

    fn expand_event(
        &self,
        event: &Component,
        window: &DateWindow,
        zone: Tz,
        overrides: &HashMap<String, HashSet<i64>>,
    ) -> Result<Vec<EventOccurrence>, FormatError> {
        let title = event.property("SUMMARY").map(Property::text).unwrap_or_default();
        let context = || format!("event `{title}`");

        let dtstart = event
            .property("DTSTART")
            .ok_or_else(|| FormatError::new(context(), "missing DTSTART"))?;
        let start = EventTime::parse(dtstart, &dtstart.value, &self.zones)?;
        let span = event_span(event, &start, &self.zones, zone)
            .map_err(|e| FormatError::new(context(), e.to_string()))?;

        let is_override = event.property("RECURRENCE-ID").is_some();
        let rule = match (is_override, event.property("RRULE")) {
            (false, Some(rrule)) => Some(rrule.value.parse::<RecurrenceRule>()?),
            _ => None,
        };

        let mut starts = match &rule {
            Some(rule) => series_starts(rule, &start, window, zone),
            None => vec![start],
        };

        if !is_override {
            for rdate in event.properties_named("RDATE") {
                for raw in rdate.value.split(',') {
                    // PERIOD values contribute their start.
                    let raw = raw.split('/').next().unwrap_or(raw);
                    starts.push(EventTime::parse(rdate, raw, &self.zones)?);
                }
            }

            let mut excluded: HashSet<i64> = HashSet::new();
            for exdate in event.properties_named("EXDATE") {
                for raw in exdate.value.split(',') {
                    excluded.insert(EventTime::parse(exdate, raw, &self.zones)?.key(zone));
                }
            }
            if let Some(uid) = event.property("UID") {
                if let Some(keys) = overrides.get(&uid.value) {
                    excluded.extend(keys);
                }
            }
            starts.retain(|s| !excluded.contains(&s.key(zone)));
        }

        starts.sort_by_cached_key(|s| s.key(zone));
        starts.dedup_by_key(|s| s.key(zone));

        let occurrences: Vec<EventOccurrence> = starts
            .iter()
            .map(|s| occurrence(&title, s, span, zone))
            .filter(|o| window.contains(o.date()))
            .collect();

        if !occurrences.is_empty() {
            debug!(title = %title, count = occurrences.len(), "Expanded event");
        }
        Ok(occurrences)
    }
}

/// Lazy iterator returned by [`EventExpander::occurrences`].
pub struct Occurrences<'a> {
    expander: &'a EventExpander,
    window: DateWindow,
    zone: Tz,
    overrides: Option<HashMap<String, HashSet<i64>>>,
    events: std::slice::Iter<'a, Component>,
    pending: std::vec::IntoIter<EventOccurrence>,
}

impl Iterator for Occurrences<'_> {
    type Item = Result<EventOccurrence, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(occurrence) = self.pending.next() {
                return Some(Ok(occurrence));
            }

            let event = self.events.find(|c| c.name == "VEVENT")?;
            let (expander, zone) = (self.expander, self.zone);
            let overrides = self.overrides.get_or_insert_with(|| expander.overrides(zone));

            match expander.expand_event(event, &self.window, zone, overrides) {
                Ok(occurrences) => self.pending = occurrences.into_iter(),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn event_span(event: &Component, start: &EventTime, zones: &ZoneTable, zone: Tz) -> Result<Span, FormatError> {
    if let Some(dtend) = event.property("DTEND") {
        let end = EventTime::parse(dtend, &dtend.value, zones)?;
        return match (start, &end) {
            (EventTime::Date(s), EventTime::Date(e)) => Ok(Span::Days((*e - *s).num_days())),
            (_, EventTime::Date(_)) => Err(FormatError::new("DTEND", "date end for a timed start")),
            (EventTime::Date(_), _) => Err(FormatError::new("DTEND", "timed end for a date start")),
            _ => Ok(Span::Exact(end.resolve(zone) - start.resolve(zone))),
        };
    }

    if let Some(duration) = event.property("DURATION") {
        let duration = parse_duration(duration.value.trim())
            .ok_or_else(|| FormatError::new("DURATION", format!("invalid duration `{}`", duration.value)))?;
        return Ok(match start {
            EventTime::Date(_) if duration.num_seconds() % 86_400 == 0 => Span::Days(duration.num_days()),
            _ => Span::Exact(duration),
        });
    }

    Ok(match start {
        EventTime::Date(_) => Span::Days(1),
        _ => Span::Exact(Duration::zero()),
    })
}

/// Instance starts of a recurring series that may land in `window`.
fn series_starts(rule: &RecurrenceRule, start: &EventTime, window: &DateWindow, zone: Tz) -> Vec<EventTime> {
    let time = start.wall().time();
    // Zone shifts move an instance by at most a day either way.
    let earliest = window.from - Duration::days(2);
    let latest = window.to + Duration::days(2);

    let mut starts = Vec::new();
    for (index, date) in rule.dates_from(start.wall().date()).enumerate() {
        if let Some(count) = rule.count {
            if index >= count as usize {
                break;
            }
        }
        if date > latest {
            break;
        }

        let instance = start.with_wall(date.and_time(time));
        if let Some(until) = &rule.until {
            if !within_until(until, &instance, zone) {
                break;
            }
        }
        if date >= earliest {
            starts.push(instance);
        }
    }
    starts
}

fn within_until(until: &Until, instance: &EventTime, zone: Tz) -> bool {
    match until {
        Until::Date(date) => instance.wall().date() <= *date,
        Until::Utc(wall) => instance.resolve(zone).timestamp() <= Utc.from_utc_datetime(wall).timestamp(),
        Until::Floating(wall) => instance.wall() <= *wall,
    }
}

fn occurrence(title: &str, start: &EventTime, span: Span, zone: Tz) -> EventOccurrence {
    let begin = start.resolve(zone);
    match (start, span) {
        (EventTime::Date(date), Span::Days(days)) => {
            let end_date = date.checked_add_signed(Duration::days(days)).unwrap_or(*date);
            EventOccurrence::all_day(title, begin, local_midnight(zone, end_date))
        }
        (EventTime::Date(_), Span::Exact(duration)) => {
            EventOccurrence::all_day(title, begin, begin.checked_add_signed(duration).unwrap_or(begin))
        }
        (_, Span::Days(days)) => {
            EventOccurrence::timed(title, begin, begin.checked_add_signed(Duration::days(days)).unwrap_or(begin))
        }
        (_, Span::Exact(duration)) => {
            EventOccurrence::timed(title, begin, begin.checked_add_signed(duration).unwrap_or(begin))
        }
    }
}

/// Interprets `wall` in `zone`, taking the earlier reading of a repeated hour
/// and moving past a skipped one.
fn localize(zone: Tz, wall: NaiveDateTime) -> DateTime<Tz> {
    match zone.from_local_datetime(&wall) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => zone
            .from_local_datetime(&(wall + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| zone.from_utc_datetime(&wall)),
    }
}

pub(crate) fn local_midnight(zone: Tz, date: NaiveDate) -> DateTime<Tz> {
    localize(zone, date.and_time(NaiveTime::MIN))
}

/// `[+|-]P[nW][nD][T[nH][nM][nS]]`
fn parse_duration(value: &str) -> Option<Duration> {
    let (negative, rest) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };
    let rest = rest.strip_prefix(['P', 'p'])?;

    let mut total = Duration::zero();
    let mut number = String::new();
    let mut in_time = false;
    let mut seen_unit = false;

    for ch in rest.chars() {
        match ch.to_ascii_uppercase() {
            'T' => in_time = true,
            digit if digit.is_ascii_digit() => number.push(digit),
            unit => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                total += match (unit, in_time) {
                    ('W', false) => Duration::weeks(n),
                    ('D', false) => Duration::days(n),
                    ('H', true) => Duration::hours(n),
                    ('M', true) => Duration::minutes(n),
                    ('S', true) => Duration::seconds(n),
                    _ => return None,
                };
                seen_unit = true;
            }
        }
    }

    if !number.is_empty() || !seen_unit {
        return None;
    }
    Some(if negative { -total } else { total })
}
