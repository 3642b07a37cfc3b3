//! Time zones named by `TZID` parameters.
//!
//! IANA names resolve through chrono-tz. Anything else is looked up in the
//! feed's own `VTIMEZONE` definitions, then in the table of Windows zone names
//! Outlook and Exchange emit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDateTime, Offset, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::parser::Component;
use crate::recurrence::{parse_datetime, RecurrenceRule, Until};

/// Windows zone name to IANA name, per the CLDR "001" territory mapping.
const WINDOWS_ZONES: &[(&str, &str)] = &[
    ("Dateline Standard Time", "Etc/GMT+12"),
    ("UTC", "Etc/UTC"),
    ("Hawaiian Standard Time", "Pacific/Honolulu"),
    ("Alaskan Standard Time", "America/Anchorage"),
    ("Pacific Standard Time", "America/Los_Angeles"),
    ("US Mountain Standard Time", "America/Phoenix"),
    ("Mountain Standard Time", "America/Denver"),
    ("Central Standard Time", "America/Chicago"),
    ("Eastern Standard Time", "America/New_York"),
    ("Atlantic Standard Time", "America/Halifax"),
    ("Newfoundland Standard Time", "America/St_Johns"),
    ("E. South America Standard Time", "America/Sao_Paulo"),
    ("Argentina Standard Time", "America/Buenos_Aires"),
    ("GMT Standard Time", "Europe/London"),
    ("Greenwich Standard Time", "Atlantic/Reykjavik"),
    ("W. Europe Standard Time", "Europe/Berlin"),
    ("Central Europe Standard Time", "Europe/Budapest"),
    ("Romance Standard Time", "Europe/Paris"),
    ("Central European Standard Time", "Europe/Warsaw"),
    ("E. Europe Standard Time", "Europe/Chisinau"),
    ("FLE Standard Time", "Europe/Kiev"),
    ("GTB Standard Time", "Europe/Bucharest"),
    ("Turkey Standard Time", "Europe/Istanbul"),
    ("Israel Standard Time", "Asia/Jerusalem"),
    ("Russian Standard Time", "Europe/Moscow"),
    ("Arabian Standard Time", "Asia/Dubai"),
    ("India Standard Time", "Asia/Calcutta"),
    ("China Standard Time", "Asia/Shanghai"),
    ("Singapore Standard Time", "Asia/Singapore"),
    ("Tokyo Standard Time", "Asia/Tokyo"),
    ("Korea Standard Time", "Asia/Seoul"),
    ("AUS Eastern Standard Time", "Australia/Sydney"),
    ("New Zealand Standard Time", "Pacific/Auckland"),
    ("South Africa Standard Time", "Africa/Johannesburg"),
];

/// Result of resolving a `TZID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneRef {
    Iana(Tz),
    Defined(Arc<FeedZone>),
}

/// One `STANDARD` or `DAYLIGHT` block of a `VTIMEZONE`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observance {
    /// Local wall time of the first onset, read in `offset_from`.
    start: NaiveDateTime,
    offset_from: FixedOffset,
    offset_to: FixedOffset,
    rule: Option<RecurrenceRule>,
    extra_onsets: Vec<NaiveDateTime>,
}

impl Observance {
    /// Latest onset at or before `wall`.
    fn last_onset(&self, wall: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.start > wall {
            return None;
        }

        let mut latest = self.start;
        if let Some(rule) = &self.rule {
            let time = self.start.time();
            for (index, date) in rule.dates_from(self.start.date()).enumerate() {
                if rule.count.is_some_and(|count| index >= count as usize) {
                    break;
                }
                let onset = date.and_time(time);
                if onset > wall || !self.within_until(rule, onset) {
                    break;
                }
                latest = onset;
            }
        }

        self.extra_onsets
            .iter()
            .copied()
            .filter(|onset| *onset <= wall)
            .chain(std::iter::once(latest))
            .max()
    }

    fn within_until(&self, rule: &RecurrenceRule, onset: NaiveDateTime) -> bool {
        match &rule.until {
            None => true,
            Some(Until::Date(date)) => onset.date() <= *date,
            Some(Until::Floating(until)) => onset <= *until,
            Some(Until::Utc(until)) => onset - self.offset_from <= *until,
        }
    }
}

/// A zone defined inside the feed by a `VTIMEZONE` component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedZone {
    tzid: String,
    observances: Vec<Observance>,
}

impl FeedZone {
    fn from_component(component: &Component) -> Option<Self> {
        let tzid = component.property("TZID")?.value.trim().to_string();
        let observances: Vec<Observance> = component
            .children
            .iter()
            .filter(|c| c.name == "STANDARD" || c.name == "DAYLIGHT")
            .filter_map(|c| {
                let observance = read_observance(c);
                if observance.is_none() {
                    warn!(tzid = %tzid, block = %c.name, "Ignoring unreadable time zone observance");
                }
                observance
            })
            .collect();

        if observances.is_empty() {
            warn!(tzid = %tzid, "Time zone definition has no usable observances");
            return None;
        }
        Some(Self { tzid, observances })
    }

    /// UTC offset in effect at local time `wall`.
    fn offset_at(&self, wall: NaiveDateTime) -> FixedOffset {
        let current = self
            .observances
            .iter()
            .filter_map(|o| o.last_onset(wall).map(|onset| (onset, o.offset_to)))
            .max_by_key(|(onset, _)| *onset);

        match current {
            Some((_, offset)) => offset,
            // Before the first onset the zone is at the offset it was coming from.
            None => self
                .observances
                .iter()
                .min_by_key(|o| o.start)
                .map_or(Utc.fix(), |o| o.offset_from),
        }
    }

    /// The UTC reading of local time `wall`.
    pub fn to_utc(&self, wall: NaiveDateTime) -> NaiveDateTime {
        wall - self.offset_at(wall)
    }
}

/// Zones a single feed can refer to.
#[derive(Debug, Clone, Default)]
pub struct ZoneTable {
    defined: HashMap<String, Arc<FeedZone>>,
}

impl ZoneTable {
    /// Collects the `VTIMEZONE` children of `calendar`.
    pub fn from_calendar(calendar: &Component) -> Self {
        let defined: HashMap<String, Arc<FeedZone>> = calendar
            .children_named("VTIMEZONE")
            .filter_map(FeedZone::from_component)
            .map(|zone| (zone.tzid.clone(), Arc::new(zone)))
            .collect();
        if !defined.is_empty() {
            debug!(zones = defined.len(), "Read feed time zone definitions");
        }
        Self { defined }
    }

    pub fn resolve(&self, tzid: &str) -> Option<ZoneRef> {
        let tzid = tzid.trim();
        if let Some(zone) = lookup_iana(tzid) {
            return Some(ZoneRef::Iana(zone));
        }
        if let Some(zone) = self.defined.get(tzid) {
            return Some(ZoneRef::Defined(Arc::clone(zone)));
        }
        windows_zone(tzid).map(ZoneRef::Iana)
    }
}

/// Resolves `tzid` as an IANA name, also behind a vendor path prefix
/// (`/mozilla.org/20050126_1/Europe/Berlin`).
fn lookup_iana(tzid: &str) -> Option<Tz> {
    let tzid = tzid.trim();
    if let Ok(zone) = tzid.parse::<Tz>() {
        return Some(zone);
    }
    let segments: Vec<&str> = tzid.split('/').filter(|s| !s.is_empty()).collect();
    (1..segments.len()).find_map(|i| segments[i..].join("/").parse::<Tz>().ok())
}

fn windows_zone(name: &str) -> Option<Tz> {
    WINDOWS_ZONES
        .iter()
        .find(|(windows, _)| windows.eq_ignore_ascii_case(name))
        .and_then(|(_, iana)| iana.parse::<Tz>().ok())
}

fn read_observance(component: &Component) -> Option<Observance> {
    let start = parse_datetime(component.property("DTSTART")?.value.trim())?;
    let offset_from = parse_offset(&component.property("TZOFFSETFROM")?.value)?;
    let offset_to = parse_offset(&component.property("TZOFFSETTO")?.value)?;

    let rule = match component.property("RRULE") {
        Some(rrule) => Some(rrule.value.parse::<RecurrenceRule>().ok()?),
        None => None,
    };
    let extra_onsets = component
        .properties_named("RDATE")
        .flat_map(|rdate| rdate.value.split(','))
        .filter_map(|raw| parse_datetime(raw.trim()))
        .collect();

    Some(Observance {
        start,
        offset_from,
        offset_to,
        rule,
        extra_onsets,
    })
}

/// `+HHMM` or `+HHMMSS`; offsets of a day or more are rejected.
fn parse_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    let (sign, digits) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    if !(digits.len() == 4 || digits.len() == 6) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[0..2].parse().ok()?;
    let minutes: i32 = digits[2..4].parse().ok()?;
    let seconds: i32 = if digits.len() == 6 { digits[4..6].parse().ok()? } else { 0 };
    if minutes >= 60 || seconds >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60 + seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offsets() {
        assert_eq!(parse_offset("+0100"), FixedOffset::east_opt(3600));
        assert_eq!(parse_offset("-0530"), FixedOffset::east_opt(-19_800));
        assert_eq!(parse_offset("+013015"), FixedOffset::east_opt(5415));
        // iCloud's broken value until the fetcher repairs it.
        assert_eq!(parse_offset("+5328"), None);
        assert_eq!(parse_offset("+0053"), FixedOffset::east_opt(3180));
        assert_eq!(parse_offset("0100"), None);
    }

    #[test]
    fn maps_windows_names() {
        assert_eq!(windows_zone("W. Europe Standard Time"), Some(chrono_tz::Europe::Berlin));
        assert_eq!(windows_zone("eastern standard time"), Some(chrono_tz::America::New_York));
        assert_eq!(windows_zone("Mars Standard Time"), None);
    }

    #[test]
    fn resolves_vendor_prefixed_zones() {
        assert_eq!(lookup_iana("Europe/Berlin"), Some(chrono_tz::Europe::Berlin));
        assert_eq!(
            lookup_iana("/mozilla.org/20050126_1/Europe/Berlin"),
            Some(chrono_tz::Europe::Berlin)
        );
        assert_eq!(lookup_iana("Mars/Olympus"), None);
    }
}
