//! RFC 5545 recurrence rules, expanded over calendar dates.
//!
//! Only the date component is expanded here; the time of day always comes
//! from the event's DTSTART. Supported parts: `FREQ` (daily through yearly),
//! `INTERVAL`, `COUNT`, `UNTIL`, `BYDAY`, `BYMONTHDAY`, `BYMONTH`, `BYSETPOS`
//! and `WKST`.

use std::collections::VecDeque;
use std::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use tracing::warn;

use crate::types::FormatError;

/// Consecutive periods without a single candidate after which a rule is
/// considered exhausted (e.g. `BYMONTH=2;BYMONTHDAY=30`).
const MAX_EMPTY_PERIODS: u32 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// A `BYDAY` entry such as `MO`, `2TU` or `-1FR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByDay {
    pub ordinal: Option<i32>,
    pub weekday: Weekday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Until {
    Date(NaiveDate),
    Utc(NaiveDateTime),
    Floating(NaiveDateTime),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<Until>,
    pub by_day: Vec<ByDay>,
    pub by_month_day: Vec<i32>,
    pub by_month: Vec<u32>,
    pub by_set_pos: Vec<i32>,
    pub week_start: Weekday,
}

impl FromStr for RecurrenceRule {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |message: String| FormatError::new("RRULE", message);

        let mut frequency = None;
        let mut interval = 1;
        let mut count = None;
        let mut until = None;
        let mut by_day = Vec::new();
        let mut by_month_day = Vec::new();
        let mut by_month = Vec::new();
        let mut by_set_pos = Vec::new();
        let mut week_start = Weekday::Mon;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| error(format!("malformed part `{part}`")))?;
            let value = value.trim();

            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    frequency = Some(match value.to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        "YEARLY" => Frequency::Yearly,
                        other => return Err(error(format!("unsupported frequency {other}"))),
                    })
                }
                "INTERVAL" => {
                    interval = value
                        .parse::<u32>()
                        .ok()
                        .filter(|i| *i > 0)
                        .ok_or_else(|| error(format!("invalid INTERVAL `{value}`")))?
                }
                "COUNT" => {
                    count = Some(
                        value
                            .parse::<u32>()
                            .map_err(|_| error(format!("invalid COUNT `{value}`")))?,
                    )
                }
                "UNTIL" => {
                    until = Some(parse_until(value).ok_or_else(|| error(format!("invalid UNTIL `{value}`")))?)
                }
                "BYDAY" => {
                    by_day = value
                        .split(',')
                        .map(|day| parse_by_day(day.trim()).ok_or_else(|| error(format!("invalid BYDAY `{day}`"))))
                        .collect::<Result<_, _>>()?
                }
                "BYMONTHDAY" => by_month_day = parse_int_list(value, 31).ok_or_else(|| error(format!("invalid BYMONTHDAY `{value}`")))?,
                "BYMONTH" => {
                    by_month = value
                        .split(',')
                        .map(|m| m.trim().parse::<u32>().ok().filter(|m| (1..=12).contains(m)))
                        .collect::<Option<_>>()
                        .ok_or_else(|| error(format!("invalid BYMONTH `{value}`")))?
                }
                "BYSETPOS" => by_set_pos = parse_int_list(value, 366).ok_or_else(|| error(format!("invalid BYSETPOS `{value}`")))?,
                "WKST" => week_start = parse_weekday(value).ok_or_else(|| error(format!("invalid WKST `{value}`")))?,
                other => warn!(part = other, "Ignoring unsupported RRULE part"),
            }
        }

        let frequency = frequency.ok_or_else(|| error("missing FREQ".to_string()))?;

        Ok(Self {
            frequency,
            interval,
            count,
            until,
            by_day,
            by_month_day,
            by_month,
            by_set_pos,
            week_start,
        })
    }
}

impl RecurrenceRule {
    /// Dates of the series in ascending order, starting with `start` itself.
    ///
    /// `COUNT` and `UNTIL` are not applied here because they depend on the
    /// time context of the event.
    pub fn dates_from(&self, start: NaiveDate) -> RecurrenceDates<'_> {
        RecurrenceDates {
            rule: self,
            start,
            period: 0,
            pending: VecDeque::new(),
            started: false,
            exhausted: false,
        }
    }

    fn period_candidates(&self, start: NaiveDate, period: u32) -> Option<Vec<NaiveDate>> {
        let step = period.checked_mul(self.interval)?;

        let mut dates: Vec<NaiveDate> = match self.frequency {
            Frequency::Daily => {
                let day = start.checked_add_days(Days::new(u64::from(step)))?;
                if self.matches_month(day) && self.matches_month_day(day) && self.matches_weekday(day) {
                    vec![day]
                } else {
                    Vec::new()
                }
            }
            Frequency::Weekly => {
                let offset = days_since_week_start(start, self.week_start);
                let week = start
                    .checked_sub_days(Days::new(u64::from(offset)))?
                    .checked_add_days(Days::new(u64::from(step) * 7))?;
                (0..7u64)
                    .filter_map(|i| week.checked_add_days(Days::new(i)))
                    .filter(|day| {
                        if self.by_day.is_empty() {
                            day.weekday() == start.weekday()
                        } else {
                            self.matches_weekday(*day)
                        }
                    })
                    .filter(|day| self.matches_month(*day))
                    .collect()
            }
            Frequency::Monthly => {
                let first = start.with_day(1)?.checked_add_months(Months::new(step))?;
                if self.matches_month(first) {
                    self.month_dates(first.year(), first.month(), start)
                } else {
                    Vec::new()
                }
            }
            Frequency::Yearly => {
                let year = start.year().checked_add(i32::try_from(step).ok()?)?;
                self.year_dates(year, start)
            }
        };

        dates.sort();
        dates.dedup();
        Some(self.apply_set_pos(dates))
    }

    fn matches_month(&self, date: NaiveDate) -> bool {
        self.by_month.is_empty() || self.by_month.contains(&date.month())
    }

    fn matches_weekday(&self, date: NaiveDate) -> bool {
        self.by_day.is_empty() || self.by_day.iter().any(|by| by.weekday == date.weekday())
    }

    fn matches_month_day(&self, date: NaiveDate) -> bool {
        if self.by_month_day.is_empty() {
            return true;
        }
        let length = days_in_month(date.year(), date.month());
        self.by_month_day
            .iter()
            .any(|&day| resolve_month_day(day, length) == Some(date.day()))
    }

    fn month_dates(&self, year: i32, month: u32, start: NaiveDate) -> Vec<NaiveDate> {
        let length = days_in_month(year, month);

        if !self.by_month_day.is_empty() {
            self.by_month_day
                .iter()
                .filter_map(|&day| resolve_month_day(day, length))
                .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
                .filter(|date| self.matches_weekday(*date))
                .collect()
        } else if !self.by_day.is_empty() {
            let days: Vec<NaiveDate> = (1..=length)
                .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
                .collect();
            self.by_day
                .iter()
                .flat_map(|by| select_weekdays(&days, *by))
                .collect()
        } else {
            NaiveDate::from_ymd_opt(year, month, start.day())
                .into_iter()
                .collect()
        }
    }

    fn year_dates(&self, year: i32, start: NaiveDate) -> Vec<NaiveDate> {
        if !self.by_month.is_empty() || !self.by_month_day.is_empty() {
            let months: Vec<u32> = if self.by_month.is_empty() {
                (1..=12).collect()
            } else {
                self.by_month.clone()
            };
            months
                .into_iter()
                .flat_map(|month| self.month_dates(year, month, start))
                .collect()
        } else if !self.by_day.is_empty() {
            let days: Vec<NaiveDate> = NaiveDate::from_ymd_opt(year, 1, 1)
                .into_iter()
                .flat_map(|first| first.iter_days().take_while(move |d| d.year() == year))
                .collect();
            self.by_day
                .iter()
                .flat_map(|by| select_weekdays(&days, *by))
                .collect()
        } else {
            NaiveDate::from_ymd_opt(year, start.month(), start.day())
                .into_iter()
                .collect()
        }
    }

    fn apply_set_pos(&self, dates: Vec<NaiveDate>) -> Vec<NaiveDate> {
        if self.by_set_pos.is_empty() {
            return dates;
        }
        let mut selected: Vec<NaiveDate> = self
            .by_set_pos
            .iter()
            .filter_map(|&pos| pick(&dates, pos))
            .collect();
        selected.sort();
        selected.dedup();
        selected
    }
}

/// Lazy iterator over the dates of a [`RecurrenceRule`].
pub struct RecurrenceDates<'a> {
    rule: &'a RecurrenceRule,
    start: NaiveDate,
    period: u32,
    pending: VecDeque<NaiveDate>,
    started: bool,
    exhausted: bool,
}

impl Iterator for RecurrenceDates<'_> {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        // DTSTART is always the first instance, whether or not it matches the rule.
        if !self.started {
            self.started = true;
            return Some(self.start);
        }

        let mut empty_periods = 0;
        loop {
            while let Some(date) = self.pending.pop_front() {
                if date > self.start {
                    return Some(date);
                }
            }
            if self.exhausted || empty_periods >= MAX_EMPTY_PERIODS {
                self.exhausted = true;
                return None;
            }

            match self.rule.period_candidates(self.start, self.period) {
                Some(dates) if dates.is_empty() => empty_periods += 1,
                Some(dates) => {
                    empty_periods = 0;
                    self.pending.extend(dates);
                }
                None => self.exhausted = true,
            }

            match self.period.checked_add(1) {
                Some(next) => self.period = next,
                None => self.exhausted = true,
            }
        }
    }
}

fn pick(dates: &[NaiveDate], position: i32) -> Option<NaiveDate> {
    let len = i64::try_from(dates.len()).ok()?;
    let index = if position > 0 {
        i64::from(position) - 1
    } else {
        len + i64::from(position)
    };
    usize::try_from(index).ok().and_then(|i| dates.get(i)).copied()
}

fn select_weekdays(days: &[NaiveDate], by: ByDay) -> Vec<NaiveDate> {
    let matching: Vec<NaiveDate> = days
        .iter()
        .copied()
        .filter(|d| d.weekday() == by.weekday)
        .collect();
    match by.ordinal {
        None => matching,
        Some(ordinal) => pick(&matching, ordinal).into_iter().collect(),
    }
}

fn resolve_month_day(day: i32, length: u32) -> Option<u32> {
    let length = i32::try_from(length).ok()?;
    let resolved = if day > 0 { day } else { length + 1 + day };
    if (1..=length).contains(&resolved) {
        u32::try_from(resolved).ok()
    } else {
        None
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn days_since_week_start(date: NaiveDate, week_start: Weekday) -> u32 {
    (date.weekday().num_days_from_monday() + 7 - week_start.num_days_from_monday()) % 7
}

fn parse_weekday(value: &str) -> Option<Weekday> {
    match value.to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

fn parse_by_day(value: &str) -> Option<ByDay> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (ordinal, weekday) = value.split_at(value.len() - 2);
    let weekday = parse_weekday(weekday)?;
    let ordinal = match ordinal {
        "" => None,
        n => Some(n.trim_start_matches('+').parse::<i32>().ok().filter(|n| *n != 0)?),
    };
    Some(ByDay { ordinal, weekday })
}

fn parse_int_list(value: &str, bound: i32) -> Option<Vec<i32>> {
    value
        .split(',')
        .map(|n| {
            n.trim()
                .trim_start_matches('+')
                .parse::<i32>()
                .ok()
                .filter(|n| *n != 0 && n.abs() <= bound)
        })
        .collect()
}

fn parse_until(value: &str) -> Option<Until> {
    if let Some(utc) = value.strip_suffix('Z') {
        return parse_datetime(utc).map(Until::Utc);
    }
    if value.len() == 8 {
        return parse_date(value).map(Until::Date);
    }
    parse_datetime(value).map(Until::Floating)
}

/// `YYYYMMDD`
pub(crate) fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = value[0..4].parse().ok()?;
    let month = value[4..6].parse().ok()?;
    let day = value[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `YYYYMMDDTHHMMSS`, without a trailing `Z`.
pub(crate) fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let (date, time) = value.split_once(['T', 't'])?;
    let date = parse_date(date)?;
    if time.len() != 6 || !time.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour = time[0..2].parse().ok()?;
    let minute = time[2..4].parse().ok()?;
    // Leap seconds are clamped.
    let second = time[4..6].parse::<u32>().ok()?.min(59);
    NaiveTime::from_hms_opt(hour, minute, second).map(|t| date.and_time(t))
}
