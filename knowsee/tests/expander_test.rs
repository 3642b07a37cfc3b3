mod common;

use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use common::{ics, init_tracing};
use interfaces::EventOccurrence;
use knowsee::{DateWindow, EventExpander, FeedParser};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn window(from: NaiveDate, to: NaiveDate) -> DateWindow {
    DateWindow::new(from, to)
}

fn expand(body: &str, window: DateWindow, zone: Tz) -> Vec<EventOccurrence> {
    let mut occurrences = EventExpander::parse(&ics(body))
        .unwrap()
        .expand(window, zone)
        .unwrap();
    occurrences.sort_by_key(|o| o.start);
    occurrences
}

fn starts(occurrences: &[EventOccurrence]) -> Vec<String> {
    occurrences
        .iter()
        .map(|o| o.start.format("%Y-%m-%d %H:%M").to_string())
        .collect()
}

#[test]
fn date_only_event_lasts_one_day() {
    init_tracing();
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:a\nSUMMARY:Holiday\nDTSTART;VALUE=DATE:20240115\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 1, 31)),
        Tz::UTC,
    );

    assert_eq!(occurrences.len(), 1);
    let holiday = &occurrences[0];
    assert!(holiday.all_day);
    assert_eq!(holiday.title, "Holiday");
    assert_eq!(holiday.date(), date(2024, 1, 15));
    assert_eq!(holiday.end - holiday.start, Duration::days(1));
}

#[test]
fn timed_event_keeps_exact_instants() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:b\nSUMMARY:Standup\nDTSTART;TZID=Europe/Berlin:20240115T090000\nDTEND;TZID=Europe/Berlin:20240115T103000\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 1, 31)),
        chrono_tz::Europe::Berlin,
    );

    assert_eq!(occurrences.len(), 1);
    assert!(!occurrences[0].all_day);
    assert_eq!(starts(&occurrences), vec!["2024-01-15 09:00"]);
    assert_eq!(occurrences[0].end - occurrences[0].start, Duration::minutes(90));
}

#[test]
fn utc_times_are_shown_in_the_display_zone() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:c\nSUMMARY:Call\nDTSTART:20240115T080000Z\nDURATION:PT30M\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 1, 31)),
        chrono_tz::Europe::Berlin,
    );

    assert_eq!(starts(&occurrences), vec!["2024-01-15 09:00"]);
    assert_eq!(occurrences[0].end - occurrences[0].start, Duration::minutes(30));
}

#[test]
fn vendor_prefixed_tzid_is_understood() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:d\nSUMMARY:Lunch\nDTSTART;TZID=/mozilla.org/20050126_1/America/New_York:20240115T120000\nDTEND;TZID=/mozilla.org/20050126_1/America/New_York:20240115T130000\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 1, 31)),
        Tz::UTC,
    );

    assert_eq!(starts(&occurrences), vec!["2024-01-15 17:00"]);
}

#[test]
fn date_value_without_value_type_is_rejected() {
    let expander = EventExpander::parse(&ics(
        "BEGIN:VEVENT\nUID:e\nSUMMARY:Broken\nDTSTART:20240115\nEND:VEVENT\n",
    ))
    .unwrap();

    let result = expander.expand(window(date(2024, 1, 1), date(2024, 1, 31)), Tz::UTC);
    let error = result.unwrap_err();
    assert_eq!(error.context, "DTSTART");
}

#[test]
fn malformed_event_is_reported_without_stopping_the_iterator() {
    let expander = EventExpander::parse(&ics(
        "BEGIN:VEVENT\nUID:1\nSUMMARY:First\nDTSTART;VALUE=DATE:20240110\nEND:VEVENT\n\
         BEGIN:VEVENT\nUID:2\nSUMMARY:Broken\nDTSTART;VALUE=PERIOD:20240111T000000Z/PT1H\nEND:VEVENT\n\
         BEGIN:VEVENT\nUID:3\nSUMMARY:Third\nDTSTART;VALUE=DATE:20240112\nEND:VEVENT\n",
    ))
    .unwrap();
    let range = window(date(2024, 1, 1), date(2024, 1, 31));

    let items: Vec<_> = expander.occurrences(range, Tz::UTC).collect();
    assert_eq!(items.len(), 3);
    assert_eq!(items.iter().filter(|item| item.is_err()).count(), 1);
    assert!(expander.expand(range, Tz::UTC).is_err());
}

#[test]
fn occurrences_can_be_restarted() {
    let expander = EventExpander::parse(&ics(
        "BEGIN:VEVENT\nUID:f\nSUMMARY:Daily\nDTSTART:20240101T070000Z\nRRULE:FREQ=DAILY;COUNT=3\nEND:VEVENT\n",
    ))
    .unwrap();
    let range = window(date(2024, 1, 1), date(2024, 1, 31));

    let first: Vec<_> = expander.occurrences(range, Tz::UTC).collect::<Result<_, _>>().unwrap();
    let second: Vec<_> = expander.occurrences(range, Tz::UTC).collect::<Result<_, _>>().unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[test]
fn weekly_rule_with_weekdays_and_count() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:g\nSUMMARY:Gym\nDTSTART:20240101T100000\nDTEND:20240101T110000\nRRULE:FREQ=WEEKLY;BYDAY=MO,WE;COUNT=4\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 1, 31)),
        Tz::UTC,
    );

    assert_eq!(
        starts(&occurrences),
        vec!["2024-01-01 10:00", "2024-01-03 10:00", "2024-01-08 10:00", "2024-01-10 10:00"]
    );
}

#[test]
fn count_includes_instances_before_the_window() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:h\nSUMMARY:Course\nDTSTART:20240101T100000\nRRULE:FREQ=DAILY;COUNT=5\nEND:VEVENT\n",
        window(date(2024, 1, 4), date(2024, 1, 31)),
        Tz::UTC,
    );

    assert_eq!(starts(&occurrences), vec!["2024-01-04 10:00", "2024-01-05 10:00"]);
}

#[test]
fn until_bounds_the_series() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:i\nSUMMARY:Sprint\nDTSTART:20240101T090000Z\nRRULE:FREQ=WEEKLY;UNTIL=20240115T000000Z\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 2, 29)),
        Tz::UTC,
    );

    assert_eq!(starts(&occurrences), vec!["2024-01-01 09:00", "2024-01-08 09:00"]);
}

#[test]
fn monthly_last_friday() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:j\nSUMMARY:Review\nDTSTART;VALUE=DATE:20240126\nRRULE:FREQ=MONTHLY;BYDAY=-1FR\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 4, 30)),
        Tz::UTC,
    );

    let dates: Vec<NaiveDate> = occurrences.iter().map(|o| o.date()).collect();
    assert_eq!(
        dates,
        vec![date(2024, 1, 26), date(2024, 2, 23), date(2024, 3, 29), date(2024, 4, 26)]
    );
    assert!(occurrences.iter().all(|o| o.all_day));
}

#[test]
fn monthly_day_skips_short_months() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:k\nSUMMARY:Rent\nDTSTART;VALUE=DATE:20240131\nRRULE:FREQ=MONTHLY;BYMONTHDAY=31\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 5, 31)),
        Tz::UTC,
    );

    let dates: Vec<NaiveDate> = occurrences.iter().map(|o| o.date()).collect();
    assert_eq!(dates, vec![date(2024, 1, 31), date(2024, 3, 31), date(2024, 5, 31)]);
}

#[test]
fn set_position_picks_last_weekday_of_month() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:l\nSUMMARY:Payroll\nDTSTART:20240131T090000\nRRULE:FREQ=MONTHLY;BYDAY=MO,TU,WE,TH,FR;BYSETPOS=-1;COUNT=3\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 12, 31)),
        Tz::UTC,
    );

    assert_eq!(
        starts(&occurrences),
        vec!["2024-01-31 09:00", "2024-02-29 09:00", "2024-03-29 09:00"]
    );
}

#[test]
fn yearly_rule_by_month_and_weekday() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:m\nSUMMARY:Clocks change\nDTSTART;VALUE=DATE:20240331\nRRULE:FREQ=YEARLY;BYMONTH=3;BYDAY=-1SU\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2025, 12, 31)),
        Tz::UTC,
    );

    let dates: Vec<NaiveDate> = occurrences.iter().map(|o| o.date()).collect();
    assert_eq!(dates, vec![date(2024, 3, 31), date(2025, 3, 30)]);
}

#[test]
fn weekly_series_keeps_local_time_across_dst() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:n\nSUMMARY:Choir\nDTSTART;TZID=Europe/Berlin:20240325T090000\nDTEND;TZID=Europe/Berlin:20240325T100000\nRRULE:FREQ=WEEKLY;COUNT=2\nEND:VEVENT\n",
        window(date(2024, 3, 1), date(2024, 4, 30)),
        chrono_tz::Europe::Berlin,
    );

    assert_eq!(starts(&occurrences), vec!["2024-03-25 09:00", "2024-04-01 09:00"]);
    let utc_hours: Vec<String> = occurrences
        .iter()
        .map(|o| o.start.naive_utc().format("%H:%M").to_string())
        .collect();
    assert_eq!(utc_hours, vec!["08:00", "07:00"]);
}

#[test]
fn exdate_and_recurrence_id_replace_instances() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:series\nSUMMARY:Sync\nDTSTART:20240101T100000\nDTEND:20240101T110000\nRRULE:FREQ=DAILY;COUNT=5\nEXDATE:20240102T100000\nEND:VEVENT\n\
         BEGIN:VEVENT\nUID:series\nSUMMARY:Sync (moved)\nRECURRENCE-ID:20240103T100000\nDTSTART:20240103T150000\nDTEND:20240103T160000\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 1, 31)),
        Tz::UTC,
    );

    assert_eq!(
        starts(&occurrences),
        vec!["2024-01-01 10:00", "2024-01-03 15:00", "2024-01-04 10:00", "2024-01-05 10:00"]
    );
    assert_eq!(occurrences[1].title, "Sync (moved)");
}

#[test]
fn rdate_adds_instances() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:o\nSUMMARY:Extra\nDTSTART:20240105T120000Z\nRDATE:20240107T120000Z,20240109T120000Z\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 1, 31)),
        Tz::UTC,
    );

    assert_eq!(
        starts(&occurrences),
        vec!["2024-01-05 12:00", "2024-01-07 12:00", "2024-01-09 12:00"]
    );
}

#[test]
fn events_outside_the_window_are_dropped() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:p\nSUMMARY:Before\nDTSTART;VALUE=DATE:20231231\nEND:VEVENT\n\
         BEGIN:VEVENT\nUID:q\nSUMMARY:Inside\nDTSTART;VALUE=DATE:20240101\nEND:VEVENT\n\
         BEGIN:VEVENT\nUID:r\nSUMMARY:After\nDTSTART;VALUE=DATE:20240108\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 1, 7)),
        Tz::UTC,
    );

    let titles: Vec<&str> = occurrences.iter().map(|o| o.title.as_str()).collect();
    assert_eq!(titles, vec!["Inside"]);
}

#[test]
fn unsupported_frequency_is_a_format_error() {
    let expander = EventExpander::parse(&ics(
        "BEGIN:VEVENT\nUID:s\nSUMMARY:Tick\nDTSTART:20240101T100000Z\nRRULE:FREQ=HOURLY\nEND:VEVENT\n",
    ))
    .unwrap();

    let error = expander
        .expand(window(date(2024, 1, 1), date(2024, 1, 7)), Tz::UTC)
        .unwrap_err();
    assert_eq!(error.context, "RRULE");
}

#[test]
fn folded_lines_and_escaped_text_are_decoded() {
    let calendar = FeedParser::parse(&ics(
        "BEGIN:VEVENT\nUID:t\nSUMMARY:Planning\\, budget\n  and roadmap\nDESCRIPTION;LANGUAGE=\"en:US\":Line one\\nLine two\nDTSTART;VALUE=DATE:20240102\nEND:VEVENT\n",
    ))
    .unwrap();

    let event = calendar.children_named("VEVENT").next().unwrap();
    assert_eq!(event.property("SUMMARY").unwrap().text(), "Planning, budget and roadmap");

    let description = event.property("DESCRIPTION").unwrap();
    assert_eq!(description.param("language"), Some("en:US"));
    assert_eq!(description.text(), "Line one\nLine two");
}

#[test]
fn parser_rejects_unbalanced_components() {
    let error = FeedParser::parse("BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nEND:VCALENDAR\r\n").unwrap_err();
    assert_eq!(error.context, "END:VCALENDAR");
}

const CENTRAL_EUROPE_RULES: &str = "BEGIN:STANDARD\nDTSTART:16010101T030000\nTZOFFSETFROM:+0200\nTZOFFSETTO:+0100\nRRULE:FREQ=YEARLY;BYDAY=-1SU;BYMONTH=10\nEND:STANDARD\nBEGIN:DAYLIGHT\nDTSTART:16010101T020000\nTZOFFSETFROM:+0100\nTZOFFSETTO:+0200\nRRULE:FREQ=YEARLY;BYDAY=-1SU;BYMONTH=3\nEND:DAYLIGHT\n";

fn vtimezone(tzid: &str) -> String {
    format!("BEGIN:VTIMEZONE\nTZID:{tzid}\n{CENTRAL_EUROPE_RULES}END:VTIMEZONE\n")
}

#[test]
fn outlook_zone_names_use_the_feed_definition() {
    let body = format!(
        "{}BEGIN:VEVENT\nUID:o1\nSUMMARY:Board meeting\nDTSTART;TZID=W. Europe Standard Time:20240115T100000\nDTEND;TZID=W. Europe Standard Time:20240115T110000\nEND:VEVENT\n",
        vtimezone("W. Europe Standard Time")
    );
    let occurrences = expand(&body, window(date(2024, 1, 1), date(2024, 1, 31)), Tz::UTC);

    assert_eq!(starts(&occurrences), vec!["2024-01-15 09:00"]);
    assert_eq!(occurrences[0].end - occurrences[0].start, Duration::hours(1));
}

#[test]
fn feed_defined_zone_follows_its_daylight_rules() {
    let body = format!(
        "{}BEGIN:VEVENT\nUID:o2\nSUMMARY:Summer sync\nDTSTART;TZID=Office Time:20240701T100000\nEND:VEVENT\nBEGIN:VEVENT\nUID:o3\nSUMMARY:Weekly\nDTSTART;TZID=Office Time:20240327T100000\nRRULE:FREQ=WEEKLY;COUNT=2\nEND:VEVENT\n",
        vtimezone("Office Time")
    );
    let occurrences = expand(&body, window(date(2024, 3, 1), date(2024, 7, 31)), Tz::UTC);

    // The weekly series crosses the switch to summer time on 31 March.
    assert_eq!(
        starts(&occurrences),
        vec!["2024-03-27 09:00", "2024-04-03 08:00", "2024-07-01 08:00"]
    );
}

#[test]
fn known_windows_zone_without_definition() {
    let occurrences = expand(
        "BEGIN:VEVENT\nUID:o4\nSUMMARY:Call\nDTSTART;TZID=Eastern Standard Time:20240115T100000\nEND:VEVENT\n",
        window(date(2024, 1, 1), date(2024, 1, 31)),
        Tz::UTC,
    );

    assert_eq!(starts(&occurrences), vec!["2024-01-15 15:00"]);
}
