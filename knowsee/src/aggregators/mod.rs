pub mod digest;
pub mod log_tracker;

pub use digest::{DaySnapshot, EventAggregator, SnapshotEntry};
pub use log_tracker::LogTracker;

use std::fmt::Write;

use chrono::{DateTime, Locale};
use chrono_tz::Tz;

/// Target markup of rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    /// Telegram's HTML subset.
    Html,
    Markdown,
}

impl Markup {
    pub fn bold(&self, text: &str) -> String {
        match self {
            Markup::Html => format!("<b>{text}</b>"),
            Markup::Markdown => format!("**{text}**"),
        }
    }

    pub fn italic(&self, text: &str) -> String {
        match self {
            Markup::Html => format!("<i>{text}</i>"),
            Markup::Markdown => format!("_{text}_"),
        }
    }

    /// Escapes user-provided text such as event titles.
    pub fn escape(&self, text: &str) -> String {
        match self {
            Markup::Html => text
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;"),
            Markup::Markdown => text.to_string(),
        }
    }
}

/// Formats `instant` with a strftime `pattern`, localized when a locale is set.
///
/// Patterns are validated when configuration is loaded; an unusable one falls
/// back to RFC 3339 instead of failing the render.
pub fn format_instant(instant: &DateTime<Tz>, pattern: &str, locale: Option<Locale>) -> String {
    let mut out = String::new();
    let written = match locale {
        Some(locale) => write!(out, "{}", instant.format_localized(pattern, locale)),
        None => write!(out, "{}", instant.format(pattern)),
    };
    match written {
        Ok(()) => out,
        Err(_) => instant.to_rfc3339(),
    }
}

/// Generation footer appended under every digest.
pub fn render_footer(
    markup: Markup,
    now: &DateTime<Tz>,
    date_format: &str,
    time_format: &str,
    locale: Option<Locale>,
) -> String {
    markup.italic(&format!(
        "Updated {} {}",
        format_instant(now, date_format, locale),
        format_instant(now, time_format, locale)
    ))
}
