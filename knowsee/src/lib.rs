pub mod aggregators;
pub mod bot;
pub mod config;
pub mod context;
pub mod expander;
pub mod fetcher;
pub mod lifecycle;
pub mod parser;
pub mod recurrence;
pub mod scheduler;
pub mod sync;
pub mod telegram;
pub mod timezone;
pub mod traits;
pub mod types;

pub use aggregators::{DaySnapshot, EventAggregator, LogTracker, Markup, SnapshotEntry};
pub use bot::{Command, CommandBot};
pub use config::Config;
pub use context::SyncContext;
pub use expander::{EventExpander, EventTime};
pub use fetcher::Fetcher;
pub use lifecycle::{ChatMessageLifecycle, Transition};
pub use parser::FeedParser;
pub use recurrence::RecurrenceRule;
pub use scheduler::Scheduler;
pub use sync::{DigestBuilder, DigestSettings, SyncOrchestrator, SyncSummary};
pub use telegram::TelegramClient;
pub use traits::EventTracker;
pub use types::*;
