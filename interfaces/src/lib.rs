pub mod defs;
pub mod errors;
pub mod state;

pub use defs::{
    CalendarFeedDescriptor, ChatId, ChatPlatform, EventOccurrence, FeedFetcher, FeedKind, MessageId,
    Store, TrackedMessage, STALENESS_CUTOFF_DAYS,
};
pub use errors::{DescriptorError, FetchError, PersistenceError, PlatformError};
pub use state::SqliteStore;
