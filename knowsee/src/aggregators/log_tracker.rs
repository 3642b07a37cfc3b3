use interfaces::EventOccurrence;
use tracing::debug;

use crate::traits::EventTracker;

/// Emits one debug line per accepted occurrence.
#[derive(Debug, Clone, Default)]
pub struct LogTracker {
    label: String,
    seen: usize,
}

impl LogTracker {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            seen: 0,
        }
    }

    pub fn seen(&self) -> usize {
        self.seen
    }
}

impl EventTracker for LogTracker {
    fn accept(&mut self, occurrence: EventOccurrence) {
        self.seen += 1;
        debug!(
            tracker = %self.label,
            title = %occurrence.title,
            start = %occurrence.start,
            end = %occurrence.end,
            all_day = occurrence.all_day,
            "Occurrence"
        );
    }

    fn reset(&mut self) {
        self.seen = 0;
    }
}
