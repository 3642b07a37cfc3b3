use interfaces::EventOccurrence;

/// Consumer of expanded occurrences.
///
/// Implementations are picked per call site: the digest aggregator for
/// rendering, the log tracker for diagnostics, or both as a pair.
pub trait EventTracker {
    fn accept(&mut self, occurrence: EventOccurrence);

    fn accept_all<I>(&mut self, occurrences: I)
    where
        I: IntoIterator<Item = EventOccurrence>,
        Self: Sized,
    {
        for occurrence in occurrences {
            self.accept(occurrence);
        }
    }

    /// Forget everything accepted so far.
    fn reset(&mut self);
}

impl<T: EventTracker + ?Sized> EventTracker for &mut T {
    fn accept(&mut self, occurrence: EventOccurrence) {
        (**self).accept(occurrence);
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}

impl<A: EventTracker, B: EventTracker> EventTracker for (A, B) {
    fn accept(&mut self, occurrence: EventOccurrence) {
        self.0.accept(occurrence.clone());
        self.1.accept(occurrence);
    }

    fn reset(&mut self) {
        self.0.reset();
        self.1.reset();
    }
}
