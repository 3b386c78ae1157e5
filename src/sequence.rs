//! Highest-sequence-seen tracking for cumulative sequence acks.

/// Outcome of observing one inbound sequence id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    /// Strictly greater than anything seen; the caller must ack it.
    Advanced,
    /// Not greater than the tracked value; no ack is sent.
    Stale,
}

/// Tracks the last received sequence id of one session.
///
/// The default value of `S` means nothing has been received. Comparison is
/// `S`'s own ordering, so string ids compare lexicographically.
#[derive(Clone, Debug, Default)]
pub struct SequenceTracker<S> {
    last: S,
}

impl<S: Clone + Ord + Default> SequenceTracker<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, sequence_id: &S) -> Observation {
        if *sequence_id > self.last {
            self.last = sequence_id.clone();
            Observation::Advanced
        } else {
            Observation::Stale
        }
    }

    #[must_use]
    pub fn last(&self) -> &S {
        &self.last
    }

    /// Forget the checkpoint. Used when a fresh session replaces the old one.
    pub fn reset(&mut self) {
        self.last = S::default();
    }
}

#[cfg(test)]
#[path = "sequence_test.rs"]
mod tests;
