//! Completion accounting.

/// Counts the sources that have not yet closed.
///
/// The count starts at the number of registered sources and only moves down
/// as sources close. Sources added through a
/// [`Registrar`](crate::Registrar) raise it while the merge is still running.
/// Reaching zero is the single signal that allows the output to be closed.
#[derive(Debug)]
pub struct CompletionTracker {
    remaining: usize,
}

impl CompletionTracker {
    /// Create a tracker for `count` active sources.
    pub fn new(count: usize) -> Self {
        Self { remaining: count }
    }

    /// The number of sources that are still active.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Returns `true` once every source has closed.
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Record one closed source. Returns `true` if it was the last one.
    ///
    /// # Panics
    ///
    /// Panics if called with no active sources left. Each closure is counted
    /// exactly once by [`ReadinessSet::remove`](crate::readiness::ReadinessSet::remove).
    pub fn decrement(&mut self) -> bool {
        assert!(
            self.remaining > 0,
            "completion tracker decremented with no active sources"
        );
        self.remaining -= 1;
        self.remaining == 0
    }

    /// Record one newly registered source.
    pub(crate) fn increment(&mut self) {
        self.remaining += 1;
    }
}
