//! Edge-triggered failure reporting.

/// Counts consecutive failures so only the first of a streak is surfaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureStreak {
    failures: u32,
}

impl FailureStreak {
    /// Record a failure. Returns `true` only for the first of a streak.
    pub fn failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        self.failures == 1
    }

    /// Record a success. Returns `true` if it ended a streak.
    pub fn success(&mut self) -> bool {
        std::mem::take(&mut self.failures) > 0
    }

    /// Consecutive failures so far.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.failures
    }
}
