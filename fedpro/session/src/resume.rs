//! Reconnection pacing for dropped sessions.
//!
//! A strategy decides how long to wait before each resumption attempt, based
//! on the attempt count and how long the session has been disconnected.
//! Returning `None` gives up, which ends the session for good.

use std::time::Duration;

/// Decides the pacing of resumption attempts.
pub trait ResumeStrategy: Send + Sync {
    /// Delay before attempt number `attempt` (starting at 1), given the time
    /// spent disconnected so far. `None` means stop trying.
    fn next_delay(&self, attempt: u32, disconnected: Duration) -> Option<Duration>;

    /// Total time the strategy is willing to keep trying. Used to size the
    /// server-side retention a session should ask for.
    fn retry_limit(&self) -> Duration;
}

/// Retry at a fixed interval until a total time limit runs out.
#[derive(Debug, Clone)]
pub struct SimpleResumeStrategy {
    delay: Duration,
    limit: Duration,
}

impl SimpleResumeStrategy {
    /// Retry every `delay` for at most `limit` in total.
    pub fn new(delay: Duration, limit: Duration) -> Self {
        Self { delay, limit }
    }
}

impl Default for SimpleResumeStrategy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl ResumeStrategy for SimpleResumeStrategy {
    fn next_delay(&self, _attempt: u32, disconnected: Duration) -> Option<Duration> {
        if disconnected + self.delay > self.limit {
            None
        } else {
            Some(self.delay)
        }
    }

    fn retry_limit(&self) -> Duration {
        self.limit
    }
}

/// Retry quickly at first, then back off through fixed phases.
///
/// Each phase is a pair of (end of phase, delay used within it). The phases
/// must be ordered by their end time; the last end time is the overall limit.
#[derive(Debug, Clone)]
pub struct ProgressiveDelayResumeStrategy {
    phases: Vec<(Duration, Duration)>,
}

impl ProgressiveDelayResumeStrategy {
    /// A strategy from explicit phases.
    pub fn new(phases: Vec<(Duration, Duration)>) -> Self {
        assert!(!phases.is_empty());
        assert!(phases.windows(2).all(|w| w[0].0 < w[1].0));
        Self { phases }
    }
}

impl Default for ProgressiveDelayResumeStrategy {
    fn default() -> Self {
        // Hammer for the first seconds, then ease off.
        Self::new(vec![
            (Duration::from_secs(5), Duration::from_millis(100)),
            (Duration::from_secs(15), Duration::from_millis(500)),
            (Duration::from_secs(60), Duration::from_secs(2)),
        ])
    }
}

impl ResumeStrategy for ProgressiveDelayResumeStrategy {
    fn next_delay(&self, _attempt: u32, disconnected: Duration) -> Option<Duration> {
        let phase = self.phases.iter().find(|(end, _)| disconnected < *end)?;
        Some(phase.1)
    }

    fn retry_limit(&self) -> Duration {
        // Non-empty by construction.
        self.phases.last().map(|(end, _)| *end).unwrap_or_default()
    }
}
