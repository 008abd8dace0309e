//! Sliding-window call tracker for a single rule.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::clock::{Clock, SystemClock};

/// Result of asking a tracker whether one more call may happen now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatus {
    /// Whether one more call fits under the limit right now
    pub allowed: bool,
    /// How long until a slot frees up; zero when allowed
    pub retry_after: Duration,
}

impl WindowStatus {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

/// Tracks admitted calls for one "at most N calls per W" rule.
///
/// The history is a FIFO of admission instants. Entries at least `window`
/// old are pruned before every decision and never count again.
///
/// `query` and `record` each take the tracker's own lock, so the tracker is
/// safe to share directly. They are still two separate lock acquisitions: a
/// caller that needs "check then record" to be atomic, possibly across
/// several trackers, must hold its own lock around both. See
/// [`RateLimiter`](super::RateLimiter).
#[derive(Debug)]
pub struct WindowTracker<C: Clock = SystemClock> {
    max_calls: u32,
    window: Duration,
    name: Option<String>,
    clock: C,
    history: Mutex<VecDeque<Instant>>,
}

impl WindowTracker<SystemClock> {
    /// Create a tracker on the system clock.
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self::with_clock(max_calls, window, SystemClock)
    }
}

impl<C: Clock> WindowTracker<C> {
    /// Create a tracker reading time from `clock`.
    ///
    /// A `max_calls` of zero is accepted and denies every query.
    pub fn with_clock(max_calls: u32, window: Duration, clock: C) -> Self {
        Self {
            max_calls,
            window,
            name: None,
            clock,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Attach a name used in log output.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Prune expired calls and report whether one more call is allowed.
    ///
    /// Pruning is the only mutation; repeated queries never append and so
    /// never flip a denial into an admission except by time passing.
    ///
    /// When denied, `retry_after` is the time until the oldest counted call
    /// leaves the window. If that is not positive, cannot be represented, or
    /// there is no call to anchor it (a zero limit), the full window is
    /// reported instead so a denied caller never retries with a zero delay.
    pub fn query(&self) -> WindowStatus {
        let now = self.clock.now();
        let mut history = self.history.lock();
        Self::prune(&mut history, now, self.window);

        if history.len() < self.max_calls as usize {
            trace!(
                rule = self.label(),
                active = history.len(),
                max_calls = self.max_calls,
                "Call allowed"
            );
            return WindowStatus::allowed();
        }

        let retry_after = history
            .front()
            .and_then(|oldest| oldest.checked_add(self.window))
            .map(|expires| expires.saturating_duration_since(now))
            .filter(|delay| !delay.is_zero())
            .unwrap_or(self.window);

        trace!(
            rule = self.label(),
            active = history.len(),
            max_calls = self.max_calls,
            retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            "Call denied"
        );
        WindowStatus::denied(retry_after)
    }

    /// Record an admitted call at the current instant.
    pub fn record(&self) {
        let now = self.clock.now();
        self.history.lock().push_back(now);
    }

    /// Number of calls still inside the window, after pruning.
    pub fn active_calls(&self) -> usize {
        let now = self.clock.now();
        let mut history = self.history.lock();
        Self::prune(&mut history, now, self.window);
        history.len()
    }

    /// Get the call limit for this rule.
    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    /// Get the window length for this rule.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Get the clock this tracker reads.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Get the rule name, if one was set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    fn prune(history: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = history.front() {
            if now.saturating_duration_since(*oldest) < window {
                break;
            }
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::MockClock;
    use std::sync::Arc;

    fn tracker(max_calls: u32, window_ms: u64) -> (WindowTracker<MockClock>, MockClock) {
        let clock = MockClock::default();
        let tracker =
            WindowTracker::with_clock(max_calls, Duration::from_millis(window_ms), clock.clone());
        (tracker, clock)
    }

    #[test]
    fn test_first_call_allowed() {
        let (tracker, _) = tracker(1, 1000);

        let status = tracker.query();

        assert!(status.allowed);
        assert_eq!(status.retry_after, Duration::ZERO);
    }

    #[test]
    fn test_denied_once_limit_reached() {
        let (tracker, _) = tracker(3, 1000);

        for _ in 0..3 {
            assert!(tracker.query().allowed);
            tracker.record();
        }

        let status = tracker.query();
        assert!(!status.allowed);
        assert_eq!(status.retry_after, Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_after_counts_down_from_oldest_call() {
        let (tracker, clock) = tracker(2, 1000);

        tracker.record();
        clock.advance(Duration::from_millis(100));
        tracker.record();
        clock.advance(Duration::from_millis(100));

        let status = tracker.query();
        assert!(!status.allowed);
        assert_eq!(status.retry_after, Duration::from_millis(800));
    }

    #[test]
    fn test_allowed_again_after_window_passes() {
        let (tracker, clock) = tracker(1, 50);

        tracker.record();
        assert!(!tracker.query().allowed);

        clock.advance(Duration::from_millis(50));

        let status = tracker.query();
        assert!(status.allowed);
        assert_eq!(status.retry_after, Duration::ZERO);
        assert_eq!(tracker.active_calls(), 0);
    }

    #[test]
    fn test_entry_just_inside_window_still_counts() {
        let (tracker, clock) = tracker(1, 100);

        tracker.record();
        clock.advance(Duration::from_millis(99));

        let status = tracker.query();
        assert!(!status.allowed);
        assert_eq!(status.retry_after, Duration::from_millis(1));
    }

    #[test]
    fn test_expired_entries_pruned_individually() {
        let (tracker, clock) = tracker(2, 100);

        tracker.record();
        clock.advance(Duration::from_millis(60));
        tracker.record();
        clock.advance(Duration::from_millis(60));

        // First call expired, second still counts
        assert_eq!(tracker.active_calls(), 1);
        assert!(tracker.query().allowed);
    }

    #[test]
    fn test_repeated_queries_do_not_change_outcome() {
        let (tracker, _) = tracker(2, 1000);

        for _ in 0..5 {
            assert!(tracker.query().allowed);
        }
        assert_eq!(tracker.active_calls(), 0);

        tracker.record();
        tracker.record();
        let first = tracker.query();
        for _ in 0..5 {
            assert_eq!(tracker.query(), first);
        }
        assert_eq!(tracker.active_calls(), 2);
    }

    #[test]
    fn test_zero_limit_always_denies_with_full_window() {
        let (tracker, _) = tracker(0, 750);

        let status = tracker.query();

        assert!(!status.allowed);
        assert_eq!(status.retry_after, Duration::from_millis(750));
    }

    #[test]
    fn test_unbounded_window_denies_with_full_window() {
        let clock = MockClock::default();
        let tracker = WindowTracker::with_clock(1, Duration::MAX, clock.clone());

        tracker.record();
        clock.advance(Duration::from_secs(3600));

        let status = tracker.query();
        assert!(!status.allowed);
        assert_eq!(status.retry_after, Duration::MAX);
        assert_eq!(tracker.active_calls(), 1);
    }

    #[test]
    fn test_named_tracker() {
        let tracker = WindowTracker::new(5, Duration::from_secs(1)).named("per-second");

        assert_eq!(tracker.name(), Some("per-second"));
        assert_eq!(tracker.max_calls(), 5);
        assert_eq!(tracker.window(), Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let (tracker, _) = tracker(1000, 60_000);
        let tracker = Arc::new(tracker);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        tracker.record();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.active_calls(), 400);
    }
}
