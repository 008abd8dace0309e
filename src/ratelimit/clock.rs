//! Time sources for window bookkeeping.
//!
//! Trackers never read the time directly; they ask a [`Clock`]. Production
//! code uses [`SystemClock`], which follows tokio's clock, so tests running on
//! a paused runtime (`#[tokio::test(start_paused = true)]`) see deterministic
//! time. [`MockClock`] is for tests that need to move time by hand; its
//! `sleep` advances the mock time instead of waiting, so a limiter built on
//! it retries immediately against the advanced clock.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

/// A source of the current instant, and the way to wait on it.
#[async_trait]
pub trait Clock: Send + Sync + Clone + Default + Debug + 'static {
    /// Get the current instant.
    fn now(&self) -> Instant;

    /// Wait until `duration` has passed on this clock.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually driven clock.
///
/// All clones share one time value, so advancing one clone advances every
/// tracker built from it.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<Instant>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific instant.
    pub fn new(start: Instant) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by a duration.
    ///
    /// An advance past the last representable instant is ignored.
    pub fn advance(&self, duration: Duration) {
        let mut time = self.current_time.lock();
        if let Some(later) = time.checked_add(duration) {
            *time = later;
        }
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, instant: Instant) {
        *self.current_time.lock() = instant;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current_time.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
