//! Admission control across several sliding-window rules.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use super::action::Action;
use super::clock::{Clock, SystemClock};
use super::tracker::WindowTracker;
use crate::error::{GateError, PerformError, Result};

/// Outcome of one evaluation pass over every rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Every rule allowed the call and it has been recorded on all of them.
    Admitted,
    /// At least one rule denied; retry after the governing delay, the
    /// largest `retry_after` among the denying rules.
    Delaying(Duration),
}

/// Runs an action for each call, but only once every configured rule has
/// room for it.
///
/// Checking all rules and recording on all rules happens under one lock, so
/// concurrent callers can never jointly push a rule past its limit. The lock
/// is released before the action runs and before any wait.
///
/// Waits and timeout deadlines go through the limiter's [`Clock`]. With
/// [`SystemClock`] that is tokio's timer; with a
/// [`MockClock`](super::MockClock) each wait advances the mock time, so
/// `perform` completes without real sleeping.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter<T, A, C: Clock = SystemClock> {
    /// The operation invoked for each admitted call
    action: A,
    /// Rules checked on every call, in order
    rules: Vec<WindowTracker<C>>,
    /// Time source for waits and deadlines
    clock: C,
    /// Serializes evaluate-and-record across all rules
    section: Mutex<()>,
    _arg: PhantomData<fn(T)>,
}

impl<T, A, C> RateLimiter<T, A, C>
where
    T: Send + 'static,
    A: Action<T>,
    C: Clock,
{
    /// Create a limiter from an action and its rules.
    ///
    /// The limiter waits on the first rule's clock. An empty rule list admits
    /// every call immediately.
    pub fn new(action: A, rules: Vec<WindowTracker<C>>) -> Result<Self> {
        Self::builder().action(action).rules(rules).build()
    }

    /// Start building a limiter.
    pub fn builder() -> RateLimiterBuilder<T, A, C> {
        RateLimiterBuilder::default()
    }

    /// Get the rules this limiter enforces.
    pub fn rules(&self) -> &[WindowTracker<C>] {
        &self.rules
    }

    /// Get the clock used for waits and deadlines.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Evaluate every rule once and, if all allow, record the call on all of
    /// them.
    ///
    /// All rules are queried even after one denies, since the governing delay
    /// is the maximum over every denying rule. Nothing is recorded unless the
    /// call is admitted.
    pub fn try_admit(&self) -> Admission {
        let _section = self.section.lock();

        let mut admitted = true;
        let mut governing_delay = Duration::ZERO;
        for rule in &self.rules {
            let status = rule.query();
            if !status.allowed {
                admitted = false;
                governing_delay = governing_delay.max(status.retry_after);
            }
        }

        if !admitted {
            return Admission::Delaying(governing_delay);
        }

        for rule in &self.rules {
            rule.record();
        }
        trace!(rules = self.rules.len(), "Call recorded on all rules");
        Admission::Admitted
    }

    /// Wait until the call is admitted, then run the action with `arg`.
    ///
    /// There is no cap on the number of waits. Each wake-up re-evaluates the
    /// rules from scratch, since other callers may have been admitted in the
    /// meantime.
    ///
    /// # Errors
    ///
    /// Returns [`PerformError::Action`] with the action's own error if it
    /// fails. The call still counts against every rule.
    pub async fn perform(&self, arg: T) -> std::result::Result<(), PerformError<A::Error>> {
        self.run(arg, None, std::future::pending()).await
    }

    /// Like [`perform`](Self::perform), but gives up if `signal` resolves
    /// while the call is still waiting for admission.
    ///
    /// # Errors
    ///
    /// Returns [`PerformError::Cancelled`] if `signal` fires first; nothing
    /// has been recorded in that case. Action failures are returned as in
    /// `perform`.
    pub async fn perform_with_cancel<S>(
        &self,
        arg: T,
        signal: S,
    ) -> std::result::Result<(), PerformError<A::Error>>
    where
        S: Future<Output = ()>,
    {
        self.run(arg, None, signal).await
    }

    /// Like [`perform`](Self::perform), but waits at most `max_wait` for
    /// admission. The action itself is not timed.
    ///
    /// A `max_wait` too large to represent as a deadline waits forever.
    ///
    /// # Errors
    ///
    /// Returns [`PerformError::TimedOut`] if the call is not admitted in time;
    /// nothing has been recorded in that case.
    pub async fn perform_with_timeout(
        &self,
        arg: T,
        max_wait: Duration,
    ) -> std::result::Result<(), PerformError<A::Error>> {
        let deadline = self
            .clock
            .now()
            .checked_add(max_wait)
            .map(|deadline| (deadline, max_wait));
        self.run(arg, deadline, std::future::pending()).await
    }

    #[instrument(level = "debug", skip_all, fields(rules = self.rules.len()))]
    async fn run<S>(
        &self,
        arg: T,
        deadline: Option<(Instant, Duration)>,
        cancel: S,
    ) -> std::result::Result<(), PerformError<A::Error>>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let mut delay = match self.try_admit() {
                Admission::Admitted => break,
                Admission::Delaying(delay) => delay,
            };

            if let Some((deadline, max_wait)) = deadline {
                let remaining = deadline.saturating_duration_since(self.clock.now());
                if remaining.is_zero() {
                    debug!(attempt = attempts, "Not admitted before deadline");
                    return Err(PerformError::TimedOut(max_wait));
                }
                delay = delay.min(remaining);
            }

            debug!(
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Rate limit exceeded, delaying before next check"
            );

            tokio::select! {
                _ = self.clock.sleep(delay) => {}
                _ = &mut cancel => {
                    debug!(attempt = attempts, "Cancelled while waiting for admission");
                    return Err(PerformError::Cancelled);
                }
            }
        }

        debug!(attempt = attempts, "Call admitted");
        self.action.call(arg).await.map_err(|e| {
            warn!(attempt = attempts, "Action failed");
            PerformError::Action(e)
        })
    }
}

impl<T, A, C: Clock> std::fmt::Debug for RateLimiter<T, A, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rules", &self.rules)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RateLimiter`].
///
/// Both an action and a rule list must be supplied; leaving either out is a
/// configuration error reported by [`build`](Self::build). Without an explicit
/// [`clock`](Self::clock), the limiter waits on the first rule's clock, or on
/// `C::default()` when there are no rules.
pub struct RateLimiterBuilder<T, A, C: Clock = SystemClock> {
    action: Option<A>,
    rules: Option<Vec<WindowTracker<C>>>,
    clock: Option<C>,
    _arg: PhantomData<fn(T)>,
}

impl<T, A, C: Clock> Default for RateLimiterBuilder<T, A, C> {
    fn default() -> Self {
        Self {
            action: None,
            rules: None,
            clock: None,
            _arg: PhantomData,
        }
    }
}

impl<T, A, C> RateLimiterBuilder<T, A, C>
where
    T: Send + 'static,
    A: Action<T>,
    C: Clock,
{
    /// Set the action run for each admitted call.
    pub fn action(mut self, action: A) -> Self {
        self.action = Some(action);
        self
    }

    /// Append one rule.
    pub fn rule(mut self, rule: WindowTracker<C>) -> Self {
        self.rules.get_or_insert_with(Vec::new).push(rule);
        self
    }

    /// Replace the rule list. An empty list is allowed.
    pub fn rules(mut self, rules: impl IntoIterator<Item = WindowTracker<C>>) -> Self {
        self.rules = Some(rules.into_iter().collect());
        self
    }

    /// Set the clock used for waits and timeout deadlines.
    ///
    /// This should be the clock the rules read, or a clone of it.
    pub fn clock(mut self, clock: C) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate and build the limiter.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if no action or no rule list was given,
    /// or if a rule could never admit a call (zero calls or zero window).
    pub fn build(self) -> Result<RateLimiter<T, A, C>> {
        let action = self
            .action
            .ok_or_else(|| GateError::Config("an action is required".to_string()))?;
        let rules = self
            .rules
            .ok_or_else(|| GateError::Config("a rule list is required".to_string()))?;

        for (index, rule) in rules.iter().enumerate() {
            if rule.max_calls() == 0 {
                return Err(GateError::Config(format!(
                    "rule {} ({}) allows zero calls",
                    index,
                    rule.name().unwrap_or("unnamed")
                )));
            }
            if rule.window().is_zero() {
                return Err(GateError::Config(format!(
                    "rule {} ({}) has a zero-length window",
                    index,
                    rule.name().unwrap_or("unnamed")
                )));
            }
        }

        let clock = match self.clock {
            Some(clock) => clock,
            None => rules
                .first()
                .map(|rule| rule.clock().clone())
                .unwrap_or_default(),
        };

        debug!(rules = rules.len(), "Rate limiter built");
        Ok(RateLimiter {
            action,
            rules,
            clock,
            section: Mutex::new(()),
            _arg: PhantomData,
        })
    }
}
