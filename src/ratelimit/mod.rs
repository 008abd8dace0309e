//! Rate limiting logic and state management.

mod action;
mod clock;
mod limiter;
mod rules;
mod tracker;

pub use action::{action_fn, Action, FnAction};
pub use clock::{Clock, MockClock, SystemClock};
pub use limiter::{Admission, RateLimiter, RateLimiterBuilder};
pub use rules::{RuleConfig, RuleSet};
pub use tracker::{WindowStatus, WindowTracker};
