//! Callgate - In-Process Admission Control
//!
//! This crate throttles outbound calls so that several "at most N calls per
//! window" rules hold at once, however many tasks call concurrently. Each
//! rule is a sliding window over recorded call instants; a [`RateLimiter`]
//! checks and records across all of its rules atomically, then runs the
//! caller's action or waits and checks again.
//!
//! [`RateLimiter`]: ratelimit::RateLimiter

pub mod config;
pub mod error;
pub mod ratelimit;
