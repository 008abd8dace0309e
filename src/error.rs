//! Error types for callgate.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while building a limiter or loading its configuration.
///
/// These are fatal and surface before any call is attempted.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rule file parse errors
    #[error("Rule file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a `perform` call that did not complete successfully.
///
/// `E` is the error type of the caller-supplied action and is passed through
/// untouched.
#[derive(Error, Debug)]
pub enum PerformError<E> {
    /// The action ran and failed.
    #[error("Action failed: {0}")]
    Action(#[source] E),

    /// The wait for admission was cancelled. Nothing was recorded.
    #[error("Cancelled while waiting for admission")]
    Cancelled,

    /// Admission did not happen within the allowed wait. Nothing was recorded.
    #[error("Not admitted within {0:?}")]
    TimedOut(Duration),
}

impl<E> PerformError<E> {
    /// Returns the action's own error, if that is what this is.
    pub fn into_action_error(self) -> Option<E> {
        match self {
            PerformError::Action(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for configuration and construction.
pub type Result<T> = std::result::Result<T, GateError>;
