//! Error types for command and pipeline execution.

use std::time::Duration;

use thiserror::Error;

/// The main error type for command, pipeline and promise operations.
///
/// Errors are `Clone` because a single outcome is delivered to every
/// observer of a [`Promise`](crate::Promise).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A time-limited attempt did not finish within its limit.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The retry policy gave up. Carries the last attempt's failure.
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of attempts made, including the first.
        attempts: usize,
        /// The failure of the final attempt.
        last: Box<Error>,
    },

    /// The computation failed (including panics inside user code).
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The fallback itself failed.
    #[error("Fallback failed: {0}")]
    FallbackFailed(Box<Error>),

    /// A fluent `filter` rejected the value.
    #[error("Predicate does not match")]
    PredicateNotMatched,

    /// An executor refused a unit of work.
    #[error("Execution rejected: {0}")]
    RejectedExecution(String),

    /// The promise was cancelled before it settled.
    #[error("Cancelled")]
    Cancelled,

    /// A blocking `get` gave up waiting. Distinct from [`Error::Timeout`],
    /// which is the computation's own failure.
    #[error("Gave up waiting for result after {0:?}")]
    WaitTimedOut(Duration),

    /// A builder was given an invalid configuration.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Telemetry could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic error with a message.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Shorthand for [`Error::ExecutionFailed`].
    pub fn execution(msg: impl Into<String>) -> Self {
        Error::ExecutionFailed(msg.into())
    }

    /// Returns true for [`Error::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns true for [`Error::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Message(msg.to_string())
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Render a caught panic payload as a message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_exhausted_display_includes_last() {
        let err = Error::RetryExhausted {
            attempts: 3,
            last: Box::new(Error::from("boom")),
        };
        assert_eq!(err.to_string(), "Retries exhausted after 3 attempts: boom");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("bad state");
        assert_eq!(panic_message(payload.as_ref()), "panicked: bad state");
    }
}
