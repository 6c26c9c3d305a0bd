//! Retry policies.
//!
//! A policy is consulted after every failed attempt and decides whether the
//! command tries again, and after how long. Policies see only the attempt
//! number and the failure, so each execution of a command carries its own
//! attempt counter and one policy can be shared by concurrent executions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait for the given duration, then make another attempt.
    RetryAfter(Duration),
    /// Stop; the command fails with [`Error::RetryExhausted`].
    GiveUp,
    /// Stop; the last error propagates unchanged (not retryable).
    Abort,
}

/// Decides whether and when a failed attempt is retried.
pub trait RetryPolicy: Send + Sync {
    /// Called after attempt number `attempt` (1-based) failed with `error`.
    fn decide(&self, attempt: usize, error: &Error) -> RetryDecision;

    /// Check the policy's configuration. Called when a command is built.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl<F> RetryPolicy for F
where
    F: Fn(usize, &Error) -> RetryDecision + Send + Sync,
{
    fn decide(&self, attempt: usize, error: &Error) -> RetryDecision {
        self(attempt, error)
    }
}

/// Retry up to a fixed number of attempts with a constant wait between them.
///
/// # Example
///
/// ```rust
/// use async_compose::{RetryConfig, RetryDecision, RetryPolicy, Error};
/// use std::time::Duration;
///
/// let policy = RetryConfig::new().with_max_attempts(2).with_wait_ms(5);
/// let err = Error::from("flaky");
/// assert_eq!(policy.decide(1, &err), RetryDecision::RetryAfter(Duration::from_millis(5)));
/// assert_eq!(policy.decide(2, &err), RetryDecision::GiveUp);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: usize,
    /// Wait between attempts in milliseconds.
    #[serde(default)]
    pub wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_ms: 0,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the wait between attempts.
    #[must_use]
    pub fn with_wait_ms(mut self, wait_ms: u64) -> Self {
        self.wait_ms = wait_ms;
        self
    }
}

impl RetryPolicy for RetryConfig {
    fn decide(&self, attempt: usize, _error: &Error) -> RetryDecision {
        if attempt < self.max_attempts {
            RetryDecision::RetryAfter(Duration::from_millis(self.wait_ms))
        } else {
            RetryDecision::GiveUp
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Validation(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "up to {} attempts, {}ms apart", self.max_attempts, self.wait_ms)
    }
}
