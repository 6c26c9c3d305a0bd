//! Pluggable time source for time limits and retry waits.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An async clock: the only time primitive the crate needs.
///
/// Commands race each time-limited attempt against [`Timer::sleep`] and wait
/// between retries with it.
#[async_trait]
pub trait Timer: Send + Sync {
    /// Complete after `duration` has elapsed.
    async fn sleep(&self, duration: Duration);
}

/// A [`Timer`] backed by `tokio::time`.
///
/// Sleeps must start inside a tokio runtime context; starting one elsewhere
/// panics, which the spawning promise reports as [`Error::ExecutionFailed`].
///
/// [`Error::ExecutionFailed`]: crate::Error::ExecutionFailed
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// What happens to an attempt that exceeds its time limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OnTimeout {
    /// Drop the attempt's future at its next suspension point.
    #[default]
    Interrupt,
    /// Let the attempt run to completion and discard its result.
    Abandon,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_tokio_timer_sleeps() {
        let start = Instant::now();
        TokioTimer.sleep(Duration::from_millis(15)).await;
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_on_timeout_serde() {
        let json = serde_json::to_string(&OnTimeout::Abandon).unwrap();
        assert_eq!(json, "\"Abandon\"");
        let parsed: OnTimeout = serde_json::from_str("\"Interrupt\"").unwrap();
        assert_eq!(parsed, OnTimeout::Interrupt);
    }
}
