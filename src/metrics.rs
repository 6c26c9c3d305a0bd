//! Counters for command and pipeline execution.

use serde::{Deserialize, Serialize};

/// Aggregated metrics collected through a [`Telemetry`](crate::Telemetry).
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Command attempts started, including retries.
    pub attempts: usize,
    /// Attempts scheduled by a retry policy.
    pub retries: usize,
    /// Attempts that exceeded their time limit.
    pub timeouts: usize,
    /// Failures replaced by a fallback.
    pub fallbacks_applied: usize,
    /// Pipeline fork branches that failed.
    pub fork_failures: usize,
    /// Instrumented functions that completed successfully.
    pub steps_completed: usize,
    /// Collected failure messages.
    pub failures: Vec<String>,
}

impl ExecutionMetrics {
    /// Record a failure message.
    pub fn record_failure(&mut self, error: String) {
        self.failures.push(error);
    }

    /// Check if there were any failures.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}
