//! Shared metrics and trace log.
//!
//! A [`Telemetry`] can be attached to commands, pipelines and instrumented
//! functions. Every clone shares the same counters and trace log, so one
//! handle can observe many concurrent executions.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::events::{ExecutionEvent, TraceEntry};
use crate::metrics::ExecutionMetrics;
use crate::{Error, Result};

/// Cloneable, thread-safe collector of [`ExecutionMetrics`] and
/// [`TraceEntry`] values.
///
/// # Example
///
/// ```rust
/// use async_compose::{Telemetry, ExecutionEvent};
///
/// let telemetry = Telemetry::new();
/// telemetry.emit(ExecutionEvent::StepStart {
///     step_name: "Normalize".to_string(),
///     input_type: "String".to_string(),
/// });
/// assert_eq!(telemetry.trace_snapshot().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    metrics: Arc<Mutex<ExecutionMetrics>>,
    traces: Arc<Mutex<Vec<TraceEntry>>>,
}

impl Telemetry {
    /// Create a new telemetry handle with empty metrics and traces.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the metrics under the lock.
    pub fn update(&self, f: impl FnOnce(&mut ExecutionMetrics)) {
        f(&mut self.metrics.lock());
    }

    /// Record a failure message.
    pub fn record_failure(&self, error: impl Into<String>) {
        self.metrics.lock().record_failure(error.into());
    }

    /// Get a snapshot of the current metrics.
    #[must_use]
    pub fn snapshot(&self) -> ExecutionMetrics {
        self.metrics.lock().clone()
    }

    /// Emit a structured event to the trace log.
    ///
    /// Events are timestamped automatically when emitted. The log keeps
    /// every entry until [`clear_traces`](Telemetry::clear_traces), so a
    /// long-lived handle should be exported and cleared periodically.
    pub fn emit(&self, event: ExecutionEvent) {
        let entry = TraceEntry::new(event);
        self.traces.lock().push(entry);
    }

    /// Get a snapshot of the current trace log.
    #[must_use]
    pub fn trace_snapshot(&self) -> Vec<TraceEntry> {
        self.traces.lock().clone()
    }

    /// Events in the trace log, without timestamps.
    #[must_use]
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.traces.lock().iter().map(|e| e.event.clone()).collect()
    }

    /// Serialize the trace log as a JSON array.
    pub fn export_traces(&self) -> Result<String> {
        serde_json::to_string(&*self.traces.lock()).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Clear all trace entries.
    pub fn clear_traces(&self) {
        self.traces.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let telemetry = Telemetry::new();
        let other = telemetry.clone();
        other.update(|m| m.attempts += 2);
        other.record_failure("boom");
        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.attempts, 2);
        assert!(snapshot.has_failures());

        telemetry.emit(ExecutionEvent::TimedOut {
            command: "slow".to_string(),
            limit_ms: 10,
        });
        assert_eq!(other.events().len(), 1);
        let exported = telemetry.export_traces().unwrap();
        assert!(exported.starts_with('[') && exported.contains("\"TimedOut\""));
        other.clear_traces();
        assert!(telemetry.trace_snapshot().is_empty());
    }
}
