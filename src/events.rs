//! Structured execution events for tracing and observability.
//!
//! Commands, pipelines and instrumented functions emit these events into a
//! [`Telemetry`](crate::Telemetry) trace log when one is attached.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Events that can be emitted while commands and pipelines execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ExecutionEvent {
    /// A command started an attempt.
    AttemptStarted {
        /// Name of the command.
        command: String,
        /// Attempt number, starting at 1.
        attempt: usize,
    },
    /// A command attempt failed.
    AttemptFailed {
        /// Name of the command.
        command: String,
        /// Attempt number, starting at 1.
        attempt: usize,
        /// The failure message.
        message: String,
    },
    /// The retry policy scheduled another attempt.
    RetryScheduled {
        /// Name of the command.
        command: String,
        /// The attempt that will run next.
        next_attempt: usize,
        /// Wait before the next attempt, in milliseconds.
        delay_ms: u128,
    },
    /// An attempt exceeded its time limit.
    TimedOut {
        /// Name of the command.
        command: String,
        /// The configured limit in milliseconds.
        limit_ms: u128,
    },
    /// A fallback replaced a failure.
    FallbackApplied {
        /// Name of the command.
        command: String,
        /// The failure that triggered the fallback.
        message: String,
    },
    /// A pipeline fork branch failed. The main line is unaffected.
    ForkFailed {
        /// Name of the pipeline.
        pipeline: String,
        /// The branch failure.
        message: String,
    },
    /// An instrumented function started.
    StepStart {
        /// Name of the function.
        step_name: String,
        /// The Rust type name of the input.
        input_type: String,
    },
    /// An instrumented function finished successfully.
    StepEnd {
        /// Name of the function.
        step_name: String,
        /// Duration of execution in milliseconds.
        duration_ms: u128,
    },
    /// An instrumented function failed.
    Error {
        /// Name of the function.
        step_name: String,
        /// Error message describing what went wrong.
        message: String,
    },
}

/// A timestamped trace entry containing an execution event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Unix epoch timestamp in milliseconds when this event occurred.
    pub timestamp: u128,
    /// The event that was recorded.
    #[serde(flatten)]
    pub event: ExecutionEvent,
}

impl TraceEntry {
    /// Create a new trace entry with the current timestamp.
    #[must_use]
    pub fn new(event: ExecutionEvent) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self { timestamp, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_entry_serialization() {
        let entry = TraceEntry::new(ExecutionEvent::RetryScheduled {
            command: "fetch".to_string(),
            next_attempt: 2,
            delay_ms: 100,
        });

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"type\":\"RetryScheduled\""));
        assert!(json.contains("\"command\":\"fetch\""));
        assert!(json.contains("\"timestamp\":"));
    }

    #[test]
    fn test_fork_failed_round_trips() {
        let event = ExecutionEvent::ForkFailed {
            pipeline: "ingest".to_string(),
            message: "audit sink down".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ForkFailed");
        let back: ExecutionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
