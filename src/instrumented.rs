//! Instrumented function wrapper for automatic tracing and metrics.

use std::sync::Arc;
use std::time::Instant;

use crate::executor::inline;
use crate::{AsyncFunction, ExecutionEvent, Promise, Telemetry};

/// Wraps any function with automatic event emission and metric recording.
///
/// For each execution, `InstrumentedFunction` emits:
/// - An [`ExecutionEvent::StepStart`] when the execution starts
/// - An [`ExecutionEvent::StepEnd`] with elapsed milliseconds on success
/// - An [`ExecutionEvent::Error`] and failure metric on error
///
/// # Example
///
/// ```rust
/// use async_compose::{AsyncFunction, AsyncFunctionExt, LambdaFunction, Telemetry};
///
/// let telemetry = Telemetry::new();
/// let inc = LambdaFunction::new(|x: i32| async move { Ok::<i32, async_compose::Error>(x + 1) })
///     .instrument("Increment", telemetry.clone());
///
/// assert_eq!(inc.apply(5).wait().unwrap(), 6);
/// assert_eq!(telemetry.trace_snapshot().len(), 2); // StepStart + StepEnd
/// ```
pub struct InstrumentedFunction<F> {
    inner: F,
    name: Arc<str>,
    telemetry: Telemetry,
}

impl<F: AsyncFunction> InstrumentedFunction<F> {
    /// Wrap `inner`, labelling it `name` and reporting into `telemetry`.
    pub fn new(inner: F, name: impl Into<String>, telemetry: Telemetry) -> Self {
        Self {
            inner,
            name: Arc::from(name.into()),
            telemetry,
        }
    }

    /// Access the inner function.
    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: AsyncFunction> AsyncFunction for InstrumentedFunction<F> {
    type Input = F::Input;
    type Output = F::Output;

    fn apply(&self, input: F::Input) -> Promise<F::Output> {
        self.telemetry.emit(ExecutionEvent::StepStart {
            step_name: self.name.to_string(),
            input_type: std::any::type_name::<F::Input>().to_string(),
        });

        let start = Instant::now();
        let result = self.inner.apply(input);
        let name = Arc::clone(&self.name);
        let telemetry = self.telemetry.clone();
        result.on_complete(&inline(), move |outcome| match outcome {
            Ok(_) => {
                telemetry.update(|m| m.steps_completed += 1);
                telemetry.emit(ExecutionEvent::StepEnd {
                    step_name: name.to_string(),
                    duration_ms: start.elapsed().as_millis(),
                });
            }
            Err(e) => {
                telemetry.record_failure(e.to_string());
                telemetry.emit(ExecutionEvent::Error {
                    step_name: name.to_string(),
                    message: e.to_string(),
                });
            }
        });
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
