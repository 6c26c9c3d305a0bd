//! Resilience decorators and the layers that realise them.
//!
//! A decorated command is assembled from a base launcher (one attempt of the
//! computation on the command's executor) wrapped by one layer per
//! decorator, innermost first. Every layer is a [`Launch`]: a function from
//! the attempt number to the promise for that attempt.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::executor::{inline, SharedExecutor};
use crate::{Error, ExecutionEvent, OnTimeout, Promise, Result, RetryDecision, RetryPolicy, Telemetry, Timer};

/// The deferred computation of a command.
pub type Computation<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V>> + Send + Sync>;

/// Produces a replacement result from a failure.
pub type FallbackFn<V> = Arc<dyn Fn(Error) -> BoxFuture<'static, Result<V>> + Send + Sync>;

pub(crate) type Launch<V> = Arc<dyn Fn(usize) -> Promise<V> + Send + Sync>;

/// A resilience policy attached to a command.
///
/// Decorators are applied innermost first in the order
/// `Timeout`, `Retry`, `Fallback`: the time limit bounds each attempt, retry
/// repeats the time-limited attempt, and the fallback handles whatever the
/// retried sequence finally produced.
pub enum Decorator<V> {
    /// Bound each attempt to `limit`.
    Timeout {
        /// The time limit for one attempt.
        limit: Duration,
        /// What happens to an attempt that outlives its limit.
        on_timeout: OnTimeout,
    },
    /// Retry failed attempts as the policy decides.
    Retry(Arc<dyn RetryPolicy>),
    /// Replace a final failure with the fallback's result.
    Fallback(FallbackFn<V>),
}

impl<V> Decorator<V> {
    /// The variant, without its payload.
    pub fn kind(&self) -> DecoratorKind {
        match self {
            Decorator::Timeout { .. } => DecoratorKind::Timeout,
            Decorator::Retry(_) => DecoratorKind::Retry,
            Decorator::Fallback(_) => DecoratorKind::Fallback,
        }
    }
}

impl<V> Clone for Decorator<V> {
    fn clone(&self) -> Self {
        match self {
            Decorator::Timeout { limit, on_timeout } => Decorator::Timeout {
                limit: *limit,
                on_timeout: *on_timeout,
            },
            Decorator::Retry(policy) => Decorator::Retry(Arc::clone(policy)),
            Decorator::Fallback(f) => Decorator::Fallback(Arc::clone(f)),
        }
    }
}

impl<V> fmt::Debug for Decorator<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decorator::Timeout { limit, on_timeout } => f
                .debug_struct("Timeout")
                .field("limit", limit)
                .field("on_timeout", on_timeout)
                .finish(),
            Decorator::Retry(_) => f.write_str("Retry"),
            Decorator::Fallback(_) => f.write_str("Fallback"),
        }
    }
}

/// Payload-free view of a [`Decorator`], used to inspect a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecoratorKind {
    /// Per-attempt time limit.
    Timeout,
    /// Retry policy.
    Retry,
    /// Fallback result.
    Fallback,
}

/// Everything a layer needs besides the layer below it.
pub(crate) struct CommandEnv {
    pub(crate) name: Arc<str>,
    pub(crate) executor: SharedExecutor,
    pub(crate) timer: Arc<dyn Timer>,
    pub(crate) telemetry: Option<Telemetry>,
}

impl CommandEnv {
    fn emit(&self, event: ExecutionEvent) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.emit(event);
        }
    }

    fn record(&self, f: impl FnOnce(&mut crate::ExecutionMetrics)) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.update(f);
        }
    }

    /// A promise that succeeds after `duration` on the command's executor.
    fn sleep(&self, duration: Duration) -> Promise<()> {
        let timer = Arc::clone(&self.timer);
        Promise::spawn(&self.executor, async move {
            timer.sleep(duration).await;
            Ok(())
        })
    }
}

/// One attempt of the computation, submitted to the command's executor.
pub(crate) fn base<V>(computation: Computation<V>, env: Arc<CommandEnv>) -> Launch<V>
where
    V: Clone + Send + 'static,
{
    Arc::new(move |attempt: usize| {
        env.record(|m| m.attempts += 1);
        env.emit(ExecutionEvent::AttemptStarted {
            command: env.name.to_string(),
            attempt,
        });

        let computation = Arc::clone(&computation);
        let promise = Promise::spawn(&env.executor, async move { computation().await });

        let env = Arc::clone(&env);
        promise.listen(move |outcome| {
            if let Err(error) = outcome {
                if error.is_cancelled() {
                    return;
                }
                tracing::debug!(command = %env.name, attempt, error = %error, "Attempt failed");
                env.emit(ExecutionEvent::AttemptFailed {
                    command: env.name.to_string(),
                    attempt,
                    message: error.to_string(),
                });
            }
        });
        promise
    })
}

/// Race every attempt against a timer.
pub(crate) fn time_limited<V>(
    inner: Launch<V>,
    limit: Duration,
    on_timeout: OnTimeout,
    env: Arc<CommandEnv>,
) -> Launch<V>
where
    V: Clone + Send + 'static,
{
    Arc::new(move |attempt: usize| {
        let running = inner(attempt);
        let output = Promise::new();
        output.cancel_with(&running);
        running.forward(&output);
        if output.is_done() {
            return output;
        }

        let clock = env.sleep(limit);
        let stop = clock.clone();
        output.listen(move |_| {
            stop.cancel();
        });

        let out = output.clone();
        let env = Arc::clone(&env);
        clock.listen(move |fired| match fired {
            Ok(()) => {
                if !out.fail(Error::Timeout(limit)) {
                    return;
                }
                tracing::warn!(command = %env.name, attempt, ?limit, ?on_timeout, "Attempt timed out");
                env.record(|m| m.timeouts += 1);
                env.emit(ExecutionEvent::TimedOut {
                    command: env.name.to_string(),
                    limit_ms: limit.as_millis(),
                });
                if on_timeout == OnTimeout::Interrupt {
                    running.cancel();
                }
            }
            Err(Error::Cancelled) => {}
            Err(error) => {
                out.fail(error);
            }
        });
        output
    })
}

/// Repeat failed attempts while the policy asks for another one.
pub(crate) fn retrying<V>(
    inner: Launch<V>,
    policy: Arc<dyn RetryPolicy>,
    env: Arc<CommandEnv>,
) -> Launch<V>
where
    V: Clone + Send + 'static,
{
    Arc::new(move |_: usize| {
        let output = Promise::new();
        run_attempt(
            Arc::clone(&inner),
            Arc::clone(&policy),
            Arc::clone(&env),
            1,
            output.clone(),
        );
        output
    })
}

/// Run attempts from `attempt` on. Attempts and waits that settle
/// synchronously are handled in this loop; only pending ones register a
/// continuation.
fn run_attempt<V>(
    launch: Launch<V>,
    policy: Arc<dyn RetryPolicy>,
    env: Arc<CommandEnv>,
    mut attempt: usize,
    output: Promise<V>,
) where
    V: Clone + Send + 'static,
{
    loop {
        if output.is_done() {
            return;
        }
        let current = launch(attempt);
        output.cancel_with(&current);

        let Some(outcome) = current.try_result() else {
            current.listen(move |outcome| {
                if let Some(delay) = next_delay(&*policy, &env, attempt, outcome, &output) {
                    let waited = wait_before_retry(&env, delay, &output);
                    waited.listen(move |slept| match slept {
                        Ok(()) => run_attempt(launch, policy, env, attempt + 1, output),
                        Err(error) => {
                            output.fail(error);
                        }
                    });
                }
            });
            return;
        };

        let Some(delay) = next_delay(&*policy, &env, attempt, outcome, &output) else {
            return;
        };
        let waited = wait_before_retry(&env, delay, &output);
        match waited.try_result() {
            Some(Ok(())) => attempt += 1,
            Some(Err(error)) => {
                output.fail(error);
                return;
            }
            None => {
                waited.listen(move |slept| match slept {
                    Ok(()) => run_attempt(launch, policy, env, attempt + 1, output),
                    Err(error) => {
                        output.fail(error);
                    }
                });
                return;
            }
        }
    }
}

/// Settle `output` from a finished attempt, or return the wait before the
/// next one.
fn next_delay<V>(
    policy: &dyn RetryPolicy,
    env: &CommandEnv,
    attempt: usize,
    outcome: Result<V>,
    output: &Promise<V>,
) -> Option<Duration>
where
    V: Clone + Send + 'static,
{
    let error = match outcome {
        Ok(value) => {
            output.complete(value);
            return None;
        }
        Err(error) if error.is_cancelled() => {
            output.fail(error);
            return None;
        }
        Err(error) => error,
    };

    match policy.decide(attempt, &error) {
        RetryDecision::RetryAfter(delay) => {
            if output.is_done() {
                return None;
            }
            tracing::debug!(command = %env.name, next_attempt = attempt + 1, ?delay, "Retry scheduled");
            env.record(|m| m.retries += 1);
            env.emit(ExecutionEvent::RetryScheduled {
                command: env.name.to_string(),
                next_attempt: attempt + 1,
                delay_ms: delay.as_millis(),
            });
            Some(delay)
        }
        RetryDecision::GiveUp => {
            output.fail(Error::RetryExhausted {
                attempts: attempt,
                last: Box::new(error),
            });
            None
        }
        RetryDecision::Abort => {
            output.fail(error);
            None
        }
    }
}

fn wait_before_retry<V>(env: &CommandEnv, delay: Duration, output: &Promise<V>) -> Promise<()>
where
    V: Clone + Send + 'static,
{
    if delay.is_zero() {
        return Promise::ready(());
    }
    let waited = env.sleep(delay);
    output.cancel_with(&waited);
    waited
}

/// Replace a final failure, other than cancellation, with the fallback's result.
pub(crate) fn with_fallback<V>(
    inner: Launch<V>,
    fallback: FallbackFn<V>,
    env: Arc<CommandEnv>,
) -> Launch<V>
where
    V: Clone + Send + 'static,
{
    Arc::new(move |attempt: usize| {
        let fallback = Arc::clone(&fallback);
        let env = Arc::clone(&env);
        inner(attempt).recover(&inline(), move |error| {
            tracing::debug!(command = %env.name, error = %error, "Applying fallback");
            env.record(|m| m.fallbacks_applied += 1);
            env.emit(ExecutionEvent::FallbackApplied {
                command: env.name.to_string(),
                message: error.to_string(),
            });
            Promise::spawn(&env.executor, async move {
                fallback(error)
                    .await
                    .map_err(|e| Error::FallbackFailed(Box::new(e)))
            })
        })
    })
}
