//! Commands: deferred computations with resilience decorators, and chains
//! of commands run one after another.

pub mod chain;
pub mod decorator;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::executor::{inline, SharedExecutor};
use crate::{AsyncFunction, Error, OnTimeout, Promise, Result, RetryPolicy, Telemetry, Timer, TokioTimer};

use decorator::{CommandEnv, Launch};
pub use decorator::{Computation, Decorator, DecoratorKind, FallbackFn};

/// A computation wrapped in an ordered list of [`Decorator`]s.
///
/// Built once with [`CommandBuilder`] and executed any number of times;
/// every execution is independent and carries its own attempt counter.
///
/// # Example
///
/// ```rust
/// use async_compose::{Command, DecoratedCommand, Error, RetryConfig};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&calls);
/// let flaky = DecoratedCommand::builder()
///     .computation(move || {
///         let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
///         async move {
///             if n < 3 { Err(Error::from("not yet")) } else { Ok(n) }
///         }
///     })
///     .retry(RetryConfig::new().with_max_attempts(5))
///     .build()
///     .unwrap();
///
/// assert_eq!(flaky.execute().await.unwrap(), 3);
/// # });
/// ```
pub struct DecoratedCommand<V> {
    name: Arc<str>,
    decorators: Vec<Decorator<V>>,
    launch: Launch<V>,
}

impl<V: Clone + Send + 'static> DecoratedCommand<V> {
    /// Start building a command.
    pub fn builder() -> CommandBuilder<V> {
        CommandBuilder::new()
    }

    /// The decorators applied to this command, innermost first.
    pub fn decorators(&self) -> Vec<DecoratorKind> {
        self.decorators.iter().map(Decorator::kind).collect()
    }
}

impl<V: Clone + Send + 'static> AsyncFunction for DecoratedCommand<V> {
    type Input = ();
    type Output = V;

    fn apply(&self, _input: ()) -> Promise<V> {
        (self.launch)(1)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Builder for [`DecoratedCommand`].
///
/// Only the computation is required. The executor defaults to
/// [`inline`](crate::inline), the timer to [`TokioTimer`].
pub struct CommandBuilder<V> {
    computation: Option<Computation<V>>,
    executor: SharedExecutor,
    timer: Arc<dyn Timer>,
    name: Option<String>,
    telemetry: Option<Telemetry>,
    timeout: Option<(Duration, OnTimeout)>,
    retry: Option<Arc<dyn RetryPolicy>>,
    fallback: Option<FallbackFn<V>>,
}

impl<V: Clone + Send + 'static> Default for CommandBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + 'static> CommandBuilder<V> {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            computation: None,
            executor: inline(),
            timer: Arc::new(TokioTimer),
            name: None,
            telemetry: None,
            timeout: None,
            retry: None,
            fallback: None,
        }
    }

    /// Set the computation. It is called once per attempt.
    pub fn computation<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.computation = Some(Arc::new(move || f().boxed()));
        self
    }

    /// Run attempts, timers and the fallback on `executor`.
    pub fn executor(mut self, executor: SharedExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Use `timer` for time limits and retry waits.
    pub fn timer(mut self, timer: impl Timer + 'static) -> Self {
        self.timer = Arc::new(timer);
        self
    }

    /// Label the command in logs and telemetry.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Report attempts, retries, timeouts and fallbacks into `telemetry`.
    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Fail any attempt still running after `limit`, interrupting it.
    ///
    /// With the default [`TokioTimer`] the clock starts on the command's
    /// executor, so a pending attempt needs a tokio runtime there. On the
    /// inline executor outside a runtime the clock cannot start and the
    /// attempt fails with [`Error::ExecutionFailed`] instead of
    /// [`Error::Timeout`]; supply a [`timer`](CommandBuilder::timer) or a
    /// runtime-backed [`executor`](CommandBuilder::executor) there. Attempts
    /// that finish synchronously never start the clock.
    pub fn timeout(self, limit: Duration) -> Self {
        self.timeout_with(limit, OnTimeout::Interrupt)
    }

    /// Fail any attempt still running after `limit`; `on_timeout` decides
    /// whether the attempt is interrupted or left to finish.
    pub fn timeout_with(mut self, limit: Duration, on_timeout: OnTimeout) -> Self {
        self.timeout = Some((limit, on_timeout));
        self
    }

    /// Retry failed attempts according to `policy`.
    ///
    /// Non-zero waits use the timer, with the same runtime requirement as
    /// [`timeout`](CommandBuilder::timeout).
    pub fn retry(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Some(Arc::new(policy));
        self
    }

    /// Replace a final failure with the result of `f`.
    pub fn fallback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |error| f(error).boxed()));
        self
    }

    /// Replace a final failure with `value`.
    pub fn fallback_value(self, value: V) -> Self
    where
        V: Sync,
    {
        self.fallback(move |_| {
            let value = value.clone();
            async move { Ok::<V, Error>(value) }
        })
    }

    /// Validate the configuration and assemble the command.
    pub fn build(self) -> Result<DecoratedCommand<V>> {
        let computation = self
            .computation
            .ok_or_else(|| Error::Validation("command has no computation".to_string()))?;

        let mut decorators = Vec::new();
        if let Some((limit, on_timeout)) = self.timeout {
            if limit.is_zero() {
                return Err(Error::Validation("timeout must be greater than zero".to_string()));
            }
            decorators.push(Decorator::Timeout { limit, on_timeout });
        }
        if let Some(policy) = self.retry {
            policy.validate()?;
            decorators.push(Decorator::Retry(policy));
        }
        if let Some(fallback) = self.fallback {
            decorators.push(Decorator::Fallback(fallback));
        }

        let name: Arc<str> = Arc::from(self.name.unwrap_or_else(|| "command".to_string()));
        let env = Arc::new(CommandEnv {
            name: Arc::clone(&name),
            executor: self.executor,
            timer: self.timer,
            telemetry: self.telemetry,
        });

        let mut launch = decorator::base(computation, Arc::clone(&env));
        for layer in &decorators {
            launch = match layer {
                Decorator::Timeout { limit, on_timeout } => {
                    decorator::time_limited(launch, *limit, *on_timeout, Arc::clone(&env))
                }
                Decorator::Retry(policy) => {
                    decorator::retrying(launch, Arc::clone(policy), Arc::clone(&env))
                }
                Decorator::Fallback(f) => {
                    decorator::with_fallback(launch, Arc::clone(f), Arc::clone(&env))
                }
            };
        }

        Ok(DecoratedCommand {
            name,
            decorators,
            launch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TokioExecutor;
    use crate::{Command, ExecutionEvent, RetryConfig, RetryDecision};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    fn counting_failures(calls: Arc<AtomicUsize>, succeed_on: usize) -> CommandBuilder<usize> {
        DecoratedCommand::builder().computation(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n >= succeed_on {
                    Ok(n)
                } else {
                    Err(Error::from(format!("attempt {n} failed")))
                }
            }
        })
    }

    #[test]
    fn test_plain_command_yields_value() {
        let command = DecoratedCommand::builder()
            .computation(|| async { Ok("value") })
            .named("plain")
            .build()
            .unwrap();
        assert!(command.decorators().is_empty());
        assert_eq!(command.name(), "plain");
        assert_eq!(command.execute().wait().unwrap(), "value");
        assert_eq!(command.execute().wait().unwrap(), "value");
    }

    #[test]
    fn test_fallback_replaces_failure() {
        let command = DecoratedCommand::builder()
            .computation(|| async { Err::<i32, _>(Error::from("always")) })
            .fallback_value(-1)
            .build()
            .unwrap();
        assert_eq!(command.execute().wait().unwrap(), -1);
    }

    #[test]
    fn test_failing_fallback_is_wrapped() {
        let command = DecoratedCommand::builder()
            .computation(|| async { Err::<i32, _>(Error::from("primary")) })
            .fallback(|_| async { Err(Error::from("secondary")) })
            .build()
            .unwrap();
        assert_eq!(
            command.execute().wait().unwrap_err(),
            Error::FallbackFailed(Box::new(Error::from("secondary")))
        );
    }

    #[test]
    fn test_retry_succeeds_on_nth_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting_failures(Arc::clone(&calls), 3)
            .retry(RetryConfig::new().with_max_attempts(5))
            .build()
            .unwrap();
        assert_eq!(command.execute().wait().unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_exhausted_after_exactly_n_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting_failures(Arc::clone(&calls), usize::MAX)
            .retry(RetryConfig::new().with_max_attempts(4))
            .build()
            .unwrap();
        let err = command.execute().wait().unwrap_err();
        assert_eq!(
            err,
            Error::RetryExhausted {
                attempts: 4,
                last: Box::new(Error::from("attempt 4 failed")),
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_many_synchronous_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let telemetry = Telemetry::new();
        let command = counting_failures(Arc::clone(&calls), usize::MAX)
            .telemetry(telemetry.clone())
            .retry(RetryConfig::new().with_max_attempts(20_000))
            .build()
            .unwrap();
        let err = command.execute().wait().unwrap_err();
        assert!(matches!(err, Error::RetryExhausted { attempts: 20_000, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 20_000);
        assert_eq!(telemetry.snapshot().retries, 19_999);
    }

    #[test]
    fn test_retry_abort_propagates_error_unchanged() {
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting_failures(Arc::clone(&calls), usize::MAX)
            .retry(|_: usize, _: &Error| RetryDecision::Abort)
            .build()
            .unwrap();
        assert_eq!(
            command.execute().wait().unwrap_err(),
            Error::from("attempt 1 failed")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_executions_are_independent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting_failures(Arc::clone(&calls), 2)
            .retry(RetryConfig::new().with_max_attempts(2))
            .build()
            .unwrap();
        assert_eq!(command.execute().wait().unwrap(), 2);
        // The counter keeps growing, so the second run succeeds on its first attempt.
        assert_eq!(command.execute().wait().unwrap(), 3);
    }

    #[test]
    fn test_panic_becomes_execution_failure() {
        let command = DecoratedCommand::<u8>::builder()
            .computation(|| async {
                let missing: Option<u8> = None;
                Ok(missing.expect("boom"))
            })
            .build()
            .unwrap();
        assert_eq!(
            command.execute().wait().unwrap_err(),
            Error::ExecutionFailed("panicked: boom".to_string())
        );
    }

    #[test]
    fn test_tokio_timer_outside_runtime_reports_execution_failure() {
        let command = DecoratedCommand::builder()
            .computation(|| futures::future::pending::<Result<i32>>())
            .timeout(Duration::from_millis(10))
            .build()
            .unwrap();
        let err = command.execute().wait().unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(msg) if msg.starts_with("panicked")));

        let quick = DecoratedCommand::builder()
            .computation(|| async { Ok::<_, Error>(5) })
            .timeout(Duration::from_millis(10))
            .build()
            .unwrap();
        assert_eq!(quick.execute().wait().unwrap(), 5);
    }

    #[test]
    fn test_build_validation() {
        let missing = DecoratedCommand::<u8>::builder().build();
        assert!(matches!(missing, Err(Error::Validation(_))));

        let zero_timeout = DecoratedCommand::builder()
            .computation(|| async { Ok(1) })
            .timeout(Duration::ZERO)
            .build();
        assert!(matches!(zero_timeout, Err(Error::Validation(_))));

        let zero_attempts = DecoratedCommand::builder()
            .computation(|| async { Ok(1) })
            .retry(RetryConfig::new().with_max_attempts(0))
            .build();
        assert!(matches!(zero_attempts, Err(Error::Validation(_))));
    }

    #[test]
    fn test_decorators_in_canonical_order() {
        let command = DecoratedCommand::builder()
            .computation(|| async { Ok(1) })
            .fallback_value(0)
            .retry(RetryConfig::default())
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        assert_eq!(
            command.decorators(),
            vec![DecoratorKind::Timeout, DecoratorKind::Retry, DecoratorKind::Fallback]
        );
    }

    #[tokio::test]
    async fn test_timeout_fails_near_limit() {
        let executor = TokioExecutor::current().unwrap().shared();
        let command = DecoratedCommand::builder()
            .computation(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .executor(executor)
            .timeout(Duration::from_millis(30))
            .build()
            .unwrap();

        let start = Instant::now();
        let err = command.execute().await.unwrap_err();
        assert_eq!(err, Error::Timeout(Duration::from_millis(30)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_interrupt_stops_attempt() {
        let executor = TokioExecutor::current().unwrap().shared();
        let finished = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&finished);
        let command = DecoratedCommand::builder()
            .computation(move || {
                let f = Arc::clone(&f);
                async move {
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    f.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .executor(executor)
            .timeout_with(Duration::from_millis(10), OnTimeout::Interrupt)
            .build()
            .unwrap();

        assert!(command.execute().await.unwrap_err().is_timeout());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_abandon_lets_attempt_finish() {
        let executor = TokioExecutor::current().unwrap().shared();
        let finished = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&finished);
        let command = DecoratedCommand::builder()
            .computation(move || {
                let f = Arc::clone(&f);
                async move {
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    f.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .executor(executor)
            .timeout_with(Duration::from_millis(10), OnTimeout::Abandon)
            .build()
            .unwrap();

        let result = command.execute();
        assert!(result.clone().await.unwrap_err().is_timeout());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(result.wait().unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_timeout_applies_per_attempt_with_telemetry() {
        let executor = TokioExecutor::current().unwrap().shared();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let telemetry = Telemetry::new();
        let command = DecoratedCommand::builder()
            .computation(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 1 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok(n)
                }
            })
            .executor(executor)
            .named("slow-start")
            .telemetry(telemetry.clone())
            .timeout(Duration::from_millis(20))
            .retry(RetryConfig::new().with_max_attempts(3).with_wait_ms(5))
            .build()
            .unwrap();

        assert_eq!(command.execute().await.unwrap(), 2);

        let metrics = telemetry.snapshot();
        assert_eq!(metrics.attempts, 2);
        assert_eq!(metrics.timeouts, 1);
        assert_eq!(metrics.retries, 1);
        assert!(telemetry.events().contains(&ExecutionEvent::TimedOut {
            command: "slow-start".to_string(),
            limit_ms: 20,
        }));
    }

    #[tokio::test]
    async fn test_cancel_stops_retrying() {
        let executor = TokioExecutor::current().unwrap().shared();
        let calls = Arc::new(AtomicUsize::new(0));
        let command = counting_failures(Arc::clone(&calls), usize::MAX)
            .executor(executor)
            .retry(RetryConfig::new().with_max_attempts(100).with_wait_ms(20))
            .build()
            .unwrap();

        let running = command.execute();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(running.cancel());
        let seen = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
        assert_eq!(running.await.unwrap_err(), Error::Cancelled);
    }
}
