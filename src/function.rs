//! The unified capability: an asynchronous function from input to output.
//!
//! [`AsyncFunction`] is the one interface shared by single commands,
//! pipelines and adapters. A *command* is simply an `AsyncFunction` whose
//! input is `()`; [`Command::execute`] is the convenience form for it.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{BoundInput, Discard, IgnoreInput};
use crate::executor::{inline, SharedExecutor};
use crate::instrumented::InstrumentedFunction;
use crate::{Promise, Result, Telemetry};

/// An asynchronous function: takes an input and returns a [`Promise`] for
/// the output.
///
/// Calling [`apply`](AsyncFunction::apply) starts the work; it never blocks.
/// Each call is an independent execution.
///
/// # Example
///
/// ```rust
/// use async_compose::{AsyncFunction, LambdaFunction};
///
/// let double = LambdaFunction::new(|x: i32| async move {
///     Ok::<i32, async_compose::Error>(x * 2)
/// });
/// assert_eq!(double.apply(21).wait().unwrap(), 42);
/// ```
pub trait AsyncFunction: Send + Sync {
    /// The input type for this function.
    type Input: Send + 'static;
    /// The output type produced by this function.
    type Output: Clone + Send + 'static;

    /// Start an execution with `input`.
    fn apply(&self, input: Self::Input) -> Promise<Self::Output>;

    /// Returns a human-readable name for this function. Defaults to the type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A zero-argument asynchronous operation.
///
/// Implemented for every [`AsyncFunction`] whose input is `()`.
pub trait Command: AsyncFunction<Input = ()> {
    /// Start an execution.
    fn execute(&self) -> Promise<Self::Output> {
        self.apply(())
    }
}

impl<T: AsyncFunction<Input = ()> + ?Sized> Command for T {}

/// A function constructed from a closure returning a future.
///
/// The future runs on the function's executor, [`inline`] unless
/// [`on`](LambdaFunction::on) says otherwise.
pub struct LambdaFunction<I, O, F> {
    f: Arc<F>,
    executor: SharedExecutor,
    _phantom: PhantomData<fn(I) -> O>,
}

impl<I, O, F, Fut> LambdaFunction<I, O, F>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    I: Send + 'static,
    O: Clone + Send + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    /// Create a new `LambdaFunction` from the given closure.
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            executor: inline(),
            _phantom: PhantomData,
        }
    }

    /// Run the closure's futures on `executor`.
    pub fn on(mut self, executor: SharedExecutor) -> Self {
        self.executor = executor;
        self
    }
}

impl<I, O, F, Fut> AsyncFunction for LambdaFunction<I, O, F>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    I: Send + 'static,
    O: Clone + Send + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    type Input = I;
    type Output = O;

    fn apply(&self, input: I) -> Promise<O> {
        let f = Arc::clone(&self.f);
        Promise::spawn(&self.executor, async move { (*f)(input).await })
    }
}

/// Extension trait providing adapters and combinators for all
/// [`AsyncFunction`] implementors.
pub trait AsyncFunctionExt: AsyncFunction {
    /// Erase the concrete function type.
    fn boxed(self) -> Box<dyn AsyncFunction<Input = Self::Input, Output = Self::Output>>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }

    /// Erase the concrete function type behind a shareable handle.
    fn shared(self) -> Arc<dyn AsyncFunction<Input = Self::Input, Output = Self::Output>>
    where
        Self: Sized + 'static,
    {
        Arc::new(self)
    }

    /// Record start, end and error events for every execution.
    fn instrument(self, name: impl Into<String>, telemetry: Telemetry) -> InstrumentedFunction<Self>
    where
        Self: Sized,
    {
        InstrumentedFunction::new(self, name, telemetry)
    }

    /// Use this command where a function of any input is expected; the input
    /// is ignored.
    fn ignore_input<I>(self) -> IgnoreInput<Self, I>
    where
        Self: Sized + AsyncFunction<Input = ()>,
        I: Send + 'static,
    {
        IgnoreInput::new(self)
    }

    /// Bind a fixed input, producing a command.
    fn bind(self, input: Self::Input) -> BoundInput<Self>
    where
        Self: Sized,
        Self::Input: Clone + Sync,
    {
        BoundInput::new(self, input)
    }

    /// Discard the output, keeping only success or failure.
    fn discard(self) -> Discard<Self>
    where
        Self: Sized,
    {
        Discard::new(self)
    }

    /// Apply and block the current thread until the result is available.
    fn call_blocking(&self, input: Self::Input) -> Result<Self::Output> {
        self.apply(input).wait()
    }

    /// Apply and block for at most `timeout`.
    fn call_blocking_timeout(&self, input: Self::Input, timeout: Duration) -> Result<Self::Output> {
        self.apply(input).get(timeout)
    }
}

impl<T: AsyncFunction + ?Sized> AsyncFunctionExt for T {}

impl<I, O> AsyncFunction for Box<dyn AsyncFunction<Input = I, Output = O>>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    type Input = I;
    type Output = O;

    fn apply(&self, input: I) -> Promise<O> {
        (**self).apply(input)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<I, O> AsyncFunction for Arc<dyn AsyncFunction<Input = I, Output = O>>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    type Input = I;
    type Output = O;

    fn apply(&self, input: I) -> Promise<O> {
        (**self).apply(input)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TokioExecutor;
    use crate::Error;

    #[test]
    fn test_lambda_inline() {
        let inc = LambdaFunction::new(|x: i32| async move { Ok::<i32, Error>(x + 1) });
        assert_eq!(inc.call_blocking(1).unwrap(), 2);
    }

    #[test]
    fn test_command_execute() {
        let answer = LambdaFunction::new(|_: ()| async { Ok::<&str, Error>("forty-two") });
        assert_eq!(answer.execute().wait().unwrap(), "forty-two");
    }

    #[test]
    fn test_boxed_functions_are_functions() {
        let fns: Vec<Box<dyn AsyncFunction<Input = i32, Output = i32>>> = vec![
            LambdaFunction::new(|x: i32| async move { Ok::<i32, Error>(x * 2) }).boxed(),
            LambdaFunction::new(|x: i32| async move { Ok::<i32, Error>(x * 3) }).boxed(),
        ];
        let results: Vec<i32> = fns.iter().map(|f| f.call_blocking(2).unwrap()).collect();
        assert_eq!(results, vec![4, 6]);
    }

    #[tokio::test]
    async fn test_lambda_on_tokio_executor() {
        let executor = TokioExecutor::current().unwrap().shared();
        let slow = LambdaFunction::new(|x: u64| async move {
            tokio::time::sleep(Duration::from_millis(x)).await;
            Ok::<u64, Error>(x)
        })
        .on(executor);
        assert_eq!(slow.apply(10).await.unwrap(), 10);
    }
}
