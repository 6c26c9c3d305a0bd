//! A chainable facade over [`Promise`].
//!
//! [`FluentFuture`] pairs a promise with the executor its continuations run
//! on, so a sequence of operators reads left to right without repeating the
//! executor at every step.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::executor::{inline, SharedExecutor};
use crate::{AsyncFunction, Error, Promise, Result};

/// A promise plus a default executor for the operators applied to it.
///
/// Operators never touch the wrapped promise; each returns a new wrapper
/// around a derived promise. Cancelling a derived wrapper cancels the
/// promise it was derived from if that is still pending.
///
/// # Example
///
/// ```rust
/// use async_compose::{Error, FluentFuture};
///
/// # tokio_test::block_on(async {
/// let total = FluentFuture::from_value(20)
///     .map(|x| x + 1)
///     .filter(|x| x % 2 == 1)
///     .map(|x| x * 2)
///     .await
///     .unwrap();
/// assert_eq!(total, 42);
///
/// let rejected = FluentFuture::from_value(4).filter(|x| *x > 10);
/// assert_eq!(rejected.await.unwrap_err(), Error::PredicateNotMatched);
/// # });
/// ```
pub struct FluentFuture<V> {
    promise: Promise<V>,
    executor: SharedExecutor,
}

impl<V> Clone for FluentFuture<V> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<V: Clone + Send + 'static> From<Promise<V>> for FluentFuture<V> {
    fn from(promise: Promise<V>) -> Self {
        Self::from_promise(promise)
    }
}

impl<V: Clone + Send + 'static> FluentFuture<V> {
    /// Wrap an already-successful value.
    pub fn from_value(value: V) -> Self {
        Self::from_promise(Promise::ready(value))
    }

    /// Wrap an already-failed outcome.
    pub fn from_error(error: Error) -> Self {
        Self::from_promise(Promise::failed(error))
    }

    /// Wrap `promise`. Continuations run [`inline`](crate::inline) until
    /// [`on`](FluentFuture::on) says otherwise.
    pub fn from_promise(promise: Promise<V>) -> Self {
        Self {
            promise,
            executor: inline(),
        }
    }

    /// All values, in order, once every promise succeeds. The first failure
    /// fails the result and cancels the rest.
    pub fn from_all<It>(promises: It) -> FluentFuture<Vec<V>>
    where
        It: IntoIterator<Item = Promise<V>>,
    {
        FluentFuture::from_promise(Promise::all(promises))
    }

    /// Run later continuations on `executor`.
    pub fn on(mut self, executor: SharedExecutor) -> Self {
        self.executor = executor;
        self
    }

    fn derive<Y: Clone + Send + 'static>(&self, promise: Promise<Y>) -> FluentFuture<Y> {
        FluentFuture {
            promise,
            executor: Arc::clone(&self.executor),
        }
    }

    /// Transform the value.
    pub fn map<Y, F>(&self, f: F) -> FluentFuture<Y>
    where
        Y: Clone + Send + 'static,
        F: FnOnce(V) -> Y + Send + 'static,
    {
        self.derive(self.promise.map(&self.executor, move |value| Ok(f(value))))
    }

    /// Transform the value with a function that may fail.
    pub fn try_map<Y, F>(&self, f: F) -> FluentFuture<Y>
    where
        Y: Clone + Send + 'static,
        F: FnOnce(V) -> Result<Y> + Send + 'static,
    {
        self.derive(self.promise.map(&self.executor, f))
    }

    /// Continue with an asynchronous step.
    pub fn then<Y, F, Fut>(&self, f: F) -> FluentFuture<Y>
    where
        Y: Clone + Send + 'static,
        F: FnOnce(V) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Y>> + Send + 'static,
    {
        let executor = Arc::clone(&self.executor);
        self.derive(
            self.promise
                .and_then(&inline(), move |value| Promise::spawn(&executor, f(value))),
        )
    }

    /// Continue with `func`.
    pub fn then_apply<F>(&self, func: F) -> FluentFuture<F::Output>
    where
        F: AsyncFunction<Input = V> + 'static,
    {
        self.derive(self.promise.and_then(&self.executor, move |value| func.apply(value)))
    }

    /// Keep the value only if `predicate` holds; otherwise fail with
    /// [`Error::PredicateNotMatched`].
    pub fn filter<F>(&self, predicate: F) -> FluentFuture<V>
    where
        F: FnOnce(&V) -> bool + Send + 'static,
    {
        self.try_map(move |value| {
            if predicate(&value) {
                Ok(value)
            } else {
                Err(Error::PredicateNotMatched)
            }
        })
    }

    /// Pair this value with `other`'s once both succeed.
    pub fn zip<Y: Clone + Send + 'static>(&self, other: &FluentFuture<Y>) -> FluentFuture<(V, Y)> {
        self.derive(self.promise.zip(&other.promise))
    }

    /// Replace a failure, other than cancellation, with `f(error)`.
    pub fn with_fallback<F>(&self, f: F) -> FluentFuture<V>
    where
        F: FnOnce(Error) -> V + Send + 'static,
    {
        self.derive(
            self.promise
                .recover(&self.executor, move |error| Promise::ready(f(error))),
        )
    }

    /// Schedule `on_success` or `on_failure` on this wrapper's executor.
    pub fn add_callback<S, F>(&self, on_success: S, on_failure: F) -> FluentFuture<V>
    where
        S: FnOnce(V) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        self.promise.add_callback(&self.executor, on_success, on_failure);
        self.clone()
    }

    /// Block until the outcome is known or `timeout` elapses.
    pub fn get(&self, timeout: Duration) -> Result<V> {
        self.promise.get(timeout)
    }

    /// Like [`get`](FluentFuture::get), converting the failure into `E`.
    pub fn get_as<E: From<Error>>(&self, timeout: Duration) -> std::result::Result<V, E> {
        self.promise.get(timeout).map_err(E::from)
    }

    /// Block until the outcome is known.
    pub fn wait(&self) -> Result<V> {
        self.promise.wait()
    }

    /// Cancel if still pending. Returns true if this call cancelled it.
    pub fn cancel(&self) -> bool {
        self.promise.cancel()
    }

    /// Returns true once the outcome is known.
    pub fn is_done(&self) -> bool {
        self.promise.is_done()
    }

    /// Returns true if the outcome is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.promise.is_cancelled()
    }

    /// The wrapped promise.
    pub fn promise(&self) -> &Promise<V> {
        &self.promise
    }

    /// Unwrap into the underlying promise.
    pub fn into_promise(self) -> Promise<V> {
        self.promise
    }
}

impl<V: Clone + Send + 'static> Future for FluentFuture<V> {
    type Output = Result<V>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().promise).poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TokioExecutor;
    use crate::LambdaFunction;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    enum AppError {
        Upstream(String),
    }

    impl From<Error> for AppError {
        fn from(error: Error) -> Self {
            AppError::Upstream(error.to_string())
        }
    }

    #[test]
    fn test_operators_leave_source_untouched() {
        let source = FluentFuture::from_value(3);
        let doubled = source.map(|x| x * 2);
        let failed = source.try_map(|_| Err::<i32, _>(Error::from("nope")));
        assert_eq!(doubled.wait().unwrap(), 6);
        assert_eq!(failed.wait().unwrap_err(), Error::from("nope"));
        assert_eq!(source.wait().unwrap(), 3);
    }

    #[test]
    fn test_fallback_and_get_as() {
        let failed: FluentFuture<i32> = FluentFuture::from_error(Error::from("down"));
        assert_eq!(failed.with_fallback(|_| 0).wait().unwrap(), 0);
        assert_eq!(
            failed.get_as::<AppError>(Duration::from_millis(10)),
            Err(AppError::Upstream("down".to_string()))
        );
    }

    #[test]
    fn test_zip_and_from_all() {
        let left = FluentFuture::from_value("left");
        let right = FluentFuture::from_value(2);
        assert_eq!(left.zip(&right).wait().unwrap(), ("left", 2));

        let all = FluentFuture::from_all(vec![Promise::ready(1), Promise::ready(2)]);
        assert_eq!(all.wait().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_add_callback_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let pending = Promise::new();
        let fluent = FluentFuture::from_promise(pending.clone()).add_callback(
            move |v: i32| {
                c.fetch_add(v as usize, Ordering::SeqCst);
            },
            |_| {},
        );
        pending.complete(5);
        pending.complete(7);
        assert!(fluent.is_done());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_cancel_derived_cancels_source() {
        let source: Promise<i32> = Promise::new();
        let derived = FluentFuture::from(source.clone()).map(|x| x + 1);
        assert!(derived.cancel());
        assert!(derived.is_cancelled());
        assert!(source.is_cancelled());
    }

    #[test]
    fn test_get_times_out() {
        let pending: FluentFuture<u8> = FluentFuture::from_promise(Promise::new());
        assert_eq!(
            pending.get(Duration::from_millis(5)).unwrap_err(),
            Error::WaitTimedOut(Duration::from_millis(5))
        );
    }

    #[tokio::test]
    async fn test_then_on_tokio_executor() {
        let executor = TokioExecutor::current().unwrap().shared();
        let square = LambdaFunction::new(|x: u32| async move { Ok::<u32, Error>(x * x) });
        let value = FluentFuture::from_value(3_u32)
            .on(executor)
            .then(|x| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<u32, Error>(x + 1)
            })
            .then_apply(square)
            .await
            .unwrap();
        assert_eq!(value, 16);
    }
}
