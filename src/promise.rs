//! The future handle every other layer is built on.
//!
//! A [`Promise`] owns a single-assignment completion slot. It starts
//! pending and settles exactly once, with a value or an [`Error`]; later
//! writes are ignored. Any number of observers may attach callbacks before
//! or after it settles, and a promise can be `.await`ed directly.
//!
//! Cancellation is modelled as settling with [`Error::Cancelled`]. Work
//! started through [`Promise::spawn`] or [`Promise::submit`] watches its
//! promise: work that has not started yet never starts, and a running future
//! is dropped at its next suspension point.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use futures::future::{AbortHandle, Abortable};
use parking_lot::{Condvar, Mutex};

use crate::error::panic_message;
use crate::executor::{inline, SharedExecutor};
use crate::{Error, Result};

type Listener<V> = Box<dyn FnOnce(Result<V>) + Send>;

enum State<V> {
    Pending {
        listeners: Vec<Listener<V>>,
        wakers: Vec<Waker>,
    },
    Settled(Result<V>),
}

struct Inner<V> {
    state: Mutex<State<V>>,
    settled: Condvar,
}

/// A handle to a value that becomes available at most once.
///
/// Cloning a `Promise` clones the handle, not the slot: all clones observe
/// the same outcome.
///
/// # Example
///
/// ```rust
/// use async_compose::{Promise, Error};
///
/// let promise = Promise::new();
/// assert!(promise.complete(42));
/// assert!(!promise.fail(Error::from("too late")));
/// assert_eq!(promise.wait().unwrap(), 42);
/// ```
pub struct Promise<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Promise<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Promise<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &*self.inner.state.lock() {
            State::Pending { .. } => "pending",
            State::Settled(Ok(_)) => "succeeded",
            State::Settled(Err(Error::Cancelled)) => "cancelled",
            State::Settled(Err(_)) => "failed",
        };
        f.debug_struct("Promise").field("status", &status).finish()
    }
}

impl<V: Clone + Send + 'static> Default for Promise<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + 'static> Promise<V> {
    /// Create a pending promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending {
                    listeners: Vec::new(),
                    wakers: Vec::new(),
                }),
                settled: Condvar::new(),
            }),
        }
    }

    /// Create a promise that has already succeeded with `value`.
    #[must_use]
    pub fn ready(value: V) -> Self {
        Self::from_result(Ok(value))
    }

    /// Create a promise that has already failed with `error`.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self::from_result(Err(error))
    }

    /// Create a promise that has already settled with `outcome`.
    #[must_use]
    pub fn from_result(outcome: Result<V>) -> Self {
        let promise = Self::new();
        promise.settle(outcome);
        promise
    }

    /// Run `future` on `executor`, returning a promise for its output.
    ///
    /// Cancelling the returned promise aborts the future. A panic inside the
    /// future fails the promise with [`Error::ExecutionFailed`]; a rejected
    /// submission fails it with the executor's error.
    pub fn spawn<F>(executor: &SharedExecutor, future: F) -> Self
    where
        F: Future<Output = Result<V>> + Send + 'static,
    {
        let output = Self::new();
        let (abort, registration) = AbortHandle::new_pair();
        output.listen(move |outcome| {
            if matches!(outcome, Err(Error::Cancelled)) {
                abort.abort();
            }
        });

        let out = output.clone();
        let guarded = futures::FutureExt::catch_unwind(AssertUnwindSafe(future));
        let job = async move {
            match Abortable::new(guarded, registration).await {
                Ok(Ok(outcome)) => {
                    out.settle(outcome);
                }
                Ok(Err(panic)) => {
                    out.fail(Error::ExecutionFailed(panic_message(panic.as_ref())));
                }
                Err(_aborted) => {}
            }
        };

        if let Err(e) = executor.submit(Box::pin(job)) {
            output.fail(e);
        }
        output
    }

    /// Call `f` on `executor` and mirror the promise it returns.
    ///
    /// `f` is not called if the returned promise is cancelled before the
    /// executor gets to it. Cancelling the returned promise later cancels
    /// the promise `f` produced.
    pub fn submit<F>(executor: &SharedExecutor, f: F) -> Self
    where
        F: FnOnce() -> Promise<V> + Send + 'static,
    {
        let output = Self::new();
        let out = output.clone();
        let job = async move {
            if out.is_done() {
                return;
            }
            match std::panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(inner) => {
                    out.cancel_with(&inner);
                    inner.forward(&out);
                }
                Err(panic) => {
                    out.fail(Error::ExecutionFailed(panic_message(panic.as_ref())));
                }
            }
        };
        if let Err(e) = executor.submit(Box::pin(job)) {
            output.fail(e);
        }
        output
    }

    /// Succeed with `value`. Returns false if the promise had already settled.
    pub fn complete(&self, value: V) -> bool {
        self.settle(Ok(value))
    }

    /// Fail with `error`. Returns false if the promise had already settled.
    pub fn fail(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    /// Settle with `outcome`. The first writer wins; later calls return
    /// false and deliver nothing.
    pub fn settle(&self, outcome: Result<V>) -> bool {
        let (listeners, wakers) = {
            let mut state = self.inner.state.lock();
            let State::Pending { listeners, wakers } = &mut *state else {
                return false;
            };
            let listeners = std::mem::take(listeners);
            let wakers = std::mem::take(wakers);
            *state = State::Settled(outcome.clone());
            (listeners, wakers)
        };
        self.inner.settled.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for listener in listeners {
            listener(outcome.clone());
        }
        true
    }

    /// Cancel the promise if it is still pending.
    ///
    /// Returns true if this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        self.fail(Error::Cancelled)
    }

    /// Returns true once the promise has settled.
    pub fn is_done(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Settled(_))
    }

    /// Returns true if the promise settled through cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            &*self.inner.state.lock(),
            State::Settled(Err(Error::Cancelled))
        )
    }

    /// Returns the outcome if the promise has settled.
    pub fn try_result(&self) -> Option<Result<V>> {
        match &*self.inner.state.lock() {
            State::Settled(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Block the current thread until the promise settles or `timeout`
    /// elapses. An elapsed wait fails with [`Error::WaitTimedOut`].
    ///
    /// Do not call this from a task that the awaited work needs in order to
    /// make progress (for example on a single-threaded runtime).
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub fn get(&self, timeout: Duration) -> Result<V> {
        if let Some(outcome) = self.try_result() {
            return outcome;
        }
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut state = self.inner.state.lock();
        loop {
            if let State::Settled(outcome) = &*state {
                return outcome.clone();
            }
            if self.inner.settled.wait_until(&mut state, deadline).timed_out() {
                return match &*state {
                    State::Settled(outcome) => outcome.clone(),
                    State::Pending { .. } => Err(Error::WaitTimedOut(timeout)),
                };
            }
        }
    }

    /// Block the current thread until the promise settles.
    pub fn wait(&self) -> Result<V> {
        let mut state = self.inner.state.lock();
        loop {
            if let State::Settled(outcome) = &*state {
                return outcome.clone();
            }
            self.inner.settled.wait(&mut state);
        }
    }

    /// Run `f` with the outcome on the thread that settles the promise, or
    /// immediately if it has already settled.
    pub(crate) fn listen<F>(&self, f: F)
    where
        F: FnOnce(Result<V>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending { listeners, .. } => {
                    listeners.push(Box::new(f));
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        f(outcome);
    }

    /// Schedule `f` on `executor` with the eventual outcome, exactly once.
    pub fn on_complete<F>(&self, executor: &SharedExecutor, f: F)
    where
        F: FnOnce(Result<V>) + Send + 'static,
    {
        let executor = Arc::clone(executor);
        self.listen(move |outcome| {
            let name = executor.name().to_string();
            if let Err(e) = executor.submit(Box::pin(async move { f(outcome) })) {
                tracing::error!(executor = %name, error = %e, "Callback was rejected by its executor");
            }
        });
    }

    /// Schedule `on_success` or `on_failure` on `executor` once the promise
    /// settles.
    pub fn add_callback<S, F>(&self, executor: &SharedExecutor, on_success: S, on_failure: F)
    where
        S: FnOnce(V) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        self.on_complete(executor, move |outcome| match outcome {
            Ok(value) => on_success(value),
            Err(error) => on_failure(error),
        });
    }

    /// Settle `target` with this promise's outcome when it arrives.
    pub fn forward(&self, target: &Promise<V>) {
        let target = target.clone();
        self.listen(move |outcome| {
            target.settle(outcome);
        });
    }

    /// Cancel `upstream` if this promise gets cancelled.
    pub fn cancel_with<U: Clone + Send + 'static>(&self, upstream: &Promise<U>) {
        let upstream = upstream.clone();
        self.listen(move |outcome| {
            if matches!(outcome, Err(Error::Cancelled)) {
                upstream.cancel();
            }
        });
    }

    /// Once this promise succeeds, call `f` with the value on `executor` and
    /// mirror the promise it returns. A failure propagates unchanged without
    /// calling `f`. Cancelling the result cancels whichever side is in flight.
    pub fn and_then<Y, F>(&self, executor: &SharedExecutor, f: F) -> Promise<Y>
    where
        Y: Clone + Send + 'static,
        F: FnOnce(V) -> Promise<Y> + Send + 'static,
    {
        let output = Promise::new();
        output.cancel_with(self);
        let out = output.clone();
        let executor = Arc::clone(executor);
        self.listen(move |outcome| match outcome {
            Ok(value) => {
                if out.is_done() {
                    return;
                }
                let step = Promise::submit(&executor, move || f(value));
                out.cancel_with(&step);
                step.forward(&out);
            }
            Err(error) => {
                out.fail(error);
            }
        });
        output
    }

    /// Once this promise succeeds, transform the value with `f` on
    /// `executor`. A failure propagates unchanged.
    pub fn map<Y, F>(&self, executor: &SharedExecutor, f: F) -> Promise<Y>
    where
        Y: Clone + Send + 'static,
        F: FnOnce(V) -> Result<Y> + Send + 'static,
    {
        self.and_then(executor, move |value| Promise::from_result(f(value)))
    }

    /// If this promise fails (other than by cancellation), call `f` with the
    /// error on `executor` and mirror the promise it returns.
    pub fn recover<F>(&self, executor: &SharedExecutor, f: F) -> Promise<V>
    where
        F: FnOnce(Error) -> Promise<V> + Send + 'static,
    {
        let output = Promise::new();
        output.cancel_with(self);
        let out = output.clone();
        let executor = Arc::clone(executor);
        self.listen(move |outcome| match outcome {
            Err(error) if !error.is_cancelled() => {
                if out.is_done() {
                    return;
                }
                let step = Promise::submit(&executor, move || f(error));
                out.cancel_with(&step);
                step.forward(&out);
            }
            outcome => {
                out.settle(outcome);
            }
        });
        output
    }

    /// Pair this promise's value with `other`'s once both succeed.
    pub fn zip<Y>(&self, other: &Promise<Y>) -> Promise<(V, Y)>
    where
        Y: Clone + Send + 'static,
    {
        let other = other.clone();
        let right = other.clone();
        let zipped = self.and_then(&inline(), move |left| {
            Promise::map(&right, &inline(), move |right| Ok((left, right)))
        });
        zipped.cancel_with(&other);
        zipped
    }

    /// Succeed with every value, in order, once all promises succeed.
    ///
    /// The first failure fails the aggregate immediately and cancels the
    /// promises still pending. Cancelling the aggregate cancels them all.
    pub fn all<I>(promises: I) -> Promise<Vec<V>>
    where
        I: IntoIterator<Item = Promise<V>>,
    {
        let promises: Vec<Promise<V>> = promises.into_iter().collect();
        let output = Promise::new();
        if promises.is_empty() {
            output.complete(Vec::new());
            return output;
        }

        let slots: Arc<Mutex<Vec<Option<V>>>> = Arc::new(Mutex::new(vec![None; promises.len()]));
        let remaining = Arc::new(AtomicUsize::new(promises.len()));
        let siblings = Arc::new(promises.clone());
        for promise in &promises {
            output.cancel_with(promise);
        }
        for (index, promise) in promises.into_iter().enumerate() {
            let out = output.clone();
            let slots = Arc::clone(&slots);
            let remaining = Arc::clone(&remaining);
            let siblings = Arc::clone(&siblings);
            promise.listen(move |outcome| match outcome {
                Ok(value) => {
                    slots.lock()[index] = Some(value);
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        let values = std::mem::take(&mut *slots.lock());
                        out.complete(values.into_iter().flatten().collect());
                    }
                }
                Err(error) => {
                    if out.fail(error) {
                        for sibling in siblings.iter() {
                            sibling.cancel();
                        }
                    }
                }
            });
        }
        output
    }

    /// Succeed, once every promise has settled, with each outcome in order.
    pub fn settled<I>(promises: I) -> Promise<Vec<Result<V>>>
    where
        I: IntoIterator<Item = Promise<V>>,
    {
        let promises: Vec<Promise<V>> = promises.into_iter().collect();
        let output = Promise::new();
        if promises.is_empty() {
            output.complete(Vec::new());
            return output;
        }

        let slots: Arc<Mutex<Vec<Option<Result<V>>>>> =
            Arc::new(Mutex::new(vec![None; promises.len()]));
        let remaining = Arc::new(AtomicUsize::new(promises.len()));
        for promise in &promises {
            output.cancel_with(promise);
        }
        for (index, promise) in promises.into_iter().enumerate() {
            let out = output.clone();
            let slots = Arc::clone(&slots);
            let remaining = Arc::clone(&remaining);
            promise.listen(move |outcome| {
                slots.lock()[index] = Some(outcome);
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let outcomes = std::mem::take(&mut *slots.lock());
                    out.complete(outcomes.into_iter().flatten().collect());
                }
            });
        }
        output
    }
}

impl<V: Clone + Send + 'static> Future for Promise<V> {
    type Output = Result<V>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock();
        match &mut *state {
            State::Settled(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
