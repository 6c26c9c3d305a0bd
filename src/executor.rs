//! Execution contexts.
//!
//! An [`Executor`] accepts a unit of work and runs it exactly once, possibly
//! on another thread, or rejects it. Every stage, callback and command names
//! the executor its work runs on; the crate itself owns no threads.
//!
//! Two contexts ship with the crate:
//!
//! - [`Inline`] runs work on the calling thread. A job that suspends is
//!   re-polled on whichever thread wakes it, so continuations run "inline on
//!   whichever thread completes the predecessor". This is the default
//!   everywhere an executor is optional.
//! - [`TokioExecutor`] spawns work onto a tokio runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::Context;

use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};
use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::{Error, Result};

/// A unit of work submitted to an [`Executor`].
pub type Job = BoxFuture<'static, ()>;

/// A shareable handle to an executor.
pub type SharedExecutor = Arc<dyn Executor>;

/// The execution context contract.
pub trait Executor: Send + Sync {
    /// Run `job` exactly once, or reject it with
    /// [`Error::RejectedExecution`] without running it.
    fn submit(&self, job: Job) -> Result<()>;

    /// Returns a human-readable name for this executor.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn submit(&self, job: Job) -> Result<()> {
        (**self).submit(job)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Returns the process-wide [`Inline`] executor.
pub fn inline() -> SharedExecutor {
    static INLINE: OnceLock<SharedExecutor> = OnceLock::new();
    INLINE.get_or_init(|| Arc::new(Inline)).clone()
}

/// Runs jobs on the submitting thread, and resumes suspended jobs on the
/// thread that wakes them.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Executor for Inline {
    fn submit(&self, job: Job) -> Result<()> {
        let task = Arc::new(InlineTask {
            job: Mutex::new(Some(job)),
            notified: AtomicBool::new(false),
        });
        task.run();
        Ok(())
    }

    fn name(&self) -> &str {
        "inline"
    }
}

struct InlineTask {
    job: Mutex<Option<Job>>,
    notified: AtomicBool,
}

impl InlineTask {
    /// Poll the job until it stops making progress.
    ///
    /// A wake that arrives while another thread (or this one, reentrantly) is
    /// polling only sets `notified`; the poller re-polls before leaving.
    fn run(self: &Arc<Self>) {
        self.notified.store(true, Ordering::SeqCst);
        loop {
            let Some(mut slot) = self.job.try_lock() else {
                return;
            };
            if self.notified.swap(false, Ordering::SeqCst) {
                if let Some(job) = slot.as_mut() {
                    let waker = waker_ref(self);
                    let mut cx = Context::from_waker(&waker);
                    if job.as_mut().poll(&mut cx).is_ready() {
                        *slot = None;
                    }
                }
            }
            drop(slot);
            if !self.notified.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

impl ArcWake for InlineTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.run();
    }
}

/// Spawns jobs onto a tokio runtime.
///
/// After [`TokioExecutor::shutdown`] every submission is rejected.
#[derive(Debug)]
pub struct TokioExecutor {
    handle: Handle,
    closed: AtomicBool,
    name: String,
}

impl TokioExecutor {
    /// Create an executor spawning onto `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            closed: AtomicBool::new(false),
            name: "tokio".to_string(),
        }
    }

    /// Create an executor for the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::RejectedExecution(e.to_string()))
    }

    /// Set a human-readable name for this executor.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Wrap this executor for sharing.
    pub fn shared(self) -> SharedExecutor {
        Arc::new(self)
    }

    /// Stop accepting work. Jobs already spawned keep running.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Executor for TokioExecutor {
    fn submit(&self, job: Job) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::RejectedExecution(format!(
                "executor '{}' is shut down",
                self.name
            )));
        }
        self.handle.spawn(job);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
