//! Sequential command composition.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::adapters::Discard;
use crate::error::panic_message;
use crate::{AsyncFunction, Command, Error, Promise};

type Link = Arc<dyn AsyncFunction<Input = (), Output = ()>>;

/// Collects commands to run one after another.
///
/// Commands may have different output types; only success or failure of
/// each one matters to the chain.
///
/// # Example
///
/// ```rust
/// use async_compose::{Command, CommandChainBuilder, LambdaFunction, Error};
///
/// # tokio_test::block_on(async {
/// let chain = CommandChainBuilder::new()
///     .and_then(LambdaFunction::new(|_: ()| async { Ok::<_, Error>(1) }))
///     .and_then(LambdaFunction::new(|_: ()| async { Ok::<_, Error>("two") }))
///     .build();
///
/// chain.execute().await.unwrap();
/// # });
/// ```
#[derive(Default)]
pub struct CommandChainBuilder {
    links: Vec<Link>,
}

impl CommandChainBuilder {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `command`.
    pub fn and_then<C>(mut self, command: C) -> Self
    where
        C: Command + 'static,
    {
        self.links.push(Arc::new(Discard::new(command)));
        self
    }

    /// Number of commands added so far.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Returns true if no command has been added.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Freeze the chain.
    pub fn build(self) -> CommandChain {
        CommandChain {
            links: self.links.into(),
        }
    }
}

/// Commands executed strictly in order, one in flight at a time.
///
/// The first failure fails the chain with that error and no later command
/// runs. An empty chain succeeds immediately.
#[derive(Clone)]
pub struct CommandChain {
    links: Arc<[Link]>,
}

impl CommandChain {
    /// Number of commands in the chain.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Returns true if the chain has no commands.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl AsyncFunction for CommandChain {
    type Input = ();
    type Output = ();

    fn apply(&self, _input: ()) -> Promise<()> {
        let output = Promise::new();
        run_from(Arc::clone(&self.links), 0, output.clone());
        output
    }

    fn name(&self) -> &str {
        "CommandChain"
    }
}

/// Run links from `index` on. Links that settle synchronously are handled
/// in this loop; only a pending link registers a continuation.
fn run_from(links: Arc<[Link]>, mut index: usize, output: Promise<()>) {
    loop {
        if output.is_done() {
            return;
        }
        let Some(link) = links.get(index) else {
            output.complete(());
            return;
        };
        let current = match std::panic::catch_unwind(AssertUnwindSafe(|| link.execute())) {
            Ok(current) => current,
            Err(panic) => {
                output.fail(Error::ExecutionFailed(panic_message(panic.as_ref())));
                return;
            }
        };
        output.cancel_with(&current);

        match current.try_result() {
            Some(Ok(())) => index += 1,
            Some(Err(error)) => {
                output.fail(error);
                return;
            }
            None => {
                current.listen(move |outcome| match outcome {
                    Ok(()) => run_from(links, index + 1, output),
                    Err(error) => {
                        output.fail(error);
                    }
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LambdaFunction;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording(
        log: &Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
        fail: bool,
    ) -> impl Command<Output = &'static str> {
        let log = Arc::clone(log);
        LambdaFunction::new(move |_: ()| {
            log.lock().push(label);
            async move {
                if fail {
                    Err(Error::from(label))
                } else {
                    Ok(label)
                }
            }
        })
    }

    #[test]
    fn test_empty_chain_succeeds() {
        let chain = CommandChainBuilder::new().build();
        assert!(chain.is_empty());
        assert!(chain.execute().wait().is_ok());
    }

    #[test]
    fn test_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = CommandChainBuilder::new()
            .and_then(recording(&log, "a", false))
            .and_then(recording(&log, "b", false))
            .and_then(recording(&log, "c", false))
            .build();
        chain.execute().wait().unwrap();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failure_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = CommandChainBuilder::new()
            .and_then(recording(&log, "a", false))
            .and_then(recording(&log, "b", true))
            .and_then(recording(&log, "c", false))
            .build();
        assert_eq!(chain.execute().wait().unwrap_err(), Error::from("b"));
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_long_synchronous_chain() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut builder = CommandChainBuilder::new();
        for _ in 0..20_000 {
            let runs = Arc::clone(&runs);
            builder = builder.and_then(LambdaFunction::new(move |_: ()| {
                runs.fetch_add(1, Ordering::SeqCst);
                futures::future::ready(Ok::<(), Error>(()))
            }));
        }
        let chain = builder.build();
        assert_eq!(chain.len(), 20_000);
        assert!(chain.execute().wait().is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 20_000);
    }

    #[test]
    fn test_resumes_after_pending_link() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let gate = Promise::new();
        let chain = CommandChainBuilder::new()
            .and_then(recording(&log, "a", false))
            .and_then(Pending(gate.clone()))
            .and_then(recording(&log, "b", false))
            .build();

        let running = chain.execute();
        assert!(!running.is_done());
        assert_eq!(*log.lock(), vec!["a"]);
        gate.complete(());
        assert!(running.wait().is_ok());
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    struct Pending(Promise<()>);

    impl AsyncFunction for Pending {
        type Input = ();
        type Output = ();

        fn apply(&self, _input: ()) -> Promise<()> {
            self.0.clone()
        }
    }

    #[test]
    fn test_cancel_reaches_in_flight_link() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let gate = Promise::new();
        let chain = CommandChainBuilder::new()
            .and_then(Pending(gate.clone()))
            .and_then(recording(&log, "after", false))
            .build();

        let running = chain.execute();
        assert!(running.cancel());
        assert!(gate.is_cancelled());
        assert!(log.lock().is_empty());
    }
}
