//! Pipeline stages and the persistent list that holds them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::executor::{inline, SharedExecutor};
use crate::{AsyncFunction, Error, ExecutionEvent, Promise, Result, Telemetry};

/// A value flowing between stages, with its type erased.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// One stage's work: takes the predecessor's value and the executor to run
/// on, returns the promise for the stage's output.
pub(crate) type ErasedFn = Arc<dyn Fn(Value, &SharedExecutor) -> Promise<Value> + Send + Sync>;

/// Builds a gather stage's output from its branch outcomes.
pub(crate) type Assemble = Arc<dyn Fn(Vec<Result<Value>>) -> Result<Value> + Send + Sync>;

pub(crate) fn wrap<T: Send + Sync + 'static>(value: T) -> Value {
    Arc::new(value)
}

/// Recover a typed value, cloning only when the value is still shared.
pub(crate) fn take<T: Clone + Send + Sync + 'static>(value: Value) -> Result<T> {
    let typed = value.downcast::<T>().map_err(|_| {
        Error::execution(format!(
            "pipeline stage expected a value of type {}",
            std::any::type_name::<T>()
        ))
    })?;
    Ok(Arc::try_unwrap(typed).unwrap_or_else(|shared| (*shared).clone()))
}

/// Erase `func` into a stage function that keeps its output.
pub(crate) fn erase_function<F>(func: F) -> ErasedFn
where
    F: AsyncFunction + 'static,
    F::Input: Clone + Sync,
    F::Output: Sync,
{
    let func = Arc::new(func);
    Arc::new(move |value: Value, executor: &SharedExecutor| {
        let func = Arc::clone(&func);
        Promise::submit(executor, move || match take::<F::Input>(value) {
            Ok(input) => func.apply(input).map(&inline(), |output| Ok(wrap(output))),
            Err(e) => Promise::failed(e),
        })
    })
}

/// Erase `func` into a stage function whose output is dropped.
pub(crate) fn erase_side<F>(func: F) -> ErasedFn
where
    F: AsyncFunction + 'static,
    F::Input: Clone + Sync,
{
    let func = Arc::new(func);
    Arc::new(move |value: Value, executor: &SharedExecutor| {
        let func = Arc::clone(&func);
        Promise::submit(executor, move || match take::<F::Input>(value) {
            Ok(input) => func.apply(input).map(&inline(), |_| Ok(wrap(()))),
            Err(e) => Promise::failed(e),
        })
    })
}

/// How a gather stage treats branch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatherMode {
    /// Fail on the first branch failure and cancel the remaining branches.
    AllMustSucceed,
    /// Wait for every branch and report each outcome.
    BestEffort,
}

/// Payload-free view of a stage, used to inspect a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// One value in, one value out.
    Transform,
    /// Side branches; the value passes through unchanged.
    Fork,
    /// Fan-out to branches and fan-in of their results.
    Gather(GatherMode),
}

#[derive(Clone)]
pub(crate) enum Stage {
    Transform {
        func: ErasedFn,
        executor: Option<SharedExecutor>,
    },
    Fork {
        branches: Vec<ErasedFn>,
        executor: Option<SharedExecutor>,
    },
    Gather {
        branches: Vec<ErasedFn>,
        mode: GatherMode,
        assemble: Assemble,
        executor: Option<SharedExecutor>,
    },
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Stage").field(&self.kind()).finish()
    }
}

/// Work held back until every stage of a run has been attached.
pub(crate) type Deferred = Vec<Box<dyn FnOnce()>>;

/// Context shared by every stage of one pipeline.
pub(crate) struct Scope {
    pub(crate) name: Arc<str>,
    pub(crate) executor: SharedExecutor,
    pub(crate) telemetry: Option<Telemetry>,
}

impl Stage {
    pub(crate) fn kind(&self) -> StageKind {
        match self {
            Stage::Transform { .. } => StageKind::Transform,
            Stage::Fork { .. } => StageKind::Fork,
            Stage::Gather { mode, .. } => StageKind::Gather(*mode),
        }
    }

    pub(crate) fn bound_to(&self, executor: SharedExecutor) -> Stage {
        let mut stage = self.clone();
        match &mut stage {
            Stage::Transform { executor: slot, .. }
            | Stage::Fork { executor: slot, .. }
            | Stage::Gather { executor: slot, .. } => *slot = Some(executor),
        }
        stage
    }

    fn executor(&self, scope: &Scope) -> SharedExecutor {
        let bound = match self {
            Stage::Transform { executor, .. }
            | Stage::Fork { executor, .. }
            | Stage::Gather { executor, .. } => executor,
        };
        bound.clone().unwrap_or_else(|| Arc::clone(&scope.executor))
    }

    /// Attach this stage to `input`, returning the promise for its output.
    ///
    /// Fork branches are not attached here but pushed onto `deferred`, so
    /// they observe the value only after the rest of the main line has.
    pub(crate) fn run(
        &self,
        input: Promise<Value>,
        scope: &Arc<Scope>,
        deferred: &mut Deferred,
    ) -> Promise<Value> {
        let executor = self.executor(scope);
        match self {
            Stage::Transform { func, .. } => {
                let func = Arc::clone(func);
                input.and_then(&inline(), move |value| func(value, &executor))
            }
            Stage::Fork { branches, .. } => {
                let branches = branches.clone();
                let scope = Arc::clone(scope);
                let observed = input.clone();
                deferred.push(Box::new(move || {
                    observed.listen(move |outcome| {
                        let Ok(value) = outcome else {
                            return;
                        };
                        for branch in &branches {
                            let scope = Arc::clone(&scope);
                            branch(Value::clone(&value), &executor).listen(move |result| {
                                if let Err(error) = result {
                                    report_fork_failure(&scope, &error);
                                }
                            });
                        }
                    });
                }));
                input
            }
            Stage::Gather {
                branches,
                mode,
                assemble,
                ..
            } => {
                let branches = branches.clone();
                let mode = *mode;
                let assemble = Arc::clone(assemble);
                input.and_then(&inline(), move |value| {
                    let running: Vec<Promise<Value>> = branches
                        .iter()
                        .map(|branch| branch(Value::clone(&value), &executor))
                        .collect();
                    match mode {
                        GatherMode::AllMustSucceed => Promise::all(running).map(&inline(), move |values| {
                            assemble(values.into_iter().map(Ok).collect())
                        }),
                        GatherMode::BestEffort => {
                            Promise::settled(running).map(&inline(), move |outcomes| assemble(outcomes))
                        }
                    }
                })
            }
        }
    }
}

fn report_fork_failure(scope: &Scope, error: &Error) {
    if error.is_cancelled() {
        return;
    }
    tracing::warn!(pipeline = %scope.name, error = %error, "Fork branch failed");
    if let Some(telemetry) = &scope.telemetry {
        telemetry.update(|m| m.fork_failures += 1);
        telemetry.emit(ExecutionEvent::ForkFailed {
            pipeline: scope.name.to_string(),
            message: error.to_string(),
        });
    }
}

struct StageNode {
    stage: Stage,
    prev: Option<Arc<StageNode>>,
}

/// Append-only list of stages. Extending it shares the existing prefix.
#[derive(Clone, Default)]
pub(crate) struct StageList {
    tail: Option<Arc<StageNode>>,
    len: usize,
}

impl StageList {
    pub(crate) fn push(&self, stage: Stage) -> Self {
        Self {
            tail: Some(Arc::new(StageNode {
                stage,
                prev: self.tail.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// A list whose last stage is replaced by `f(last)`. `None` if empty.
    pub(crate) fn replace_last(&self, f: impl FnOnce(&Stage) -> Stage) -> Option<Self> {
        let last = self.tail.as_ref()?;
        Some(Self {
            tail: Some(Arc::new(StageNode {
                stage: f(&last.stage),
                prev: last.prev.clone(),
            })),
            len: self.len,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Stages in execution order.
    pub(crate) fn ordered(&self) -> Vec<&Stage> {
        let mut stages = Vec::with_capacity(self.len);
        let mut node = self.tail.as_deref();
        while let Some(current) = node {
            stages.push(&current.stage);
            node = current.prev.as_deref();
        }
        stages.reverse();
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_reports_type_mismatch() {
        let err = take::<String>(wrap(5_u32)).unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(msg) if msg.contains("String")));
    }

    #[test]
    fn test_take_clones_shared_value() {
        let value = wrap(vec![1, 2, 3]);
        let kept = Value::clone(&value);
        assert_eq!(take::<Vec<i32>>(value).unwrap(), vec![1, 2, 3]);
        assert_eq!(take::<Vec<i32>>(kept).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_stage_list_shares_prefix() {
        let noop: ErasedFn = Arc::new(|value: Value, _: &SharedExecutor| Promise::ready(value));
        let transform = Stage::Transform {
            func: noop,
            executor: None,
        };
        let base = StageList::default().push(transform.clone());
        let longer = base.push(Stage::Fork {
            branches: Vec::new(),
            executor: None,
        });
        assert_eq!(base.len(), 1);
        assert_eq!(longer.len(), 2);
        let kinds: Vec<StageKind> = longer.ordered().iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec![StageKind::Transform, StageKind::Fork]);
        assert!(StageList::default().replace_last(|s| s.clone()).is_none());
    }
}
