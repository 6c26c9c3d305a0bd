//! Function composition pipelines.
//!
//! A [`Pipeline<I, O>`] is an immutable list of stages that turns an `I`
//! into an `O`. Every builder call returns a new pipeline sharing the
//! unchanged prefix with the old one, so a partially built pipeline can be
//! extended in several directions. Nothing runs until
//! [`apply`](AsyncFunction::apply) or [`build_from`](Pipeline::build_from).
//!
//! Values crossing a stage boundary must be `Clone + Send + Sync + 'static`.

mod stage;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

pub use stage::{GatherMode, StageKind};
use stage::{
    erase_function, erase_side, take, wrap, Assemble, Deferred, ErasedFn, Scope, Stage, StageList, Value,
};

use crate::executor::{inline, SharedExecutor};
use crate::{AsyncFunction, Promise, Result, Telemetry};

/// A typed chain of stages from `I` to `O`.
///
/// # Example
///
/// ```rust
/// use async_compose::{AsyncFunction, Pipeline};
///
/// # tokio_test::block_on(async {
/// let pipeline = Pipeline::new()
///     .map(|text: String| text.trim().to_string())
///     .then(|text: String| async move { Ok::<_, async_compose::Error>(text.len()) })
///     .map(|len: usize| len * 2);
///
/// assert_eq!(pipeline.apply("  four ".to_string()).await.unwrap(), 8);
/// # });
/// ```
pub struct Pipeline<I, O> {
    stages: StageList,
    executor: SharedExecutor,
    name: Arc<str>,
    telemetry: Option<Telemetry>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Pipeline<I, O> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
            executor: Arc::clone(&self.executor),
            name: Arc::clone(&self.name),
            telemetry: self.telemetry.clone(),
            _types: PhantomData,
        }
    }
}

impl<I: Clone + Send + Sync + 'static> Default for Pipeline<I, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Clone + Send + Sync + 'static> Pipeline<I, I> {
    /// An empty pipeline whose stages run [`inline`](crate::inline) unless
    /// bound elsewhere.
    pub fn new() -> Self {
        Self::with_executor(inline())
    }

    /// An empty pipeline whose stages run on `executor` unless bound
    /// elsewhere.
    pub fn with_executor(executor: SharedExecutor) -> Self {
        Self {
            stages: StageList::default(),
            executor,
            name: Arc::from("pipeline"),
            telemetry: None,
            _types: PhantomData,
        }
    }
}

impl<I, O> Pipeline<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn extend<Y>(&self, stage: Stage) -> Pipeline<I, Y> {
        Pipeline {
            stages: self.stages.push(stage),
            executor: Arc::clone(&self.executor),
            name: Arc::clone(&self.name),
            telemetry: self.telemetry.clone(),
            _types: PhantomData,
        }
    }

    fn transform<Y>(&self, func: ErasedFn) -> Pipeline<I, Y> {
        self.extend(Stage::Transform {
            func,
            executor: None,
        })
    }

    /// Append a synchronous transformation.
    pub fn map<Y, F>(&self, f: F) -> Pipeline<I, Y>
    where
        Y: Clone + Send + Sync + 'static,
        F: Fn(O) -> Y + Send + Sync + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Append a synchronous transformation that may fail.
    pub fn try_map<Y, F>(&self, f: F) -> Pipeline<I, Y>
    where
        Y: Clone + Send + Sync + 'static,
        F: Fn(O) -> Result<Y> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.transform(Arc::new(move |value: Value, executor: &SharedExecutor| {
            let f = Arc::clone(&f);
            Promise::submit(executor, move || {
                Promise::from_result(take::<O>(value).and_then(|v| (*f)(v)).map(wrap))
            })
        }))
    }

    /// Append an asynchronous transformation.
    pub fn then<Y, F, Fut>(&self, f: F) -> Pipeline<I, Y>
    where
        Y: Clone + Send + Sync + 'static,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Y>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.transform(Arc::new(move |value: Value, executor: &SharedExecutor| {
            let f = Arc::clone(&f);
            Promise::spawn(executor, async move {
                let input = take::<O>(value)?;
                (*f)(input).await.map(wrap)
            })
        }))
    }

    /// Append any [`AsyncFunction`] taking this pipeline's output.
    pub fn then_apply<F>(&self, func: F) -> Pipeline<I, F::Output>
    where
        F: AsyncFunction<Input = O> + 'static,
        F::Output: Sync,
    {
        self.transform(erase_function(func))
    }

    /// Run the most recently added stage on `executor`. On an empty
    /// pipeline this sets the default executor instead.
    pub fn on(&self, executor: SharedExecutor) -> Pipeline<I, O> {
        let mut next = self.clone();
        match self.stages.replace_last(|last| last.bound_to(Arc::clone(&executor))) {
            Some(stages) => next.stages = stages,
            None => next.executor = executor,
        }
        next
    }

    /// Attach `func` as a side branch. The value flows on unchanged, and a
    /// failing branch never affects the main line.
    ///
    /// Branches start only after every later stage has seen the value, and
    /// cancelling the pipeline's result does not cancel them. On the inline
    /// executor a branch still runs on the thread that produced the value,
    /// so bind blocking branches elsewhere with [`on`](Pipeline::on).
    pub fn fork<F>(&self, func: F) -> Pipeline<I, O>
    where
        F: AsyncFunction<Input = O> + 'static,
    {
        self.fork_each(std::iter::once(func))
    }

    /// Attach every function as a side branch of one fork stage.
    pub fn fork_each<F, It>(&self, functions: It) -> Pipeline<I, O>
    where
        F: AsyncFunction<Input = O> + 'static,
        It: IntoIterator<Item = F>,
    {
        self.extend(Stage::Fork {
            branches: functions.into_iter().map(erase_side).collect(),
            executor: None,
        })
    }

    /// Run every function on a copy of the value and succeed with their
    /// outputs in order. The first failure fails the stage and cancels the
    /// other branches.
    pub fn gather_all<F, It>(&self, functions: It) -> Pipeline<I, Vec<F::Output>>
    where
        F: AsyncFunction<Input = O> + 'static,
        F::Output: Sync,
        It: IntoIterator<Item = F>,
    {
        let assemble: Assemble = Arc::new(|outcomes: Vec<Result<Value>>| {
            let values = outcomes
                .into_iter()
                .map(|outcome| outcome.and_then(take::<F::Output>))
                .collect::<Result<Vec<_>>>()?;
            Ok(wrap(values))
        });
        self.gather(functions, GatherMode::AllMustSucceed, assemble)
    }

    /// Run every function on a copy of the value and succeed, once all have
    /// settled, with each outcome in order.
    pub fn gather_settled<F, It>(&self, functions: It) -> Pipeline<I, Vec<Result<F::Output>>>
    where
        F: AsyncFunction<Input = O> + 'static,
        F::Output: Sync,
        It: IntoIterator<Item = F>,
    {
        let assemble: Assemble = Arc::new(|outcomes: Vec<Result<Value>>| {
            let results: Vec<Result<F::Output>> = outcomes
                .into_iter()
                .map(|outcome| outcome.and_then(take::<F::Output>))
                .collect();
            Ok(wrap(results))
        });
        self.gather(functions, GatherMode::BestEffort, assemble)
    }

    fn gather<F, It, Y>(&self, functions: It, mode: GatherMode, assemble: Assemble) -> Pipeline<I, Y>
    where
        F: AsyncFunction<Input = O> + 'static,
        F::Output: Sync,
        It: IntoIterator<Item = F>,
    {
        self.extend(Stage::Gather {
            branches: functions.into_iter().map(erase_function).collect(),
            mode,
            assemble,
            executor: None,
        })
    }

    /// Label the pipeline in logs and telemetry.
    pub fn named(&self, name: impl Into<String>) -> Pipeline<I, O> {
        let mut next = self.clone();
        next.name = Arc::from(name.into());
        next
    }

    /// Report fork failures into `telemetry`.
    pub fn with_telemetry(&self, telemetry: Telemetry) -> Pipeline<I, O> {
        let mut next = self.clone();
        next.telemetry = Some(telemetry);
        next
    }

    /// The stages in execution order.
    pub fn stages(&self) -> Vec<StageKind> {
        self.stages.ordered().into_iter().map(Stage::kind).collect()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.len() == 0
    }

    /// Run the pipeline on the eventual value of `start`.
    ///
    /// If `start` fails, no stage runs and the result fails with the same
    /// error. Cancelling the result cancels whichever stage is in flight.
    pub fn build_from(&self, start: Promise<I>) -> Promise<O> {
        let scope = Arc::new(Scope {
            name: Arc::clone(&self.name),
            executor: Arc::clone(&self.executor),
            telemetry: self.telemetry.clone(),
        });
        let mut deferred = Deferred::new();
        let mut current = start.map(&inline(), |value| Ok(wrap(value)));
        for stage in self.stages.ordered() {
            current = stage.run(current, &scope, &mut deferred);
        }
        let result = current.map(&inline(), take::<O>);
        for attach in deferred {
            attach();
        }
        result
    }
}

impl<I, O> AsyncFunction for Pipeline<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    type Input = I;
    type Output = O;

    fn apply(&self, input: I) -> Promise<O> {
        self.build_from(Promise::ready(input))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
