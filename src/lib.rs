//! # async-compose
//!
//! Composable asynchronous commands and pipelines with resilience policies.
//!
//! This crate provides building blocks for composing units of asynchronous
//! work: bounded execution time, retry, fallback values, sequential
//! chaining, and fan-out/fan-in, with every stage free to run on its own
//! execution context. It owns no threads and no clock; both are pluggable.
//!
//! ## Core Concepts
//!
//! - **Promise**: A single-assignment, cancellable, awaitable result handle
//! - **Executor**: Where continuations run (`Inline`, `TokioExecutor`)
//! - **AsyncFunction**: The one capability shared by commands and pipelines
//! - **Command**: An `AsyncFunction` that takes no input
//! - **DecoratedCommand**: A computation wrapped in timeout, retry and fallback
//! - **CommandChain**: Commands run strictly one after another
//! - **Pipeline**: Typed stages with fork and gather
//! - **FluentFuture**: Chainable operators over a promise
//! - **Telemetry**: Shared metrics and trace log
//!
//! ## Example: Resilient Command Feeding a Pipeline
//!
//! ```rust
//! use async_compose::{AsyncFunction, AsyncFunctionExt, DecoratedCommand, Pipeline, RetryConfig};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let fetch = DecoratedCommand::builder()
//!     .computation(|| async { Ok::<_, async_compose::Error>(vec![3, 1, 2]) })
//!     .timeout(Duration::from_secs(1))
//!     .retry(RetryConfig::new().with_max_attempts(3))
//!     .fallback_value(Vec::new())
//!     .build()
//!     .unwrap();
//!
//! let summarize = Pipeline::new()
//!     .map(|mut values: Vec<i32>| {
//!         values.sort();
//!         values
//!     })
//!     .gather_all(vec![
//!         Pipeline::new().map(|v: Vec<i32>| v.iter().sum::<i32>()),
//!         Pipeline::new().map(|v: Vec<i32>| v.len() as i32),
//!     ]);
//!
//! let values = fetch.call_blocking(()).unwrap();
//! assert_eq!(summarize.apply(values).await.unwrap(), vec![6, 3]);
//! # });
//! ```

pub mod error;
pub mod executor;
pub mod promise;
pub mod timer;
pub mod retry;
pub mod function;
pub mod command;
pub mod pipeline;
pub mod adapters;
pub mod fluent;
pub mod telemetry;
pub mod metrics;
pub mod events;
pub mod instrumented;

pub use error::{Error, Result};
pub use executor::{inline, Executor, Inline, Job, SharedExecutor, TokioExecutor};
pub use promise::Promise;
pub use timer::{OnTimeout, Timer, TokioTimer};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use function::{AsyncFunction, AsyncFunctionExt, Command, LambdaFunction};
pub use adapters::{BoundInput, Discard, IgnoreInput};
pub use fluent::FluentFuture;
pub use telemetry::Telemetry;
pub use metrics::ExecutionMetrics;
pub use events::{ExecutionEvent, TraceEntry};
pub use instrumented::InstrumentedFunction;

// Re-export command and pipeline types
pub use command::{CommandBuilder, DecoratedCommand, Decorator, DecoratorKind};
pub use command::chain::{CommandChain, CommandChainBuilder};
pub use pipeline::{GatherMode, Pipeline, StageKind};
