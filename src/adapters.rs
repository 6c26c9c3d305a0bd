//! Conversions between the command shape (no input) and the function shape
//! (explicit input).
//!
//! Adapters never swallow or re-wrap failures: the promise they return
//! settles exactly as the wrapped promise does.

use std::marker::PhantomData;

use crate::executor::inline;
use crate::{AsyncFunction, Command, Promise};

/// A command used as a function: the input is ignored.
///
/// Constructed via [`AsyncFunctionExt::ignore_input`](crate::AsyncFunctionExt::ignore_input).
///
/// # Example
///
/// ```rust
/// use async_compose::{AsyncFunction, AsyncFunctionExt, LambdaFunction};
///
/// let ping = LambdaFunction::new(|_: ()| async { Ok::<_, async_compose::Error>("pong") });
/// let as_function = ping.ignore_input::<u32>();
/// assert_eq!(as_function.apply(7).wait().unwrap(), "pong");
/// ```
pub struct IgnoreInput<C, I> {
    command: C,
    _input: PhantomData<fn(I)>,
}

impl<C, I> IgnoreInput<C, I> {
    /// Wrap `command`.
    pub fn new(command: C) -> Self {
        Self {
            command,
            _input: PhantomData,
        }
    }

    /// Access the inner command.
    pub fn inner(&self) -> &C {
        &self.command
    }
}

impl<C, I> AsyncFunction for IgnoreInput<C, I>
where
    C: Command,
    I: Send + 'static,
{
    type Input = I;
    type Output = C::Output;

    fn apply(&self, _input: I) -> Promise<C::Output> {
        self.command.execute()
    }

    fn name(&self) -> &str {
        self.command.name()
    }
}

/// A function with a fixed input, used as a command.
///
/// Constructed via [`AsyncFunctionExt::bind`](crate::AsyncFunctionExt::bind).
/// The bound input is cloned into every execution.
pub struct BoundInput<F: AsyncFunction> {
    function: F,
    input: F::Input,
}

impl<F: AsyncFunction> BoundInput<F> {
    /// Bind `input` to `function`.
    pub fn new(function: F, input: F::Input) -> Self {
        Self { function, input }
    }

    /// Access the bound input.
    pub fn input(&self) -> &F::Input {
        &self.input
    }
}

impl<F> AsyncFunction for BoundInput<F>
where
    F: AsyncFunction,
    F::Input: Clone + Sync,
{
    type Input = ();
    type Output = F::Output;

    fn apply(&self, _input: ()) -> Promise<F::Output> {
        self.function.apply(self.input.clone())
    }

    fn name(&self) -> &str {
        self.function.name()
    }
}

/// A function whose output is replaced by `()`.
///
/// Used to chain commands with different output types.
pub struct Discard<F> {
    function: F,
}

impl<F> Discard<F> {
    /// Wrap `function`.
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<F: AsyncFunction> AsyncFunction for Discard<F> {
    type Input = F::Input;
    type Output = ();

    fn apply(&self, input: F::Input) -> Promise<()> {
        self.function.apply(input).map(&inline(), |_| Ok(()))
    }

    fn name(&self) -> &str {
        self.function.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AsyncFunctionExt, Error, LambdaFunction};

    #[test]
    fn test_bound_input_preserves_failure() {
        let check = LambdaFunction::new(|x: i32| async move {
            if x < 0 {
                Err(Error::execution("negative"))
            } else {
                Ok(x)
            }
        });
        let command = check.bind(-1);
        assert_eq!(
            command.execute().wait().unwrap_err(),
            Error::execution("negative")
        );
        assert_eq!(*command.input(), -1);
    }

    #[test]
    fn test_round_trip_through_both_adapters() {
        let square = LambdaFunction::new(|x: i64| async move { Ok::<i64, Error>(x * x) });
        let command = square.bind(9);
        let function = command.ignore_input::<String>();
        assert_eq!(function.apply("ignored".to_string()).wait().unwrap(), 81);
    }

    #[test]
    fn test_discard_keeps_failure() {
        let failing = LambdaFunction::new(|_: ()| async { Err::<u8, Error>(Error::from("nope")) });
        let discarded = failing.discard();
        assert_eq!(discarded.execute().wait().unwrap_err(), Error::from("nope"));
    }
}
