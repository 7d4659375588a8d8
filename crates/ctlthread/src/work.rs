// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The work item a worker thread runs.
//!
//! A callback plus its argument, captured once at creation and moved to the
//! worker. An exit code of 0 conventionally means success.

use std::fmt;

use crate::error::WorkerFailure;

/// Plain callback taking one argument and returning an exit code.
pub type Callback<T> = fn(T) -> i32;

type Body = Box<dyn FnOnce() -> Result<i32, WorkerFailure> + Send + 'static>;

/// A callback bound to its argument, ready to run on a worker.
pub struct Work {
    body: Body,
}

impl Work {
    /// Wrap a closure returning an exit code.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        Self {
            body: Box::new(move || Ok(f())),
        }
    }

    /// Bind a plain callback to the argument it will receive.
    pub fn with_arg<T>(callback: Callback<T>, arg: T) -> Self
    where
        T: Send + 'static,
    {
        Self::new(move || callback(arg))
    }

    /// Wrap a closure that may fail. An `Err` is captured and re-raised
    /// from `exit_code()`.
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<i32, E> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self {
            body: Box::new(move || f().map_err(|e| WorkerFailure::from_error(e.into()))),
        }
    }

    /// Run on the current thread. Panics are not caught here.
    pub(crate) fn run(self) -> Result<i32, WorkerFailure> {
        (self.body)()
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn double(x: i32) -> i32 {
        x * 2
    }

    #[test]
    fn closure_code() {
        assert_eq!(Work::new(|| 5).run().unwrap(), 5);
    }

    #[test]
    fn callback_with_arg() {
        assert_eq!(Work::with_arg(double, 21).run().unwrap(), 42);
    }

    #[test]
    fn fallible_error_is_captured() {
        let work = Work::fallible(|| -> Result<i32, String> { Err("no device".into()) });
        let failure = work.run().unwrap_err();
        assert_eq!(failure.kind(), FailureKind::Error);
        assert_eq!(failure.message(), "no device");
    }

    #[test]
    fn fallible_ok() {
        let work = Work::fallible(|| -> Result<i32, std::io::Error> { Ok(0) });
        assert_eq!(work.run().unwrap(), 0);
    }
}
