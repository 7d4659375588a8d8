// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Shared outcome record between controller and worker.
//!
//! Single writer per field: the worker flips `started`, writes the result,
//! then flips `completed`. The controller only reads, except after it has
//! reaped a terminated worker, when no other writer can exist.
//! `completed` is the release/acquire edge that publishes the result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use crate::error::WorkerFailure;
use crate::latch::Latch;

/// Native exit status reported for a failed worker.
pub const FAILURE_EXIT_CODE: i32 = -1;

/// What the worker produced.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The callback returned this code.
    Returned(i32),
    /// The callback panicked or returned an error.
    Failed(WorkerFailure),
    /// The worker was forcibly terminated with this code.
    Terminated(i32),
}

impl Outcome {
    /// Exit status handed back to the OS by the worker thread.
    pub fn native_code(&self) -> i32 {
        match self {
            Outcome::Returned(code) | Outcome::Terminated(code) => *code,
            Outcome::Failed(_) => FAILURE_EXIT_CODE,
        }
    }
}

/// Cross-thread record of start/completion and the worker's result.
#[derive(Debug, Default)]
pub struct SharedOutcome {
    started: AtomicBool,
    completed: AtomicBool,
    start_latch: Latch,
    result: OnceLock<Outcome>,
}

impl SharedOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// The stored result. `None` until `completed` has been observed.
    pub fn result(&self) -> Option<&Outcome> {
        if !self.is_completed() {
            return None;
        }
        self.result.get()
    }

    /// Worker side: called first thing on the worker thread.
    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
        self.start_latch.open();
    }

    /// Controller side: block until the worker has entered.
    pub(crate) fn wait_started(&self) {
        self.start_latch.wait();
    }

    /// Worker side: publish the result, then flip `completed`.
    pub(crate) fn finish(&self, outcome: Outcome) {
        let _ = self.result.set(outcome);
        self.completed.store(true, Ordering::Release);
    }

    /// Controller side, after a terminated worker has been reaped.
    ///
    /// Returns `false` when the worker had already stored its own result.
    pub(crate) fn record_termination(&self, code: i32) -> bool {
        let recorded = self.result.set(Outcome::Terminated(code)).is_ok();
        self.completed.store(true, Ordering::Release);
        recorded
    }
}
