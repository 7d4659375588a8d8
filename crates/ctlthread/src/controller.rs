// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Thread state machine.
//!
//! ```text
//!   Created ──start──> Running <──suspend/resume──> Suspended
//!                         │                            │
//!                         ├── body returns ──> Completed ──join──> Joined
//!                         └──────── terminate ────────┴──> Terminated
//! ```
//!
//! `ThreadController` owns the native handle and one reference to the
//! `SharedOutcome`; the worker trampoline holds the other.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{Result, ThreadError, WorkerFailure};
use crate::native::{self, NativeThreadHandle, Parking};
use crate::options::ThreadOptions;
use crate::outcome::{Outcome, SharedOutcome};
use crate::priority::Priority;
use crate::work::Work;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created suspended; `start()` not called yet.
    Created,
    Running,
    Suspended,
    /// The body finished; not yet joined.
    Completed,
    Joined,
    /// Forcibly ended by `terminate()`.
    Terminated,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThreadState::Created => "created",
            ThreadState::Running => "running",
            ThreadState::Suspended => "suspended",
            ThreadState::Completed => "completed",
            ThreadState::Joined => "joined",
            ThreadState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Runs on the worker thread: flag start, run the work, publish the result.
fn run_worker(outcome: Arc<SharedOutcome>, work: Work) -> i32 {
    outcome.mark_started();
    let result = match panic::catch_unwind(AssertUnwindSafe(move || work.run())) {
        Ok(Ok(code)) => Outcome::Returned(code),
        Ok(Err(failure)) => Outcome::Failed(failure),
        Err(payload) => Outcome::Failed(WorkerFailure::from_panic(payload)),
    };
    let code = result.native_code();
    // No control signal reaches this thread past here.
    native::seal_current();
    outcome.finish(result);
    code
}

/// Owns one native thread and enforces legal transitions on it.
#[derive(Debug)]
pub struct ThreadController {
    handle: NativeThreadHandle,
    outcome: Arc<SharedOutcome>,
    suspended: bool,
    joined: bool,
    name: Option<String>,
}

impl ThreadController {
    /// Create the worker suspended. Applies `options.priority` before returning.
    pub fn create(work: Work, options: &ThreadOptions) -> Result<Self> {
        let outcome = Arc::new(SharedOutcome::new());
        let worker_outcome = outcome.clone();
        let handle = NativeThreadHandle::spawn_suspended(
            options,
            Box::new(move || run_worker(worker_outcome, work)),
        )
        .map_err(|e| ThreadError::runtime("create thread", e))?;

        let mut controller = Self {
            handle,
            outcome,
            suspended: false,
            joined: false,
            name: options.name.clone(),
        };
        if let Some(priority) = options.priority {
            controller.set_priority(priority)?;
        }
        debug!(tid = controller.native_id(), thread_name = ?controller.name, "thread created");
        Ok(controller)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Kernel thread id of the worker.
    pub fn native_id(&self) -> i32 {
        self.handle.tid()
    }

    /// Status the OS thread returned, once joined. `None` after `terminate`.
    pub fn native_exit_status(&self) -> Option<i32> {
        self.handle.exit_status()
    }

    pub fn is_started(&self) -> bool {
        self.outcome.is_started()
    }

    pub fn is_running(&self) -> bool {
        self.is_started() && !self.suspended && !self.is_completed()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_completed(&self) -> bool {
        self.outcome.is_completed()
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn state(&self) -> ThreadState {
        if let Some(Outcome::Terminated(_)) = self.outcome.result() {
            return ThreadState::Terminated;
        }
        if self.joined {
            ThreadState::Joined
        } else if self.is_completed() {
            ThreadState::Completed
        } else if self.suspended {
            ThreadState::Suspended
        } else if self.is_started() {
            ThreadState::Running
        } else {
            ThreadState::Created
        }
    }

    /// Legal before `start()` and while suspended.
    pub fn set_priority(&mut self, priority: Priority) -> Result<()> {
        if self.joined {
            return Err(ThreadError::Usage("cannot set priority on a joined thread"));
        }
        if self.is_completed() {
            return Err(ThreadError::Exited("cannot set priority on a completed thread"));
        }
        if self.is_running() {
            return Err(ThreadError::Usage("cannot set priority on a running thread"));
        }
        if priority.is_real_time() {
            return Err(ThreadError::Usage("real-time priority is not supported"));
        }
        self.handle
            .set_priority(priority)
            .map_err(|e| ThreadError::runtime("set thread priority", e))
    }

    /// Release the worker and block until it has entered its body.
    pub fn start(&mut self) -> Result<()> {
        if self.is_started() {
            return Err(ThreadError::Usage("cannot start a thread more than once"));
        }
        self.handle
            .release()
            .map_err(|e| ThreadError::runtime("start thread", e))?;
        self.outcome.wait_started();
        debug!(tid = self.native_id(), "thread started");
        Ok(())
    }

    pub fn suspend(&mut self) -> Result<()> {
        if !self.is_started() {
            return Err(ThreadError::Usage("cannot suspend a thread that was never started"));
        }
        if self.is_completed() {
            return Err(ThreadError::Exited("cannot suspend a completed thread"));
        }
        if self.suspended {
            return Err(ThreadError::Usage("thread is already suspended"));
        }
        let parking = self
            .handle
            .suspend()
            .map_err(|e| ThreadError::runtime("suspend thread", e))?;
        if parking == Parking::Sealed {
            return Err(ThreadError::Exited("cannot suspend a completed thread"));
        }
        // The body may have finished just before the worker parked.
        if self.is_completed() {
            self.handle
                .resume()
                .map_err(|e| ThreadError::runtime("resume thread", e))?;
            return Err(ThreadError::Exited("cannot suspend a completed thread"));
        }
        self.suspended = true;
        trace!(tid = self.native_id(), "thread suspended");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if !self.is_started() {
            return Err(ThreadError::Usage("cannot resume a thread that was never started"));
        }
        if self.is_completed() {
            return Err(ThreadError::Exited("cannot resume a completed thread"));
        }
        if !self.suspended {
            return Err(ThreadError::Usage("cannot resume a thread that is not suspended"));
        }
        self.handle
            .resume()
            .map_err(|e| ThreadError::runtime("resume thread", e))?;
        self.suspended = false;
        trace!(tid = self.native_id(), "thread resumed");
        Ok(())
    }

    /// Forcibly end the worker.
    ///
    /// Abrupt: the worker's destructors do not run and anything it held
    /// (locks, allocations) stays held. The result becomes
    /// `Outcome::Terminated(code)` unless the body had already finished.
    pub fn terminate(&mut self, code: i32) -> Result<()> {
        if !self.is_started() {
            return Err(ThreadError::Usage("cannot terminate a thread that was never started"));
        }
        if self.joined || self.is_completed() {
            return Err(ThreadError::Exited("cannot terminate a completed thread"));
        }
        self.handle
            .terminate()
            .map_err(|e| ThreadError::runtime("terminate thread", e))?;
        self.suspended = false;
        self.joined = true;
        if self.outcome.record_termination(code) {
            warn!(tid = self.native_id(), code, "thread terminated");
        } else {
            debug!(tid = self.native_id(), "thread completed before termination took effect");
        }
        Ok(())
    }

    /// Wait up to `timeout` for the worker to end.
    ///
    /// A suspended worker is resumed first and stays resumed if the wait
    /// times out. Returns `false` on timeout; joining can be retried.
    pub fn try_join(&mut self, timeout: Duration) -> Result<bool> {
        self.join_inner(Some(timeout))
    }

    /// Block until the worker ends.
    pub fn join(&mut self) -> Result<()> {
        self.join_inner(None).map(|_| ())
    }

    fn join_inner(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.joined {
            return Err(ThreadError::Usage("thread was already joined"));
        }
        if !self.is_started() {
            return Err(ThreadError::Usage("cannot join a thread that was never started"));
        }
        if self.suspended {
            self.resume()?;
        }
        let done = self
            .handle
            .wait(timeout)
            .map_err(|e| ThreadError::runtime("join thread", e))?;
        if done {
            self.joined = true;
            debug!(tid = self.native_id(), "thread joined");
        }
        Ok(done)
    }

    /// The worker's exit code. Re-raises a captured worker failure, every time.
    pub fn exit_code(&self) -> Result<i32> {
        if !self.joined {
            return Err(ThreadError::Usage("cannot get the exit code before joining"));
        }
        match self.outcome.result() {
            Some(Outcome::Returned(code)) => Ok(*code),
            Some(Outcome::Failed(failure)) => Err(ThreadError::Worker(failure.clone())),
            Some(Outcome::Terminated(code)) => Err(ThreadError::Terminated { code: *code }),
            None => Err(ThreadError::Usage("thread has not completed")),
        }
    }

    /// The raw outcome, once completed.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.result()
    }
}
