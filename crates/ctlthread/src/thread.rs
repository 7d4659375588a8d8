// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Move-only thread handle.
//!
//! `Thread` owns zero or one [`ThreadController`] and forwards every
//! operation to it. Dropping a `Thread` joins its worker (best effort);
//! `detach()` gives the worker up without waiting.

use std::time::Duration;

use tracing::debug;

use crate::controller::{ThreadController, ThreadState};
use crate::error::{Result, ThreadError};
use crate::options::ThreadOptions;
use crate::outcome::Outcome;
use crate::priority::Priority;
use crate::work::Work;

/// Handle to one controlled worker thread, or to none.
///
/// ```no_run
/// use ctlthread::{Priority, Thread, Work};
///
/// let mut t = Thread::with_work(Work::new(|| 42))?;
/// t.set_priority(Priority::High)?;
/// t.start()?;
/// t.join()?;
/// assert_eq!(t.exit_code()?, 42);
/// # Ok::<(), ctlthread::ThreadError>(())
/// ```
#[derive(Debug, Default)]
pub struct Thread {
    controller: Option<ThreadController>,
}

impl Thread {
    /// An empty handle with no worker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a suspended worker for `work`.
    pub fn with_work(work: Work) -> Result<Self> {
        Self::with_options(&ThreadOptions::default(), work)
    }

    pub fn with_options(options: &ThreadOptions, work: Work) -> Result<Self> {
        let mut thread = Self::new();
        thread.create_with(options, work)?;
        Ok(thread)
    }

    /// Create and start a worker running `f`.
    pub fn spawn<F>(f: F) -> Result<Self>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let mut thread = Self::with_work(Work::new(f))?;
        thread.start()?;
        Ok(thread)
    }

    /// Create a suspended worker. Fails if this handle already owns one.
    pub fn create(&mut self, work: Work) -> Result<()> {
        self.create_with(&ThreadOptions::default(), work)
    }

    pub fn create_with(&mut self, options: &ThreadOptions, work: Work) -> Result<()> {
        if self.controller.is_some() {
            return Err(ThreadError::Usage("cannot create on top of an existing thread"));
        }
        self.controller = Some(ThreadController::create(work, options)?);
        Ok(())
    }

    /// Whether this handle owns a worker.
    pub fn is_attached(&self) -> bool {
        self.controller.is_some()
    }

    fn controller(&self, what: &'static str) -> Result<&ThreadController> {
        self.controller.as_ref().ok_or(ThreadError::Usage(what))
    }

    fn controller_mut(&mut self, what: &'static str) -> Result<&mut ThreadController> {
        self.controller.as_mut().ok_or(ThreadError::Usage(what))
    }

    pub fn set_priority(&mut self, priority: Priority) -> Result<()> {
        self.controller_mut("cannot set priority without a thread")?
            .set_priority(priority)
    }

    pub fn start(&mut self) -> Result<()> {
        self.controller_mut("cannot start without a thread")?.start()
    }

    pub fn suspend(&mut self) -> Result<()> {
        self.controller_mut("cannot suspend without a thread")?.suspend()
    }

    pub fn resume(&mut self) -> Result<()> {
        self.controller_mut("cannot resume without a thread")?.resume()
    }

    /// Forcibly end the worker, then release it. See
    /// [`ThreadController::terminate`] for what this leaves behind.
    pub fn terminate(&mut self, code: i32) -> Result<()> {
        self.controller_mut("cannot terminate without a thread")?
            .terminate(code)?;
        self.controller = None;
        Ok(())
    }

    pub fn join(&mut self) -> Result<()> {
        self.controller_mut("cannot join without a thread")?.join()
    }

    pub fn try_join(&mut self, timeout: Duration) -> Result<bool> {
        self.controller_mut("cannot join without a thread")?
            .try_join(timeout)
    }

    pub fn exit_code(&self) -> Result<i32> {
        self.controller("cannot get exit code without a thread")?
            .exit_code()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.controller.as_ref().and_then(ThreadController::outcome)
    }

    /// Give up the worker without joining it.
    pub fn detach(&mut self) {
        if let Some(controller) = self.controller.take() {
            debug!(tid = controller.native_id(), "thread detached");
        }
    }

    /// Give up the worker and hand back its controller.
    pub fn into_controller(mut self) -> Option<ThreadController> {
        self.controller.take()
    }

    pub fn started(&self) -> bool {
        self.controller.as_ref().is_some_and(ThreadController::is_started)
    }

    pub fn running(&self) -> bool {
        self.controller.as_ref().is_some_and(ThreadController::is_running)
    }

    pub fn suspended(&self) -> bool {
        self.controller.as_ref().is_some_and(ThreadController::is_suspended)
    }

    pub fn completed(&self) -> bool {
        self.controller.as_ref().is_some_and(ThreadController::is_completed)
    }

    /// `None` when no worker is owned.
    pub fn state(&self) -> Option<ThreadState> {
        self.controller.as_ref().map(ThreadController::state)
    }

    pub fn native_id(&self) -> Option<i32> {
        self.controller.as_ref().map(ThreadController::native_id)
    }
}

impl From<ThreadController> for Thread {
    fn from(controller: ThreadController) -> Self {
        Self {
            controller: Some(controller),
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        let Some(mut controller) = self.controller.take() else {
            return;
        };
        if controller.is_joined() {
            return;
        }
        if let Err(err) = controller.join() {
            debug!(tid = controller.native_id(), error = %err, "join on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_handle_rejects_everything() {
        let mut t = Thread::new();
        assert!(!t.is_attached());
        assert_eq!(t.start().unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(t.suspend().unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(t.resume().unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(t.join().unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(t.try_join(Duration::ZERO).unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(t.terminate(0).unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(t.exit_code().unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(
            t.set_priority(Priority::Normal).unwrap_err().kind(),
            ErrorKind::Usage
        );
        assert!(!t.started() && !t.running() && !t.suspended() && !t.completed());
        assert_eq!(t.state(), None);
        t.detach();
    }

    #[test]
    fn create_twice() {
        let mut t = Thread::with_work(Work::new(|| 0)).unwrap();
        assert_eq!(t.create(Work::new(|| 1)).unwrap_err().kind(), ErrorKind::Usage);
        t.start().unwrap();
    }

    #[test]
    fn spawn_and_join() {
        let mut t = Thread::spawn(|| 5).unwrap();
        assert!(t.started());
        t.join().unwrap();
        assert_eq!(t.exit_code().unwrap(), 5);
        assert!(matches!(t.outcome(), Some(Outcome::Returned(5))));
    }

    #[test]
    fn drop_of_unstarted_thread_does_not_block() {
        let t = Thread::with_work(Work::new(|| 0)).unwrap();
        assert_eq!(t.state(), Some(ThreadState::Created));
        drop(t);
    }

    #[test]
    fn terminate_releases_controller() {
        let mut t = Thread::spawn(|| loop {
            std::thread::sleep(Duration::from_millis(1));
        })
        .unwrap();
        t.terminate(4).unwrap();
        assert!(!t.is_attached());
        assert_eq!(t.join().unwrap_err().kind(), ErrorKind::Usage);
    }

    #[test]
    fn controller_round_trip() {
        let t = Thread::with_work(Work::new(|| 8)).unwrap();
        let controller = t.into_controller().unwrap();
        let mut t = Thread::from(controller);
        t.start().unwrap();
        t.join().unwrap();
        assert_eq!(t.exit_code().unwrap(), 8);
    }
}
