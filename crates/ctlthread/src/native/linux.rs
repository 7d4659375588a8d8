// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Linux port: pthreads held at a start gate.
//!
//! `pthread_create` cannot start a thread suspended, so the worker announces
//! its kernel tid and then blocks on a gate until the controller releases
//! (or abandons) it. Priority is a per-thread nice value applied through the
//! tid. Suspend/resume/terminate use the signals in `signals.rs`.

use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use libc::{c_int, c_void};
use tracing::{debug, trace, warn};

use super::signals::{self, ParkCell};
use super::Body;
use crate::latch::Latch;
use crate::options::ThreadOptions;
use crate::priority::Priority;

/// `pthread_setname_np` limit on Linux, excluding the NUL.
const MAX_NAME_LEN: usize = 15;

const NICE_MIN: c_int = -20;
const NICE_MAX: c_int = 19;

/// Nice offset from the worker's inherited nice for each level.
/// `RealTime` has no mapping.
fn nice_offset(priority: Priority) -> Option<c_int> {
    match priority {
        Priority::Lowest => Some(19),
        Priority::Low => Some(10),
        Priority::Normal => Some(0),
        Priority::High => Some(-5),
        Priority::Highest => Some(-10),
        Priority::RealTime => None,
    }
}

fn thread_nice(tid: libc::pid_t) -> io::Result<c_int> {
    // getpriority may legitimately return -1; only errno tells failure apart.
    // SAFETY: errno is thread-local.
    unsafe { *libc::__errno_location() = 0 };
    let nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, tid as libc::id_t) };
    if nice == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(0) {
            return Err(err);
        }
    }
    Ok(nice)
}

fn apply_nice(tid: libc::pid_t, nice: c_int) -> io::Result<()> {
    // SAFETY: plain syscall on our own worker's tid.
    if unsafe { libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, nice) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Lowest nice value reachable without `CAP_SYS_NICE`, from `RLIMIT_NICE`.
fn nice_floor() -> c_int {
    // SAFETY: rlimit is plain data, filled in by getrlimit.
    let mut limit: libc::rlimit = unsafe { mem::zeroed() };
    if unsafe { libc::getrlimit(libc::RLIMIT_NICE, &mut limit) } != 0 {
        return NICE_MAX + 1;
    }
    // The limit is stored as 20 - nice, in 1..=40; infinity means no floor.
    20 - limit.rlim_cur.min(40) as c_int
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    Run,
    Abandon,
}

#[derive(Debug, Default)]
struct GateState {
    tid: Option<libc::pid_t>,
    release: Option<Release>,
}

/// Start handshake and exit signal for one worker.
#[derive(Debug, Default)]
struct Gate {
    state: Mutex<GateState>,
    cvar: Condvar,
    exited: Latch,
}

impl Gate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker side: publish the tid, then block until released or abandoned.
    fn announce(&self, tid: libc::pid_t) -> Release {
        let mut state = self.lock();
        state.tid = Some(tid);
        self.cvar.notify_all();
        let state = self
            .cvar
            .wait_while(state, |s| s.release.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.release.unwrap_or(Release::Abandon)
    }

    fn wait_for_tid(&self) -> Option<libc::pid_t> {
        let state = self
            .cvar
            .wait_while(self.lock(), |s| s.tid.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.tid
    }

    /// Returns `false` if the gate was already opened.
    fn open(&self, release: Release) -> bool {
        let mut state = self.lock();
        if state.release.is_some() {
            return false;
        }
        state.release = Some(release);
        self.cvar.notify_all();
        true
    }
}

/// Everything the trampoline takes ownership of.
struct Launch {
    gate: Arc<Gate>,
    park: Arc<ParkCell>,
    body: Body,
}

fn current_tid() -> libc::pid_t {
    // SAFETY: gettid has no preconditions.
    unsafe { libc::syscall(libc::SYS_gettid) as libc::pid_t }
}

extern "C" fn trampoline(arg: *mut c_void) -> *mut c_void {
    // SAFETY: `arg` is the `Box<Launch>` leaked by `spawn_suspended`; this
    // thread is its only consumer.
    let launch = unsafe { Box::from_raw(arg.cast::<Launch>()) };
    let Launch { gate, park, body } = *launch;

    if let Err(err) = signals::unblock_current() {
        warn!(error = %err, "worker could not unblock control signals");
    }
    signals::bind(&park);

    let status = match gate.announce(current_tid()) {
        Release::Run => body(),
        Release::Abandon => {
            drop(body);
            0
        }
    };

    // Normally already sealed by the body; an abandoned worker seals here.
    signals::seal_current();
    signals::unbind();
    drop(park);
    gate.exited.open();
    status as isize as *mut c_void
}

fn check(rc: c_int) -> io::Result<()> {
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Owned `pthread_attr_t`, destroyed on drop.
struct ThreadAttr(libc::pthread_attr_t);

impl ThreadAttr {
    fn new(stack_size: usize) -> io::Result<Self> {
        // SAFETY: zeroed storage is initialised by pthread_attr_init.
        let mut raw: libc::pthread_attr_t = unsafe { mem::zeroed() };
        check(unsafe { libc::pthread_attr_init(&mut raw) })?;
        let mut attr = ThreadAttr(raw);
        let stack_size = stack_size.max(libc::PTHREAD_STACK_MIN);
        check(unsafe { libc::pthread_attr_setstacksize(&mut attr.0, stack_size) })?;
        Ok(attr)
    }
}

impl Drop for ThreadAttr {
    fn drop(&mut self) {
        // SAFETY: initialised in `new`.
        unsafe { libc::pthread_attr_destroy(&mut self.0) };
    }
}

/// Result of a suspend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parking {
    /// The worker is parked in the suspend handler.
    Parked,
    /// The worker already left its body; nothing to park.
    Sealed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Live,
    Reaped,
    Closed,
}

/// Exclusive owner of one pthread.
#[derive(Debug)]
pub(crate) struct NativeThreadHandle {
    thread: libc::pthread_t,
    tid: libc::pid_t,
    gate: Arc<Gate>,
    park: Arc<ParkCell>,
    status: Status,
    exit_status: Option<i32>,
    /// Nice value the worker inherited from its creator.
    base_nice: c_int,
}

impl NativeThreadHandle {
    /// Create the OS thread. `body` runs only after [`release`](Self::release).
    pub(crate) fn spawn_suspended(options: &ThreadOptions, body: Body) -> io::Result<Self> {
        signals::install()?;

        let gate = Arc::new(Gate::default());
        let park = Arc::new(ParkCell::default());
        let attr = ThreadAttr::new(options.effective_stack_size())?;
        let launch = Box::new(Launch {
            gate: gate.clone(),
            park: park.clone(),
            body,
        });
        let arg = Box::into_raw(launch).cast::<c_void>();

        let mut thread: libc::pthread_t = 0;
        // SAFETY: `attr` is initialised, `trampoline` takes ownership of `arg`.
        let rc = unsafe { libc::pthread_create(&mut thread, &attr.0, trampoline, arg) };
        if rc != 0 {
            // SAFETY: no thread was created, so `arg` is still ours.
            drop(unsafe { Box::from_raw(arg.cast::<Launch>()) });
            return Err(io::Error::from_raw_os_error(rc));
        }

        let mut handle = Self {
            thread,
            tid: 0,
            gate,
            park,
            status: Status::Live,
            exit_status: None,
            base_nice: 0,
        };
        handle.tid = handle.gate.wait_for_tid().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "worker did not report its thread id")
        })?;
        handle.base_nice = thread_nice(handle.tid)?;
        if let Some(name) = options.name.as_deref() {
            handle.set_name(name);
        }
        debug!(tid = handle.tid, "native thread created suspended");
        Ok(handle)
    }

    pub(crate) fn tid(&self) -> libc::pid_t {
        self.tid
    }

    /// Status returned by the thread routine, known once reaped by `wait`.
    pub(crate) fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    fn set_name(&self, name: &str) {
        let mut end = name.len().min(MAX_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let Ok(cname) = CString::new(&name[..end]) else {
            warn!(thread_name = name, "thread name contains a NUL byte, not applied");
            return;
        };
        // SAFETY: live thread, NUL-terminated name within the length limit.
        let rc = unsafe { libc::pthread_setname_np(self.thread, cname.as_ptr()) };
        if rc != 0 {
            warn!(thread_name = name, error = %io::Error::from_raw_os_error(rc), "failed to name thread");
        }
    }

    /// Levels are relative to the inherited nice. Without `CAP_SYS_NICE`,
    /// raising levels clamp to the nearest nice value `RLIMIT_NICE` allows.
    pub(crate) fn set_priority(&self, priority: Priority) -> io::Result<()> {
        let offset = nice_offset(priority).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                "real-time priority has no Linux mapping",
            )
        })?;
        let target = (self.base_nice + offset).clamp(NICE_MIN, NICE_MAX);
        let nice = match apply_nice(self.tid, target) {
            Ok(()) => target,
            Err(err) if matches!(err.raw_os_error(), Some(libc::EACCES | libc::EPERM)) => {
                // Only lowering the nice value can be refused, so the
                // reachable value lies between `target` and the current one.
                let current = thread_nice(self.tid)?;
                let reachable = target.max(nice_floor().min(current));
                if reachable != current {
                    apply_nice(self.tid, reachable)?;
                }
                debug!(tid = self.tid, %priority, target, nice = reachable, "thread priority clamped to nice limit");
                reachable
            }
            Err(err) => return Err(err),
        };
        trace!(tid = self.tid, %priority, nice, "thread priority set");
        Ok(())
    }

    /// Let the worker run its body.
    pub(crate) fn release(&self) -> io::Result<()> {
        if !self.gate.open(Release::Run) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "worker was already released",
            ));
        }
        Ok(())
    }

    pub(crate) fn suspend(&self) -> io::Result<Parking> {
        self.park.request();
        if let Err(err) = signals::send(self.thread, signals::suspend_signal()) {
            self.park.withdraw();
            // A worker that already exited may no longer accept signals.
            if self.park.is_sealed() {
                return Ok(Parking::Sealed);
            }
            return Err(err);
        }
        loop {
            if self.park.is_parked() {
                return Ok(Parking::Parked);
            }
            if self.park.is_sealed() {
                self.park.withdraw();
                return Ok(Parking::Sealed);
            }
            std::thread::yield_now();
        }
    }

    pub(crate) fn resume(&self) -> io::Result<()> {
        self.park.withdraw();
        signals::send(self.thread, signals::resume_signal())?;
        while self.park.is_parked() {
            std::thread::yield_now();
        }
        Ok(())
    }

    /// Kill the worker and reap it. Blocks until the OS thread is gone.
    pub(crate) fn terminate(&mut self) -> io::Result<()> {
        if self.status != Status::Live {
            return Err(io::Error::from_raw_os_error(libc::ESRCH));
        }
        if let Err(err) = signals::send(self.thread, signals::terminate_signal()) {
            // A sealed worker is on its way out; reaping it is enough.
            if !self.park.is_sealed() {
                return Err(err);
            }
        }
        self.reap()?;
        // A killed thread leaves no meaningful status behind.
        if !self.gate.exited.is_open() {
            self.exit_status = None;
        }
        Ok(())
    }

    /// Wait for the worker to end; `None` waits forever.
    pub(crate) fn wait(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        match self.status {
            Status::Reaped => return Ok(true),
            Status::Closed => return Err(io::Error::from_raw_os_error(libc::ESRCH)),
            Status::Live => {}
        }
        let exited = match timeout {
            None => {
                self.gate.exited.wait();
                true
            }
            Some(timeout) => self.gate.exited.wait_timeout(timeout),
        };
        if !exited {
            return Ok(false);
        }
        self.reap()?;
        Ok(true)
    }

    fn reap(&mut self) -> io::Result<()> {
        let mut ret: *mut c_void = ptr::null_mut();
        // SAFETY: live, unjoined, undetached thread; joined at most once.
        check(unsafe { libc::pthread_join(self.thread, &mut ret) })?;
        self.status = Status::Reaped;
        self.exit_status = Some(ret as isize as i32);
        trace!(tid = self.tid, "native thread reaped");
        Ok(())
    }

    /// Stop tracking the thread without waiting for it.
    fn close(&mut self) {
        if self.status == Status::Live {
            if self.gate.open(Release::Abandon) {
                trace!(tid = self.tid, "abandoning unreleased worker");
            } else if self.park.is_parked() {
                if let Err(err) = self.resume() {
                    warn!(tid = self.tid, error = %err, "failed to unpark worker on close");
                }
            }
            // SAFETY: live, unjoined thread.
            let rc = unsafe { libc::pthread_detach(self.thread) };
            if rc != 0 {
                warn!(tid = self.tid, error = %io::Error::from_raw_os_error(rc), "pthread_detach failed");
            }
        }
        self.status = Status::Closed;
    }
}

impl Drop for NativeThreadHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    fn spawn(body: impl FnOnce() -> i32 + Send + 'static) -> NativeThreadHandle {
        NativeThreadHandle::spawn_suspended(&ThreadOptions::default(), Box::new(body)).unwrap()
    }

    fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn release_then_wait() {
        let mut handle = spawn(|| 7);
        assert!(handle.tid() > 0);
        handle.release().unwrap();
        assert!(handle.wait(None).unwrap());
        assert_eq!(handle.exit_status(), Some(7));
        // Already reaped: waiting again is a no-op.
        assert!(handle.wait(Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn body_waits_for_release() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let mut handle = spawn(move || {
            flag.store(true, Ordering::SeqCst);
            0
        });
        std::thread::sleep(Duration::from_millis(20));
        assert!(!ran.load(Ordering::SeqCst));
        handle.release().unwrap();
        assert!(handle.release().is_err());
        handle.wait(None).unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn abandoned_body_never_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let handle = spawn(move || {
            flag.store(true, Ordering::SeqCst);
            0
        });
        drop(handle);
        // The body (and its clone of `ran`) is dropped without running.
        assert!(eventually(|| Arc::strong_count(&ran) == 1));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn timed_wait() {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let mut handle = spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            3
        });
        handle.release().unwrap();
        assert!(!handle.wait(Some(Duration::from_millis(10))).unwrap());
        stop.store(true, Ordering::SeqCst);
        assert!(handle.wait(Some(Duration::from_secs(5))).unwrap());
        assert_eq!(handle.exit_status(), Some(3));
    }

    #[test]
    fn suspend_parks_worker() {
        let count = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let (c, s) = (count.clone(), stop.clone());
        let mut handle = spawn(move || {
            while !s.load(Ordering::SeqCst) {
                c.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
            }
            0
        });
        handle.release().unwrap();
        assert!(eventually(|| count.load(Ordering::SeqCst) > 0));

        assert_eq!(handle.suspend().unwrap(), Parking::Parked);
        let frozen = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), frozen);

        handle.resume().unwrap();
        assert!(eventually(|| count.load(Ordering::SeqCst) > frozen));
        stop.store(true, Ordering::SeqCst);
        assert!(handle.wait(None).unwrap());
    }

    #[test]
    fn suspend_after_exit_is_sealed() {
        let mut handle = spawn(|| 0);
        handle.release().unwrap();
        handle.gate.exited.wait();
        assert_eq!(handle.suspend().unwrap(), Parking::Sealed);
        assert!(handle.wait(None).unwrap());
    }

    #[test]
    fn terminate_running_and_parked() {
        for park_first in [false, true] {
            let mut handle = spawn(|| loop {
                std::thread::sleep(Duration::from_millis(1));
            });
            handle.release().unwrap();
            if park_first {
                assert_eq!(handle.suspend().unwrap(), Parking::Parked);
            }
            handle.terminate().unwrap();
            assert_eq!(handle.exit_status(), None);
            assert!(handle.terminate().is_err());
            assert!(handle.wait(Some(Duration::ZERO)).unwrap());
        }
    }

    #[test]
    fn priority_before_release() {
        let mut handle = spawn(|| 0);
        handle.set_priority(Priority::Low).unwrap();
        let err = handle.set_priority(Priority::RealTime).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        handle.release().unwrap();
        handle.wait(None).unwrap();
    }

    #[test]
    fn name_is_truncated() {
        let options = ThreadOptions::new().name("ctl-worker-with-a-long-name");
        let mut handle = NativeThreadHandle::spawn_suspended(&options, Box::new(|| 0)).unwrap();
        let comm = std::fs::read_to_string(format!("/proc/self/task/{}/comm", handle.tid())).unwrap();
        assert_eq!(comm.trim_end(), "ctl-worker-with");
        handle.release().unwrap();
        handle.wait(None).unwrap();
    }

    #[test]
    fn nice_mapping_is_ordered() {
        let mapped: Vec<c_int> = Priority::ALL.iter().filter_map(|p| nice_offset(*p)).collect();
        assert_eq!(mapped.len(), 5);
        assert!(mapped.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(nice_offset(Priority::Normal), Some(0));
    }

    #[test]
    fn raising_priority_clamps_instead_of_failing() {
        let mut handle = spawn(|| 0);
        let base = handle.base_nice;
        assert_eq!(thread_nice(handle.tid()).unwrap(), base);

        handle.set_priority(Priority::Low).unwrap();
        let low = thread_nice(handle.tid()).unwrap();
        assert_eq!(low, (base + 10).min(NICE_MAX));

        // Back up to Normal: reaches `base` when permitted, otherwise stays
        // at the lowest nice value the limit allows.
        handle.set_priority(Priority::Normal).unwrap();
        let normal = thread_nice(handle.tid()).unwrap();
        assert!(normal >= base && normal <= low);

        handle.set_priority(Priority::High).unwrap();
        let high = thread_nice(handle.tid()).unwrap();
        assert!(high <= normal && high >= base - 5);

        handle.set_priority(Priority::Highest).unwrap();
        assert!(thread_nice(handle.tid()).unwrap() <= high);

        handle.release().unwrap();
        handle.wait(None).unwrap();
    }

    #[test]
    fn nice_floor_is_in_range() {
        let floor = nice_floor();
        assert!((NICE_MIN..=NICE_MAX + 1).contains(&floor));
    }
}
