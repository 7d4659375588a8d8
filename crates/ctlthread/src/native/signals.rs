// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Real-time signals that park, unpark and kill worker threads.
//!
//! Handlers are installed once per process and stay installed. A worker
//! binds its `ParkCell` in thread-local storage so the suspend handler can
//! find it; the handler then sleeps in `sigsuspend` until the controller
//! withdraws the request and sends the resume signal.

use std::cell::Cell;
use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use libc::c_int;

const SUSPEND_OFFSET: c_int = 4;
const RESUME_OFFSET: c_int = 5;
const TERMINATE_OFFSET: c_int = 6;

pub(crate) fn suspend_signal() -> c_int {
    libc::SIGRTMIN() + SUSPEND_OFFSET
}

pub(crate) fn resume_signal() -> c_int {
    libc::SIGRTMIN() + RESUME_OFFSET
}

pub(crate) fn terminate_signal() -> c_int {
    libc::SIGRTMIN() + TERMINATE_OFFSET
}

/// Parking state of one worker, shared with the signal handler.
#[derive(Debug, Default)]
pub(crate) struct ParkCell {
    /// Controller wants the worker parked.
    requested: AtomicBool,
    /// Worker is inside the suspend handler.
    parked: AtomicBool,
    /// Worker has left its body and masked the control signals.
    sealed: AtomicBool,
}

impl ParkCell {
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn withdraw(&self) {
        self.requested.store(false, Ordering::Release);
    }

    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Acquire)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }
}

thread_local! {
    static CURRENT: Cell<*const ParkCell> = const { Cell::new(ptr::null()) };
}

/// Bind `cell` to the calling worker thread.
///
/// The caller keeps the `Arc` alive until [`unbind`].
pub(crate) fn bind(cell: &Arc<ParkCell>) {
    CURRENT.with(|current| current.set(Arc::as_ptr(cell)));
}

pub(crate) fn unbind() {
    CURRENT.with(|current| current.set(ptr::null()));
}

/// Install the handlers, once per process.
pub(crate) fn install() -> io::Result<()> {
    static INSTALLED: OnceLock<Result<(), i32>> = OnceLock::new();
    // SAFETY: runs once; the handlers only touch atomics, errno and
    // async-signal-safe libc calls.
    match INSTALLED.get_or_init(|| unsafe { install_handlers() }) {
        Ok(()) => Ok(()),
        Err(errno) => Err(io::Error::from_raw_os_error(*errno)),
    }
}

unsafe fn install_handlers() -> Result<(), i32> {
    // Resume stays blocked inside the suspend handler until sigsuspend
    // unblocks it, so an early resume is held pending rather than lost.
    let mut hold_resume: libc::sigset_t = mem::zeroed();
    libc::sigemptyset(&mut hold_resume);
    libc::sigaddset(&mut hold_resume, resume_signal());

    let mut none: libc::sigset_t = mem::zeroed();
    libc::sigemptyset(&mut none);

    set_handler(suspend_signal(), on_suspend, hold_resume)?;
    set_handler(resume_signal(), on_resume, none)?;
    set_handler(terminate_signal(), on_terminate, none)?;
    tracing::debug!(
        suspend = suspend_signal(),
        resume = resume_signal(),
        terminate = terminate_signal(),
        "installed thread control signal handlers"
    );
    Ok(())
}

unsafe fn set_handler(
    signal: c_int,
    handler: extern "C" fn(c_int),
    mask: libc::sigset_t,
) -> Result<(), i32> {
    let mut action: libc::sigaction = mem::zeroed();
    action.sa_sigaction = handler as libc::sighandler_t;
    action.sa_mask = mask;
    action.sa_flags = libc::SA_RESTART;
    if libc::sigaction(signal, &action, ptr::null_mut()) != 0 {
        return Err(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL));
    }
    Ok(())
}

extern "C" fn on_suspend(_signal: c_int) {
    let cell = CURRENT.with(Cell::get);
    if cell.is_null() {
        return;
    }
    // SAFETY: `bind` stored a pointer into an `Arc` the worker trampoline
    // holds until after `unbind`, and this handler runs on that worker.
    let cell = unsafe { &*cell };
    // SAFETY: errno is thread-local; restored before returning.
    let saved_errno = unsafe { *libc::__errno_location() };

    cell.parked.store(true, Ordering::Release);
    unsafe {
        let mut wake: libc::sigset_t = mem::zeroed();
        libc::sigfillset(&mut wake);
        libc::sigdelset(&mut wake, resume_signal());
        libc::sigdelset(&mut wake, terminate_signal());
        while cell.requested.load(Ordering::Acquire) {
            libc::sigsuspend(&wake);
        }
    }
    cell.parked.store(false, Ordering::Release);

    unsafe { *libc::__errno_location() = saved_errno };
}

extern "C" fn on_resume(_signal: c_int) {}

extern "C" fn on_terminate(_signal: c_int) {
    // Only bound workers may be killed.
    if CURRENT.with(Cell::get).is_null() {
        return;
    }
    // Ends the calling thread only. No unwinding, no TLS destructors; the
    // kernel still clears the tid so pthread_join can reap it.
    unsafe {
        libc::syscall(libc::SYS_exit, 0 as libc::c_long);
    }
}

fn control_set() -> libc::sigset_t {
    // SAFETY: sigset_t is plain data, initialised by sigemptyset.
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, suspend_signal());
        libc::sigaddset(&mut set, resume_signal());
        libc::sigaddset(&mut set, terminate_signal());
        set
    }
}

fn change_mask(how: c_int) -> io::Result<()> {
    let set = control_set();
    // SAFETY: valid set pointer, old mask not requested.
    let rc = unsafe { libc::pthread_sigmask(how, &set, ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Let the control signals reach the calling thread.
pub(crate) fn unblock_current() -> io::Result<()> {
    change_mask(libc::SIG_UNBLOCK)
}

/// Hold back the control signals on the calling thread.
pub(crate) fn block_current() -> io::Result<()> {
    change_mask(libc::SIG_BLOCK)
}

/// Mask the control signals on the calling worker, then mark its cell sealed.
///
/// Once this returns the worker can no longer be parked or killed.
/// Idempotent.
pub(crate) fn seal_current() {
    if let Err(err) = block_current() {
        tracing::warn!(error = %err, "worker could not block control signals");
    }
    let cell = CURRENT.with(Cell::get);
    if !cell.is_null() {
        // SAFETY: see `on_suspend`; we are on the bound worker.
        unsafe { (*cell).seal() };
    }
}

pub(crate) fn send(thread: libc::pthread_t, signal: c_int) -> io::Result<()> {
    // SAFETY: `thread` is a live, unjoined pthread owned by the caller.
    let rc = unsafe { libc::pthread_kill(thread, signal) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}
