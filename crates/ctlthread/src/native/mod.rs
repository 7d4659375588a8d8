// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Native thread ports.
//!
//! A port provides `NativeThreadHandle` with these operations:
//!
//! - `spawn_suspended(options, body)`: create the OS thread. The body must not
//!   run before `release`, and priority must be settable in between.
//! - `release()`: let the body run. Called at most once.
//! - `set_priority(level)`: map a [`Priority`](crate::Priority) onto the
//!   platform's scheduling classes.
//! - `suspend()`: park the worker. Reports `Parking::Sealed` instead when the
//!   worker has already left its body and can no longer be parked.
//! - `resume()`: unpark a parked worker.
//! - `terminate()`: end the worker abruptly; returns once the OS thread is gone.
//! - `wait(timeout)`: `true` once the OS thread has ended (and is reaped),
//!   `false` on timeout. `None` waits forever.
//! - `close()` (via `Drop`): stop tracking the thread without blocking on it.
//!   A never-released worker exits without running its body.
//!
//! and a free function `seal_current()`, which the body calls on the worker
//! thread before publishing its result. After it returns, `suspend` reports
//! `Sealed` and `terminate` only waits for the thread to finish on its own,
//! so a kill can never interrupt the publish.
//!
//! Priority levels are relative on Linux: each maps to an offset from the
//! nice value the worker inherited. Unprivileged processes cannot lower a
//! nice value past `RLIMIT_NICE`, so raising levels clamp to that limit
//! rather than fail.
//!
//! Only Linux is implemented.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
mod signals;

#[cfg(target_os = "linux")]
pub(crate) use linux::{NativeThreadHandle, Parking};
#[cfg(target_os = "linux")]
pub(crate) use signals::seal_current;

#[cfg(not(target_os = "linux"))]
compile_error!("ctlthread has no native thread port for this target yet (see src/native/mod.rs)");

/// Type-erased worker body. Runs on the native thread, returns the native exit status.
pub(crate) type Body = Box<dyn FnOnce() -> i32 + Send + 'static>;
