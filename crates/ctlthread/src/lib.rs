// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! ctlthread: OS threads with explicit lifecycle control.
//!
//! Workers are created suspended so priority can be set before any work
//! runs, then started, suspended/resumed, joined (optionally with a
//! timeout) or terminated. The worker's return code, or the failure it
//! raised, is carried back to the controlling thread.
//!
//! Components:
//! - outcome: shared start/completion flags and write-once result
//! - native: OS thread port (Linux: pthreads + real-time signals)
//! - controller: the state machine over one native thread
//! - thread: move-only facade with join-on-drop
//! - work/options/priority: what to run and how

pub mod controller;
pub mod error;
mod latch;
mod native;
pub mod options;
pub mod outcome;
pub mod priority;
pub mod thread;
pub mod work;

pub use controller::{ThreadController, ThreadState};
pub use error::{ErrorKind, FailureKind, Result, ThreadError, WorkerFailure};
pub use options::ThreadOptions;
pub use outcome::Outcome;
pub use priority::Priority;
pub use thread::Thread;
pub use work::{Callback, Work};
