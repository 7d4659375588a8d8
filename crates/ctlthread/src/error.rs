// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error types for thread control.
//!
//! Wrapper errors (`Usage`, `Runtime`, `Exited`) are raised at the call that
//! broke the contract. Worker failures are data: they are captured on the
//! worker thread and only surface from `exit_code()` after a join.

use std::any::Any;
use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ThreadError>;

/// Error returned by thread-control operations.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// The operation is not legal in the current state.
    #[error("thread usage error: {0}")]
    Usage(&'static str),

    /// An underlying OS call failed.
    #[error("thread runtime error: failed to {op}: {source}")]
    Runtime {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The worker already completed, so the request cannot apply.
    #[error("thread exited: {0}")]
    Exited(&'static str),

    /// The worker's callback failed; re-raised from `exit_code()`.
    #[error("worker failed: {0}")]
    Worker(WorkerFailure),

    /// The worker was forcibly terminated.
    #[error("worker was terminated with code {code}")]
    Terminated { code: i32 },
}

/// Coarse classification of a [`ThreadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    Runtime,
    Exited,
    Worker,
    Terminated,
}

impl ThreadError {
    pub(crate) fn runtime(op: &'static str, source: io::Error) -> Self {
        Self::Runtime { op, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ThreadError::Usage(_) => ErrorKind::Usage,
            ThreadError::Runtime { .. } => ErrorKind::Runtime,
            ThreadError::Exited(_) => ErrorKind::Exited,
            ThreadError::Worker(_) => ErrorKind::Worker,
            ThreadError::Terminated { .. } => ErrorKind::Terminated,
        }
    }

    /// The captured worker failure, if this error carries one.
    pub fn worker_failure(&self) -> Option<&WorkerFailure> {
        match self {
            ThreadError::Worker(failure) => Some(failure),
            _ => None,
        }
    }
}

/// How the worker's callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The callback panicked.
    Panic,
    /// The callback returned an error.
    Error,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Panic => write!(f, "panic"),
            FailureKind::Error => write!(f, "error"),
        }
    }
}

/// A failure captured on the worker thread.
///
/// Cloneable so `exit_code()` can re-raise the same failure any number of
/// times.
#[derive(Debug, Clone)]
pub struct WorkerFailure {
    kind: FailureKind,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl WorkerFailure {
    /// Capture a panic payload, keeping its message when it is a string.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self {
            kind: FailureKind::Panic,
            message,
            source: None,
        }
    }

    /// Capture an error returned by a fallible callback.
    pub(crate) fn from_error(error: Box<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        Self {
            kind: FailureKind::Error,
            message: error.to_string(),
            source: Some(Arc::from(error)),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for WorkerFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn panic_payload_str() {
        let failure = WorkerFailure::from_panic(Box::new("boom"));
        assert_eq!(failure.kind(), FailureKind::Panic);
        assert_eq!(failure.message(), "boom");
        assert!(failure.source().is_none());
    }

    #[test]
    fn panic_payload_string() {
        let failure = WorkerFailure::from_panic(Box::new(format!("code {}", 7)));
        assert_eq!(failure.message(), "code 7");
    }

    #[test]
    fn panic_payload_opaque() {
        let failure = WorkerFailure::from_panic(Box::new(17u32));
        assert_eq!(failure.message(), "unknown panic");
    }

    #[test]
    fn error_keeps_source() {
        let io = io::Error::new(io::ErrorKind::Other, "disk gone");
        let failure = WorkerFailure::from_error(Box::new(io));
        assert_eq!(failure.kind(), FailureKind::Error);
        assert_eq!(failure.to_string(), "error: disk gone");
        let source = failure.source().expect("source kept");
        assert!(source.downcast_ref::<io::Error>().is_some());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(ThreadError::Usage("x").kind(), ErrorKind::Usage);
        assert_eq!(ThreadError::Exited("x").kind(), ErrorKind::Exited);
        assert_eq!(ThreadError::Terminated { code: 3 }.kind(), ErrorKind::Terminated);
        let err = ThreadError::runtime("join", io::Error::from_raw_os_error(libc::ESRCH));
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert!(err.to_string().starts_with("thread runtime error: failed to join"));
    }
}
