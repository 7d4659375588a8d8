// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! One-shot latch: starts closed, opens once, stays open.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct Latch {
    open: Mutex<bool>,
    cvar: Condvar,
}

impl Latch {
    pub fn open(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        *open = true;
        self.cvar.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until open.
    pub fn wait(&self) {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let _open = self
            .cvar
            .wait_while(open, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until open or `timeout` elapses. Returns whether it opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let (open, _) = self
            .cvar
            .wait_timeout_while(open, timeout, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
        *open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_timeout() {
        let latch = Latch::default();
        assert!(!latch.wait_timeout(Duration::from_millis(5)));
        latch.open();
        assert!(latch.is_open());
        assert!(latch.wait_timeout(Duration::ZERO));
        latch.wait();
    }
}
