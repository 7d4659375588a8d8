// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Creation-time thread configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::priority::Priority;

/// Stack size used when none is configured. Matches the Rust std default.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Options applied while the worker is still suspended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ThreadOptions {
    /// OS-visible thread name. Truncated to what the platform accepts.
    pub name: Option<String>,
    /// Stack size in bytes; `None` uses [`DEFAULT_STACK_SIZE`].
    pub stack_size: Option<usize>,
    /// Priority applied before the worker is released.
    pub priority: Option<Priority>,
}

impl ThreadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub(crate) fn effective_stack_size(&self) -> usize {
        self.stack_size.unwrap_or(DEFAULT_STACK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let opts = ThreadOptions::new()
            .name("capture")
            .stack_size(64 * 1024)
            .priority(Priority::High);
        assert_eq!(opts.name.as_deref(), Some("capture"));
        assert_eq!(opts.effective_stack_size(), 64 * 1024);
        assert_eq!(opts.priority, Some(Priority::High));
    }

    #[test]
    fn default_stack() {
        assert_eq!(ThreadOptions::default().effective_stack_size(), DEFAULT_STACK_SIZE);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialize_partial() {
        let opts: ThreadOptions =
            serde_json::from_str(r#"{ "name": "mixer", "priority": "low" }"#).unwrap();
        assert_eq!(opts.name.as_deref(), Some("mixer"));
        assert_eq!(opts.priority, Some(Priority::Low));
        assert_eq!(opts.stack_size, None);
    }
}
