//! The retry watch-list.
//!
//! After a send whose rule declares a failure pattern, the invocation waits
//! here. A later output line matching that pattern proves the send did not
//! take effect, and the invocation goes back to its queue for another try.

use crate::queue::PendingInvocation;
use std::collections::VecDeque;
use tracing::debug;

/// Most invocations awaiting failure confirmation at once.
pub const WATCH_CAPACITY: usize = 10;

#[derive(Debug)]
pub struct WatchList {
    /// Newest first.
    entries: VecDeque<PendingInvocation>,
    capacity: usize,
}

impl Default for WatchList {
    fn default() -> Self {
        Self::with_capacity(WATCH_CAPACITY)
    }
}

impl WatchList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Insert at the front, evicting the oldest entry when over capacity.
    pub fn register(&mut self, invocation: PendingInvocation) {
        self.entries.push_front(invocation);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                debug!(command = %evicted.command, "watch-list full, dropped oldest entry");
            }
        }
    }

    /// Remove and return the first entry whose failure pattern matches `line`.
    /// At most one entry is resolved per line.
    pub fn take_failed(&mut self, line: &str) -> Option<PendingInvocation> {
        let index = self.entries.iter().position(|entry| {
            entry
                .fail_pattern
                .as_ref()
                .is_some_and(|pattern| pattern.is_match(line))
        })?;
        self.entries.remove(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingInvocation> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
