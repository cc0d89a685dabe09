//! Timer bookkeeping for the command queues.
//!
//! Time is a monotonic millisecond count chosen by the caller, so the same
//! engine runs against a wall clock or a test's virtual clock. Cancelled
//! timers stay in the heap and are skipped when they surface.

use crate::queue::QueueId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// Milliseconds on the caller's monotonic clock.
pub type Millis = u64;

/// Handle for one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<(Millis, TimerId, QueueId)>>,
    live: HashSet<TimerId>,
    next_id: u64,
}

impl Scheduler {
    /// Arm a timer that wakes `queue` at `at`. Timers sharing a deadline fire
    /// in the order they were armed.
    pub fn arm(&mut self, at: Millis, queue: QueueId) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.heap.push(Reverse((at, id, queue)));
        self.live.insert(id);
        id
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.live.remove(&id);
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Millis> {
        self.prune();
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Remove and return the earliest live timer due at or before `now`.
    pub fn pop_due(&mut self, now: Millis) -> Option<(TimerId, QueueId)> {
        self.prune();
        let Reverse((at, _, _)) = self.heap.peek()?;
        if *at > now {
            return None;
        }
        let Reverse((_, id, queue)) = self.heap.pop()?;
        self.live.remove(&id);
        Some((id, queue))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn prune(&mut self) {
        while let Some(Reverse((_, id, _))) = self.heap.peek() {
            if self.live.contains(id) {
                break;
            }
            self.heap.pop();
        }
    }
}
