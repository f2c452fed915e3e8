//! Expiry timers for terminal entries.
//!
//! Each entry owns exactly one live timer while it is in the table. Timers are
//! kept in a min-heap ordered by deadline and are only touched under the
//! table's write lock, so firing a timer and unlinking its entry happen
//! together. Cancelling is lazy: the id is remembered and its heap node is
//! discarded when it reaches the top.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

use super::entry::EntryId;

/// A pending expiry check for one entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Timer {
    pub deadline: Instant,
    pub id: EntryId,
}

/// Min-heap of pending timers.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<Timer>>,
    cancelled: HashSet<EntryId>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, id: EntryId, deadline: Instant) {
        self.heap.push(Reverse(Timer { deadline, id }));
    }

    /// Drop the timer belonging to `id`. The caller must own a live timer
    /// for `id`; ids are never re-armed once their entry is gone.
    pub fn cancel(&mut self, id: EntryId) {
        self.cancelled.insert(id);
    }

    /// Pop the earliest live timer if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Timer> {
        loop {
            match self.heap.peek() {
                Some(Reverse(timer)) if timer.deadline <= now => {}
                _ => return None,
            }
            let Reverse(timer) = self.heap.pop()?;
            if !self.cancelled.remove(&timer.id) {
                return Some(timer);
            }
        }
    }

    /// Earliest deadline in the heap. May belong to a cancelled timer, in
    /// which case the wake-up finds nothing due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(timer)| timer.deadline)
    }

    /// Live timers.
    pub fn len(&self) -> usize {
        self.heap.len() - self.cancelled.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.cancelled.clear();
    }
}

/// Outcome of one sweep over the due timers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries that showed activity and were re-armed.
    pub renewed: usize,
    /// Entries that were idle for a full period and were dropped.
    pub evicted: usize,
}
