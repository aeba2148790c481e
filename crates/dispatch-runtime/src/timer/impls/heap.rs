//! BinaryHeap-based timer backend
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1) (lazy)
//! - Poll expired: O(k log n) where k = number of expired timers
//! - Next deadline: O(1) amortized
//!
//! # Cancellation Strategy
//!
//! Pending handles live in a HashSet next to the heap. Cancelling only
//! removes the handle from the set; heap entries whose handle is no longer
//! pending are discarded when they reach the top.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::timer::{ExpiredTimer, TimerBackend, TimerEntry, TimerHandle};

/// Min-heap ordering by deadline, ties broken by handle (insertion order)
struct HeapEntry(TimerEntry);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.handle == other.0.handle
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .0
            .deadline
            .cmp(&self.0.deadline)
            .then_with(|| other.0.handle.cmp(&self.0.handle))
    }
}

struct HeapInner {
    heap: BinaryHeap<HeapEntry>,
    pending: HashSet<TimerHandle>,
}

impl HeapInner {
    /// Drop cancelled entries sitting at the top of the heap
    fn discard_cancelled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.pending.contains(&top.0.handle) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// BinaryHeap-based timer backend
///
/// Thread-safe via an internal Mutex held only for heap bookkeeping; timer
/// actions are run by the caller after `poll_expired` returns.
pub struct HeapTimerBackend {
    inner: Mutex<HeapInner>,
}

impl HeapTimerBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HeapInner {
                heap: BinaryHeap::with_capacity(256),
                pending: HashSet::with_capacity(256),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeapInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HeapTimerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerBackend for HeapTimerBackend {
    fn insert(&self, entry: TimerEntry) -> TimerHandle {
        let handle = entry.handle;
        let mut inner = self.lock();
        inner.pending.insert(handle);
        inner.heap.push(HeapEntry(entry));
        handle
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let mut inner = self.lock();
        let removed = inner.pending.remove(&handle);
        if removed {
            inner.discard_cancelled();
        }
        removed
    }

    fn poll_expired(&self, now: Instant) -> Vec<ExpiredTimer> {
        let mut inner = self.lock();
        let mut expired = Vec::new();
        let mut rearm = Vec::new();

        while let Some(top) = inner.heap.peek() {
            if top.0.deadline > now {
                break;
            }
            let Some(HeapEntry(entry)) = inner.heap.pop() else {
                break;
            };
            if !inner.pending.contains(&entry.handle) {
                continue;
            }

            match entry.reschedule(now) {
                Some(next) => rearm.push(next),
                None => {
                    inner.pending.remove(&entry.handle);
                }
            }

            expired.push(ExpiredTimer {
                handle: entry.handle,
                timer_type: entry.timer_type,
                action: entry.action,
            });
        }

        // Re-armed after the loop so a zero interval cannot spin here
        for entry in rearm {
            inner.heap.push(HeapEntry(entry));
        }
        inner.discard_cancelled();

        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        let mut inner = self.lock();
        inner.discard_cancelled();
        inner.heap.peek().map(|e| e.0.deadline)
    }

    fn len(&self) -> usize {
        self.lock().pending.len()
    }

    fn name(&self) -> &'static str {
        "binary_heap"
    }
}
