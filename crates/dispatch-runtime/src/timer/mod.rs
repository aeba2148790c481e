//! Timer subsystem
//!
//! One process-wide timer thread serves two clock domains:
//!
//! ```text
//!                 TimerRegistry
//!                /             \
//!   mockable heap               wall heap
//!   (clock::now)                (Instant::now)
//!   Timer::do_in / do_every     fiber sleep, wait timeouts
//!        |                           |
//!   advance_time() polls         timer thread polls
//!   synchronously when pinned    every max_poll_interval
//! ```
//!
//! Expired entries run their `TimerAction`, which posts work to an event
//! loop or wakes a waiter.

pub mod clock;
mod entry;
pub mod impls;
mod registry;
mod worker;

pub use entry::{TimerAction, TimerEntry, TimerHandle, TimerType};
pub use impls::HeapTimerBackend;
pub use registry::{registry, TimerRegistry};
pub use worker::{spawn_timer_thread, TimerStats, TimerThreadConfig, TimerThreadHandle};

use std::time::Instant;

/// A timer that came due during `poll_expired`
#[derive(Clone)]
pub struct ExpiredTimer {
    pub handle: TimerHandle,
    pub timer_type: TimerType,
    pub action: TimerAction,
}

/// Core timer trait - implement this for different backends
///
/// All implementations must be thread-safe: the timer thread, worker
/// threads and `advance_time` callers may use a backend concurrently.
pub trait TimerBackend: Send + Sync {
    /// Insert a timer entry, returns handle for cancellation
    fn insert(&self, entry: TimerEntry) -> TimerHandle;

    /// Cancel a timer by handle
    ///
    /// Returns true if the timer was pending. Cancelling a periodic timer
    /// stops all future firings.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Remove and return every entry due at `now`, re-arming periodic ones
    fn poll_expired(&self, now: Instant) -> Vec<ExpiredTimer>;

    /// Earliest pending deadline, if any
    fn next_deadline(&self) -> Option<Instant>;

    /// Number of pending timers
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backend name for debugging
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Run the actions of expired timers, isolating panics
///
/// Returns the number of actions run.
pub(crate) fn fire(expired: Vec<ExpiredTimer>) -> usize {
    let count = expired.len();
    for timer in expired {
        let action = timer.action;
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| action())) {
            dispatch_core::kerror!(
                "timer {} action panicked: {}",
                timer.handle.raw(),
                dispatch_core::panic_message(payload.as_ref())
            );
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fire_isolates_panics() {
        let backend = HeapTimerBackend::new();
        let count = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();

        backend.insert(TimerEntry::oneshot(now, Arc::new(|| panic!("bad action"))));
        let c = count.clone();
        backend.insert(TimerEntry::oneshot(
            now + Duration::from_millis(1),
            Arc::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        ));

        let fired = fire(backend.poll_expired(now + Duration::from_millis(5)));
        assert_eq!(fired, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
