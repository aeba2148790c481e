//! Mockable clock
//!
//! `now()` is the wall clock until a test pins it with `set_now`. While
//! pinned, timers in the mockable domain only fire from `advance_time`,
//! which moves the pinned instant and runs every due timer on the calling
//! thread before returning. Fiber sleeps and wait timeouts never read this
//! clock.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::registry::registry;

static PINNED: Mutex<Option<Instant>> = Mutex::new(None);
static EXCLUSIVE: Mutex<()> = Mutex::new(());

fn pinned() -> MutexGuard<'static, Option<Instant>> {
    PINNED.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Current time: the pinned instant if set, else `Instant::now()`
pub fn now() -> Instant {
    pinned().unwrap_or_else(Instant::now)
}

/// Pin the clock at `t`
pub fn set_now(t: Instant) {
    *pinned() = Some(t);
}

/// Return to the wall clock
pub fn clear_now() {
    *pinned() = None;
}

/// Whether the clock is currently pinned
pub fn is_mocked() -> bool {
    pinned().is_some()
}

/// Move the pinned clock forward by `d` and fire every timer now due.
///
/// An unpinned clock is first pinned at the current wall time. Returns the
/// new pinned instant.
pub fn advance_time(d: Duration) -> Instant {
    let t = {
        let mut guard = pinned();
        let t = guard.unwrap_or_else(Instant::now) + d;
        *guard = Some(t);
        t
    };
    registry().poll_mock(t);
    t
}

/// Exclusive use of the clock; dropping the guard returns to wall time.
///
/// The clock is process-wide, so code that pins it (typically tests running
/// in parallel) takes this guard first.
pub fn test_lock() -> ClockGuard {
    let guard = EXCLUSIVE.lock().unwrap_or_else(PoisonError::into_inner);
    clear_now();
    ClockGuard { _guard: guard }
}

/// Returned by `test_lock`
pub struct ClockGuard {
    _guard: MutexGuard<'static, ()>,
}

impl Drop for ClockGuard {
    fn drop(&mut self) {
        clear_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pin_and_clear() {
        let _clock = test_lock();
        assert!(!is_mocked());

        let t = Instant::now() + Duration::from_secs(3600);
        set_now(t);
        assert!(is_mocked());
        assert_eq!(now(), t);

        clear_now();
        assert!(!is_mocked());
        assert!(now() < t);
    }

    #[test]
    fn test_advance_pins_unpinned_clock() {
        let _clock = test_lock();
        let before = Instant::now();
        let t = advance_time(Duration::from_secs(10));
        assert!(is_mocked());
        assert!(t >= before + Duration::from_secs(10));
        assert_eq!(now(), t);
    }

    #[test]
    fn test_advance_fires_due_timers_synchronously() {
        let _clock = test_lock();
        let t0 = Instant::now();
        set_now(t0);

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = registry().schedule_in(
            Duration::from_millis(500),
            Arc::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );

        advance_time(Duration::from_millis(499));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        advance_time(Duration::from_millis(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        advance_time(Duration::from_millis(500));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!registry().cancel(handle));
    }

    #[test]
    fn test_guard_clears_on_drop() {
        {
            let _clock = test_lock();
            set_now(Instant::now());
        }
        let _clock = test_lock();
        assert!(!is_mocked());
    }
}
