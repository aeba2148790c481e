//! TimerRegistry - the timer API used by the rest of the runtime
//!
//! Owns the two backends (mockable clock, wall clock) and lazily starts the
//! timer thread on the first schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use dispatch_core::{kerror, ktrace};

use super::clock;
use super::worker::{spawn_timer_thread, TimerSource, TimerStats, TimerThreadConfig, TimerThreadHandle};
use super::{fire, HeapTimerBackend, TimerAction, TimerBackend, TimerEntry, TimerHandle};

/// The process-wide registry, created on first use
pub fn registry() -> &'static TimerRegistry {
    static REGISTRY: OnceLock<TimerRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| TimerRegistry::new(TimerThreadConfig::from_env()))
}

/// Time source for the mockable backend on the timer thread: only while
/// the clock is not pinned (pinned time advances through `advance_time`).
fn mock_domain_now() -> Option<Instant> {
    if clock::is_mocked() {
        None
    } else {
        Some(Instant::now())
    }
}

fn wall_now() -> Option<Instant> {
    Some(Instant::now())
}

pub struct TimerRegistry {
    mock: Arc<dyn TimerBackend>,
    wall: Arc<dyn TimerBackend>,
    config: TimerThreadConfig,
    started: AtomicBool,
    thread: Mutex<Option<TimerThreadHandle>>,
}

impl TimerRegistry {
    pub fn new(config: TimerThreadConfig) -> Self {
        Self {
            mock: Arc::new(HeapTimerBackend::new()),
            wall: Arc::new(HeapTimerBackend::new()),
            config,
            started: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    fn ensure_thread(&self) {
        if self.started.load(Ordering::Acquire) {
            return;
        }
        let mut slot = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let sources = vec![
            TimerSource {
                backend: self.mock.clone(),
                clock: mock_domain_now,
            },
            TimerSource {
                backend: self.wall.clone(),
                clock: wall_now,
            },
        ];
        match spawn_timer_thread(sources, self.config.clone()) {
            Ok(handle) => {
                *slot = Some(handle);
                self.started.store(true, Ordering::Release);
            }
            // Retried on the next schedule
            Err(e) => kerror!("failed to start timer thread: {}", e),
        }
    }

    // ========================================================================
    // Mockable clock domain
    // ========================================================================

    /// Run `action` once at `deadline` (as read from `clock::now`)
    pub fn schedule_at(&self, deadline: Instant, action: TimerAction) -> TimerHandle {
        self.ensure_thread();
        let handle = self.mock.insert(TimerEntry::oneshot(deadline, action));
        ktrace!("timer {} armed", handle.raw());
        handle
    }

    /// Run `action` once, `delay` after `clock::now()`
    pub fn schedule_in(&self, delay: Duration, action: TimerAction) -> TimerHandle {
        self.schedule_at(clock::now() + delay, action)
    }

    /// Run `action` every `interval`, first at `clock::now() + interval`
    pub fn schedule_every(&self, interval: Duration, action: TimerAction) -> TimerHandle {
        self.ensure_thread();
        let entry = TimerEntry::periodic(clock::now() + interval, interval, action);
        let handle = self.mock.insert(entry);
        ktrace!("periodic timer {} armed ({:?})", handle.raw(), interval);
        handle
    }

    /// Fire every mockable timer due at `now`; returns how many ran
    pub fn poll_mock(&self, now: Instant) -> usize {
        fire(self.mock.poll_expired(now))
    }

    // ========================================================================
    // Wall clock domain
    // ========================================================================

    /// Run `action` once at a real-time `deadline`, unaffected by the mock clock
    pub fn schedule_wall_at(&self, deadline: Instant, action: TimerAction) -> TimerHandle {
        self.ensure_thread();
        self.wall.insert(TimerEntry::oneshot(deadline, action))
    }

    // ========================================================================
    // Cancellation and queries
    // ========================================================================

    /// Cancel a timer from either domain; true if it was still pending
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        self.mock.cancel(handle) || self.wall.cancel(handle)
    }

    /// Pending timers across both domains
    pub fn active_timers(&self) -> usize {
        self.mock.len() + self.wall.len()
    }

    /// Stop the timer thread (it restarts on the next schedule)
    pub fn shutdown(&self) -> Option<TimerStats> {
        let handle = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.started.store(false, Ordering::Release);
        handle.map(TimerThreadHandle::shutdown)
    }
}

impl std::fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("backend", &self.mock.name())
            .field("mock_timers", &self.mock.len())
            .field("wall_timers", &self.wall.len())
            .field("thread_running", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, TimerAction) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn wait_for(hits: &AtomicUsize, n: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::SeqCst) < n {
            if Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    #[test]
    fn test_wall_timer_fires_on_thread() {
        let registry = TimerRegistry::new(TimerThreadConfig::default());
        let (hits, action) = counter();

        registry.schedule_wall_at(Instant::now() + Duration::from_millis(5), action);
        assert!(wait_for(&hits, 1));

        let stats = registry.shutdown().unwrap();
        assert!(stats.timers_fired >= 1);
    }

    #[test]
    fn test_wall_timer_ignores_pinned_clock() {
        let _clock = clock::test_lock();
        clock::set_now(Instant::now() + Duration::from_secs(3600));

        let registry = TimerRegistry::new(TimerThreadConfig::default());
        let (hits, action) = counter();
        registry.schedule_wall_at(Instant::now() + Duration::from_millis(2), action);
        assert!(wait_for(&hits, 1));
        registry.shutdown();
    }

    #[test]
    fn test_mock_timer_waits_for_advance() {
        let _clock = clock::test_lock();
        let t0 = Instant::now();
        clock::set_now(t0);

        let registry = TimerRegistry::new(TimerThreadConfig::default());
        let (hits, action) = counter();
        let handle = registry.schedule_every(Duration::from_millis(100), action);

        // The timer thread leaves the pinned domain alone
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(registry.poll_mock(t0 + Duration::from_millis(100)), 1);
        assert_eq!(registry.poll_mock(t0 + Duration::from_millis(200)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(registry.cancel(handle));
        assert_eq!(registry.poll_mock(t0 + Duration::from_secs(10)), 0);
        assert_eq!(registry.active_timers(), 0);
        registry.shutdown();
    }

    #[test]
    fn test_cancel_unknown_handle() {
        let registry = TimerRegistry::new(TimerThreadConfig::default());
        assert!(!registry.cancel(TimerHandle::new()));
        assert!(registry.shutdown().is_none());
    }
}
