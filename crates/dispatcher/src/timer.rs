//! Timers bound to a network
//!
//! A `Timer` measures time on the mockable clock and, when due, posts its
//! callback to the event loop of the network it was created for. The
//! callback never runs on the timer thread itself.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dispatch_core::{ktrace, CancellationToken};
use dispatch_runtime::timer::{registry, TimerHandle};
use dispatch_runtime::{event_loop, DefaultNetwork, EventLoop, Network};

/// Timer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimerState {
    /// Nothing scheduled yet
    Idle = 0,
    /// Waiting for a deadline (periodic timers stay here between fires)
    Scheduled = 1,
    /// A one-shot callback was posted
    Fired = 2,
    /// Cancelled before firing
    Cancelled = 3,
}

impl From<u8> for TimerState {
    fn from(v: u8) -> Self {
        match v {
            1 => TimerState::Scheduled,
            2 => TimerState::Fired,
            3 => TimerState::Cancelled,
            _ => TimerState::Idle,
        }
    }
}

/// What is armed right now; replaced by every `do_in` / `do_every`
struct Pending {
    handle: TimerHandle,
    token: CancellationToken,
}

pub struct Timer<N: Network = DefaultNetwork> {
    event_loop: Arc<EventLoop>,
    state: Arc<AtomicU8>,
    /// Also held by a firing action, so firing and re-arming never interleave
    pending: Arc<Mutex<Option<Pending>>>,
    _network: PhantomData<fn() -> N>,
}

impl Timer<DefaultNetwork> {
    /// A timer posting to the default network
    pub fn new() -> Self {
        Self::for_network()
    }
}

impl Default for Timer<DefaultNetwork> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Network> Timer<N> {
    /// A timer posting to network `N`
    pub fn for_network() -> Self {
        Self {
            event_loop: event_loop::<N>(),
            state: Arc::new(AtomicU8::new(TimerState::Idle as u8)),
            pending: Arc::new(Mutex::new(None)),
            _network: PhantomData,
        }
    }

    pub fn state(&self) -> TimerState {
        TimerState::from(self.state.load(Ordering::Acquire))
    }

    /// Post `callback` once, `delay` from now. Replaces any pending wait.
    pub fn do_in<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.lock_pending();
        Self::disarm(&mut pending);
        self.arm_once(&mut pending, delay, callback);
    }

    fn arm_once<F>(&self, pending: &mut Option<Pending>, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        let callback = Mutex::new(Some(callback));
        let event_loop = self.event_loop.clone();
        let state = self.state.clone();
        let slot = self.pending.clone();
        let armed = token.clone();

        self.state.store(TimerState::Scheduled as u8, Ordering::Release);
        let handle = registry().schedule_in(
            delay,
            Arc::new(move || {
                let _slot = lock(&slot);
                if armed.is_cancelled() {
                    return;
                }
                let Some(callback) = callback.lock().unwrap_or_else(PoisonError::into_inner).take() else {
                    return;
                };
                let _ = state.compare_exchange(
                    TimerState::Scheduled as u8,
                    TimerState::Fired as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                // A stopped network refuses the post and logs it
                let _ = event_loop.post(callback);
            }),
        );
        ktrace!("timer {} armed on {} in {:?}", handle.raw(), N::NAME, delay);
        *pending = Some(Pending { handle, token });
    }

    /// Post `callback` every `interval`, each deadline measured from the
    /// previous fire. Replaces any pending wait.
    pub fn do_every<F>(&self, interval: Duration, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut pending = self.lock_pending();
        Self::disarm(&mut pending);

        let token = CancellationToken::new();
        let callback = Arc::new(callback);
        let event_loop = self.event_loop.clone();
        let slot = self.pending.clone();
        let armed = token.clone();

        self.state.store(TimerState::Scheduled as u8, Ordering::Release);
        let handle = registry().schedule_every(
            interval,
            Arc::new(move || {
                let _slot = lock(&slot);
                if armed.is_cancelled() {
                    return;
                }
                let callback = callback.clone();
                let _ = event_loop.post(move || callback());
            }),
        );
        ktrace!("timer {} armed on {} every {:?}", handle.raw(), N::NAME, interval);
        *pending = Some(Pending { handle, token });
    }

    /// Prevent further firings. Callbacks already posted still run.
    ///
    /// Returns whether anything was armed.
    pub fn cancel(&self) -> bool {
        let mut pending = self.lock_pending();
        let was_armed = Self::disarm(&mut pending);
        if was_armed {
            let _ = self.state.compare_exchange(
                TimerState::Scheduled as u8,
                TimerState::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        was_armed
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<Pending>> {
        lock(&self.pending)
    }

    fn disarm(pending: &mut Option<Pending>) -> bool {
        match pending.take() {
            Some(p) => {
                p.token.cancel();
                registry().cancel(p.handle);
                true
            }
            None => false,
        }
    }
}

fn lock(slot: &Mutex<Option<Pending>>) -> MutexGuard<'_, Option<Pending>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<N: Network> Drop for Timer<N> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<N: Network> std::fmt::Debug for Timer<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("network", &N::NAME)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_runtime::{clock, network, promise};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    network!(TimerNet);

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Wait for everything already posted to the one-worker test network
    fn flush() {
        let (p, f) = promise();
        event_loop::<TimerNet>().post(move || p.set_value(())).unwrap();
        assert!(f.wait_for(Duration::from_secs(5)));
    }

    #[test]
    fn test_do_in_fires_once() {
        let _clock = clock::test_lock();
        clock::set_now(Instant::now());

        let timer = Timer::<TimerNet>::for_network();
        assert_eq!(timer.state(), TimerState::Idle);
        let (hits, cb) = counter();
        timer.do_in(Duration::from_millis(500), cb);
        assert_eq!(timer.state(), TimerState::Scheduled);

        clock::advance_time(Duration::from_millis(499));
        flush();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        clock::advance_time(Duration::from_millis(1));
        flush();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), TimerState::Fired);

        clock::advance_time(Duration::from_millis(500));
        flush();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_do_every_until_cancel() {
        let _clock = clock::test_lock();
        clock::set_now(Instant::now());

        let timer = Timer::<TimerNet>::for_network();
        let (hits, cb) = counter();
        timer.do_every(Duration::from_millis(500), cb);

        for expected in 1..=3 {
            clock::advance_time(Duration::from_millis(500));
            flush();
            assert_eq!(hits.load(Ordering::SeqCst), expected);
        }
        assert_eq!(timer.state(), TimerState::Scheduled);

        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert_eq!(timer.state(), TimerState::Cancelled);
        clock::advance_time(Duration::from_millis(1500));
        flush();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reschedule_replaces_pending() {
        let _clock = clock::test_lock();
        clock::set_now(Instant::now());

        let timer = Timer::<TimerNet>::for_network();
        let (first, cb1) = counter();
        let (second, cb2) = counter();
        timer.do_in(Duration::from_millis(100), cb1);
        timer.do_in(Duration::from_millis(200), cb2);

        clock::advance_time(Duration::from_millis(300));
        flush();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_cancels() {
        let _clock = clock::test_lock();
        clock::set_now(Instant::now());

        let (hits, cb) = counter();
        {
            let timer = Timer::<TimerNet>::for_network();
            timer.do_in(Duration::from_millis(10), cb);
        }
        clock::advance_time(Duration::from_millis(20));
        flush();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_fire_after_rearm_is_dropped() {
        let _clock = clock::test_lock();
        clock::set_now(Instant::now());

        let timer = Timer::<TimerNet>::for_network();
        let (stale, cb1) = counter();
        let (fresh, cb2) = counter();
        timer.do_in(Duration::from_millis(10), cb1);

        // The due action blocks on the slot while it is re-armed
        let mut guard = timer.lock_pending();
        let advancer = std::thread::spawn(|| {
            clock::advance_time(Duration::from_millis(20));
        });
        std::thread::sleep(Duration::from_millis(20));
        Timer::<TimerNet>::disarm(&mut guard);
        timer.arm_once(&mut guard, Duration::from_secs(3600), cb2);
        drop(guard);
        advancer.join().unwrap();

        flush();
        assert_eq!(stale.load(Ordering::SeqCst), 0);
        assert_eq!(fresh.load(Ordering::SeqCst), 0);
        assert_eq!(timer.state(), TimerState::Scheduled);
        assert!(timer.cancel());
    }

    #[test]
    fn test_callbacks_run_on_network_worker() {
        let _clock = clock::test_lock();
        clock::set_now(Instant::now());

        let timer = Timer::<TimerNet>::for_network();
        let (p, f) = promise();
        timer.do_in(Duration::from_millis(50), move || {
            let name = std::thread::current().name().map(String::from);
            p.set_value((name, dispatch_runtime::in_fiber()));
        });

        clock::advance_time(Duration::from_millis(50));
        // advance_time ran the timer action here, but not the callback
        assert!(!dispatch_runtime::in_fiber());
        assert_eq!(
            f.get(),
            Ok((Some("TimerNet-worker-0".to_string()), true))
        );
    }

    #[test]
    fn test_cancel_from_inside_periodic_callback() {
        let _clock = clock::test_lock();
        clock::set_now(Instant::now());

        let timer = Arc::new(Timer::<TimerNet>::for_network());
        let hits = Arc::new(AtomicUsize::new(0));
        let (h, t) = (hits.clone(), Arc::downgrade(&timer));
        timer.do_every(Duration::from_millis(100), move || {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(timer) = t.upgrade() {
                timer.cancel();
            }
        });

        for _ in 0..3 {
            clock::advance_time(Duration::from_millis(100));
            flush();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), TimerState::Cancelled);
    }

    #[test]
    fn test_wall_clock_when_unpinned() {
        let _clock = clock::test_lock();

        let timer = Timer::<TimerNet>::for_network();
        let (p, f) = promise();
        timer.do_in(Duration::from_millis(5), move || p.set_value(()));
        assert!(f.wait_for(Duration::from_secs(5)));
    }
}
