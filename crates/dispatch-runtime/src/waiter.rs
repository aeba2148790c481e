//! One-shot wakeup for whoever is waiting: a fiber or a plain OS thread
//!
//! A fiber waiter blocks its fiber (freeing the worker); a thread waiter
//! parks the thread. `notify` and the timeout race through a single
//! `notified` flag, so a waiter is resumed exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use crate::fiber::{self, Fiber};
use crate::timer::registry;
use crate::tls;

enum Parker {
    Fiber(Arc<Fiber>),
    Thread(Thread),
}

pub(crate) struct Waiter {
    parker: Parker,
    notified: AtomicBool,
    timed_out: AtomicBool,
}

impl Waiter {
    /// A waiter for the calling fiber, or the calling thread outside fibers
    pub(crate) fn current() -> Arc<Self> {
        let parker = match tls::current_fiber() {
            Some(fiber) => Parker::Fiber(fiber),
            None => Parker::Thread(thread::current()),
        };
        Arc::new(Waiter {
            parker,
            notified: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
        })
    }

    /// Resume the waiter. Returns false if it was already resumed.
    pub(crate) fn notify(&self) -> bool {
        if self.notified.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.resume();
        true
    }

    fn expire(&self) {
        if self.notified.swap(true, Ordering::AcqRel) {
            return;
        }
        self.timed_out.store(true, Ordering::Release);
        self.resume();
    }

    fn resume(&self) {
        match &self.parker {
            Parker::Fiber(fiber) => fiber.wake(),
            Parker::Thread(thread) => thread.unpark(),
        }
    }

    /// Wait for `notify`, or until `deadline` (real time) passes.
    ///
    /// Returns true when notified, false on timeout. Must be called once,
    /// by the fiber or thread that created the waiter.
    pub(crate) fn wait(self: &Arc<Self>, deadline: Option<Instant>) -> bool {
        match &self.parker {
            Parker::Fiber(_) => {
                let timer = deadline.map(|at| {
                    let waiter = Arc::clone(self);
                    registry().schedule_wall_at(at, Arc::new(move || waiter.expire()))
                });
                // Exactly one of notify/expire queues a resume for this block
                fiber::block_current();
                if let Some(handle) = timer {
                    registry().cancel(handle);
                }
            }
            Parker::Thread(_) => {
                while !self.notified.load(Ordering::Acquire) {
                    match deadline {
                        None => thread::park(),
                        Some(at) => {
                            let now = Instant::now();
                            if now >= at {
                                self.expire_in_place();
                                break;
                            }
                            thread::park_timeout(at - now);
                        }
                    }
                }
            }
        }
        !self.timed_out.load(Ordering::Acquire)
    }

    /// Thread-side timeout: no one needs unparking
    fn expire_in_place(&self) {
        if !self.notified.swap(true, Ordering::AcqRel) {
            self.timed_out.store(true, Ordering::Release);
        }
    }
}

/// Sleep for `duration` of real time.
///
/// Inside a fiber only the fiber sleeps; its worker keeps running other
/// work. Outside a fiber the OS thread sleeps.
pub fn sleep(duration: Duration) {
    if !tls::is_in_fiber() {
        thread::sleep(duration);
        return;
    }
    let waiter = Waiter::current();
    waiter.wait(Some(Instant::now() + duration));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_waiter_notified_from_other_thread() {
        let waiter = Waiter::current();
        let w = waiter.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            assert!(w.notify());
            assert!(!w.notify());
        });
        assert!(waiter.wait(None));
        t.join().unwrap();
    }

    #[test]
    fn test_thread_waiter_times_out() {
        let waiter = Waiter::current();
        let start = Instant::now();
        assert!(!waiter.wait(Some(start + Duration::from_millis(10))));
        assert!(start.elapsed() >= Duration::from_millis(10));
        // A late notify is a no-op
        assert!(!waiter.notify());
    }

    #[test]
    fn test_notify_before_wait() {
        let waiter = Waiter::current();
        assert!(waiter.notify());
        assert!(waiter.wait(Some(Instant::now() + Duration::from_secs(5))));
    }

    #[test]
    fn test_sleep_outside_fiber() {
        let start = Instant::now();
        sleep(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
