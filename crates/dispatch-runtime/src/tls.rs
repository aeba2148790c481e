//! Thread-local storage for fiber context
//!
//! Provides fast access to the current worker and the fiber it is running.

use std::cell::{Cell, UnsafeCell};
use std::sync::Arc;

use crate::arch::SavedRegs;
use crate::fiber::Fiber;

thread_local! {
    /// Worker index for this OS thread (usize::MAX when not a worker)
    static WORKER_ID: Cell<usize> = const { Cell::new(usize::MAX) };

    /// Fiber currently running on this worker
    static CURRENT_FIBER: Cell<*const Fiber> = const { Cell::new(std::ptr::null()) };

    /// Scheduler context restored when a fiber switches out
    static SCHED_REGS: UnsafeCell<SavedRegs> = UnsafeCell::new(SavedRegs::default());
}

/// Set the current worker ID
#[inline]
pub fn set_worker_id(id: usize) {
    WORKER_ID.with(|cell| cell.set(id));
}

/// Clear the worker ID (worker exiting)
#[inline]
pub fn clear_worker_id() {
    WORKER_ID.with(|cell| cell.set(usize::MAX));
}

/// Try to get current worker ID, returns None if not on a worker thread
#[inline]
pub fn try_current_worker_id() -> Option<usize> {
    let id = WORKER_ID.with(|cell| cell.get());
    if id == usize::MAX {
        None
    } else {
        Some(id)
    }
}

/// Record the fiber this worker is about to run.
///
/// The caller keeps an `Arc` alive for as long as the pointer is set.
#[inline]
pub(crate) fn set_current_fiber(fiber: *const Fiber) {
    CURRENT_FIBER.with(|cell| cell.set(fiber));
}

/// Clear the current fiber (worker back in its scheduler loop)
#[inline]
pub(crate) fn clear_current_fiber() {
    CURRENT_FIBER.with(|cell| cell.set(std::ptr::null()));
}

/// The fiber running on this thread, if any
pub(crate) fn current_fiber() -> Option<Arc<Fiber>> {
    let ptr = CURRENT_FIBER.with(|cell| cell.get());
    if ptr.is_null() {
        return None;
    }
    // Safety: `run_fiber` holds a strong reference while the pointer is set
    unsafe {
        Arc::increment_strong_count(ptr);
        Some(Arc::from_raw(ptr))
    }
}

/// Raw pointer to the running fiber, null outside fibers
#[inline]
pub(crate) fn current_fiber_ptr() -> *const Fiber {
    CURRENT_FIBER.with(|cell| cell.get())
}

/// Check if we're running inside a fiber
#[inline]
pub fn is_in_fiber() -> bool {
    CURRENT_FIBER.with(|cell| !cell.get().is_null())
}

/// Save area for this worker's scheduler context
#[inline]
pub(crate) fn sched_regs() -> *mut SavedRegs {
    SCHED_REGS.with(|cell| cell.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_roundtrip() {
        std::thread::spawn(|| {
            assert_eq!(try_current_worker_id(), None);
            set_worker_id(3);
            assert_eq!(try_current_worker_id(), Some(3));
            clear_worker_id();
            assert_eq!(try_current_worker_id(), None);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_plain_thread_is_not_a_fiber() {
        assert!(!is_in_fiber());
        assert!(current_fiber().is_none());
    }
}
