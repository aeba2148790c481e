//! Promise/Future pair: a one-shot result handed from a task to a waiter
//!
//! The `Future` can be waited on from a fiber (suspends the fiber) or from
//! any other thread (parks the thread). Dropping a `Promise` without
//! fulfilling it resolves the future with `DispatchError::BrokenPromise`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dispatch_core::{DispatchError, DispatchResult};

use crate::waiter::Waiter;

struct Slot<T> {
    value: Option<DispatchResult<T>>,
    waiters: Vec<Arc<Waiter>>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a connected promise/future pair
pub fn promise<T: Send + 'static>() -> (Promise<T>, Future<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            value: None,
            waiters: Vec::new(),
        }),
    });
    (
        Promise {
            shared: Some(shared.clone()),
        },
        Future { shared },
    )
}

/// Writing half
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Promise<T> {
    pub fn set_value(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn set_error(self, error: DispatchError) {
        self.complete(Err(error));
    }

    pub fn complete(mut self, result: DispatchResult<T>) {
        self.fulfil(result);
    }

    fn fulfil(&mut self, result: DispatchResult<T>) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        let waiters = {
            let mut slot = shared.lock();
            slot.value = Some(result);
            std::mem::take(&mut slot.waiters)
        };
        for waiter in waiters {
            waiter.notify();
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        self.fulfil(Err(DispatchError::BrokenPromise));
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").field("fulfilled", &self.shared.is_none()).finish()
    }
}

/// Reading half
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Future<T> {
    /// True once a value, an error or a broken promise has landed
    pub fn is_ready(&self) -> bool {
        self.shared.lock().value.is_some()
    }

    /// Block until ready
    pub fn wait(&self) {
        self.wait_deadline(None);
    }

    /// Block until ready or `timeout` elapses; true if ready
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.wait_deadline(Some(Instant::now() + timeout))
    }

    /// Block until ready or `deadline` passes; true if ready
    pub fn wait_until(&self, deadline: Instant) -> bool {
        self.wait_deadline(Some(deadline))
    }

    fn wait_deadline(&self, deadline: Option<Instant>) -> bool {
        let waiter = {
            let mut slot = self.shared.lock();
            if slot.value.is_some() {
                return true;
            }
            let waiter = Waiter::current();
            slot.waiters.push(waiter.clone());
            waiter
        };

        if waiter.wait(deadline) {
            return true;
        }

        let mut slot = self.shared.lock();
        slot.waiters.retain(|w| !Arc::ptr_eq(w, &waiter));
        slot.value.is_some()
    }

    /// Wait and take the result
    pub fn get(self) -> DispatchResult<T> {
        self.wait();
        self.take()
    }

    /// Take the result if ready, or hand the future back
    pub fn try_get(self) -> Result<DispatchResult<T>, Future<T>> {
        if self.is_ready() {
            Ok(self.take())
        } else {
            Err(self)
        }
    }

    fn take(self) -> DispatchResult<T> {
        self.shared
            .lock()
            .value
            .take()
            .unwrap_or(Err(DispatchError::BrokenPromise))
    }
}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future").field("ready", &self.is_ready()).finish()
    }
}
