//! Simple Go-like ready queue
//!
//! Design:
//! - Shared injector for new tasks (lock-free `SegQueue`)
//! - Per-worker resume queue (VecDeque, SpinLock); a suspended fiber only
//!   ever resumes on the worker whose stack switched it out
//! - One Mutex + Condvar for parking, with a sleeper count so pushers skip
//!   the lock when nobody is parked

use super::{ReadyQueue, Task, Work};
use crate::fiber::Fiber;
use dispatch_core::constants::MAX_WORKERS;
use dispatch_core::SpinLock;

use crossbeam_queue::SegQueue;
use std::collections::VecDeque;
use std::sync::atomic::{fence, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Check the shared queue first every N pops (Go uses 61)
const GLOBAL_CHECK_INTERVAL: u32 = 61;

/// Per-worker resume queue
struct LocalQueue {
    queue: SpinLock<VecDeque<Arc<Fiber>>>,
    len: AtomicUsize,
}

impl LocalQueue {
    fn new() -> Self {
        Self {
            queue: SpinLock::new(VecDeque::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Push to back. Never refuses: dropping a resume would strand the fiber.
    fn push(&self, fiber: Arc<Fiber>, capacity: usize) {
        let mut q = self.queue.lock();
        if q.capacity() == 0 {
            q.reserve(capacity);
        }
        q.push_back(fiber);
        self.len.store(q.len(), Ordering::SeqCst);
    }

    /// Pop from front
    fn pop(&self) -> Option<Arc<Fiber>> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut q = self.queue.lock();
        let item = q.pop_front();
        self.len.store(q.len(), Ordering::Release);
        item
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }
}

/// Shared injector + per-worker resume queues
pub struct SimpleQueue {
    global: SegQueue<Task>,
    local: Box<[LocalQueue]>,
    /// Per-worker pop counter for the periodic global check
    ticks: Box<[AtomicU32]>,
    local_capacity: usize,
    lock: Mutex<()>,
    cond: Condvar,
    sleepers: AtomicUsize,
}

impl SimpleQueue {
    pub fn new(local_capacity: usize) -> Self {
        Self {
            global: SegQueue::new(),
            local: (0..MAX_WORKERS).map(|_| LocalQueue::new()).collect(),
            ticks: (0..MAX_WORKERS).map(|_| AtomicU32::new(0)).collect(),
            local_capacity,
            lock: Mutex::new(()),
            cond: Condvar::new(),
            sleepers: AtomicUsize::new(0),
        }
    }

    /// Workers parked right now
    pub fn parked_count(&self) -> usize {
        self.sleepers.load(Ordering::Acquire)
    }

    /// Pairs with the fence in `park`: either the parker sees the new item,
    /// or we see the parker and notify under the lock it is waiting on.
    fn notify(&self, all: bool) {
        fence(Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) == 0 {
            return;
        }
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if all {
            self.cond.notify_all();
        } else {
            self.cond.notify_one();
        }
    }
}

impl Default for SimpleQueue {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ReadyQueue for SimpleQueue {
    fn push_task(&self, task: Task) {
        self.global.push(task);
        self.notify(false);
    }

    fn push_resume(&self, worker_id: usize, fiber: Arc<Fiber>) {
        self.local[worker_id].push(fiber, self.local_capacity);
        // Only the home worker can take it, so wake everyone
        self.notify(true);
    }

    fn pop(&self, worker_id: usize) -> Option<Work> {
        let tick = self.ticks[worker_id].fetch_add(1, Ordering::Relaxed);
        if tick % GLOBAL_CHECK_INTERVAL == GLOBAL_CHECK_INTERVAL - 1 {
            if let Some(task) = self.global.pop() {
                return Some(Work::Spawn(task));
            }
        }
        if let Some(fiber) = self.local[worker_id].pop() {
            return Some(Work::Resume(fiber));
        }
        self.global.pop().map(Work::Spawn)
    }

    fn park(&self, worker_id: usize, timeout: Duration) {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        if self.global.is_empty() && self.local[worker_id].len() == 0 {
            let _ = self.cond.wait_timeout(guard, timeout);
        } else {
            drop(guard);
        }
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
    }

    fn wake_all(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }

    fn drain_tasks(&self) -> Vec<Task> {
        let mut tasks = Vec::with_capacity(self.global.len());
        while let Some(task) = self.global.pop() {
            tasks.push(task);
        }
        tasks
    }

    fn len(&self) -> usize {
        self.global.len() + self.local.iter().map(LocalQueue::len).sum::<usize>()
    }
}
