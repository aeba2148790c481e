//! Event loop: a named pool of workers running posted tasks on fibers
//!
//! Lifecycle: `Created → Running → Stopping → Stopped`. Workers start with
//! the loop; `set_worker_threads` adds more. `stop` refuses new work, lets
//! queued tasks and live fibers drain for the configured grace period and
//! then joins the workers.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use dispatch_core::constants::MAX_WORKERS;
use dispatch_core::{kdebug, kerror, kwarn, LoopState, SchedError, SchedResult};

use crate::config::LoopConfig;
use crate::memory::{StackPool, StackPoolStats};
use crate::ready_queue::{ReadyQueue, SimpleQueue, Task};
use crate::worker::spawn_worker;

/// State shared between an `EventLoop` handle, its workers and its fibers
pub(crate) struct LoopShared {
    pub(crate) name: String,
    pub(crate) config: LoopConfig,
    state: AtomicU8,
    /// Read by `post_task` across its state check and push, written by
    /// `stop` across the flip to Stopping
    admission: RwLock<()>,
    pub(crate) queue: Box<dyn ReadyQueue>,
    pub(crate) stacks: StackPool,
    pub(crate) live_fibers: AtomicUsize,
    worker_count: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stop_deadline: Mutex<Option<Instant>>,
}

impl LoopShared {
    #[inline]
    fn state(&self) -> LoopState {
        LoopState::from(self.state.load(Ordering::Acquire))
    }

    /// Stopping, and nothing left to run
    pub(crate) fn drained(&self) -> bool {
        self.state() >= LoopState::Stopping
            && self.queue.is_empty()
            && self.live_fibers.load(Ordering::Acquire) == 0
    }

    /// Stopping, and the grace period is over
    pub(crate) fn past_stop_deadline(&self) -> bool {
        if self.state() < LoopState::Stopping {
            return false;
        }
        let deadline = *self.stop_deadline.lock().unwrap_or_else(PoisonError::into_inner);
        deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Handle to one event loop
pub struct EventLoop {
    shared: Arc<LoopShared>,
}

impl EventLoop {
    /// Create a loop without starting any worker
    pub fn new(name: impl Into<String>, config: LoopConfig) -> Self {
        let shared = LoopShared {
            name: name.into(),
            queue: Box::new(SimpleQueue::new(config.local_queue_capacity)),
            stacks: StackPool::new(config.stack_size),
            config,
            state: AtomicU8::new(LoopState::Created as u8),
            admission: RwLock::new(()),
            live_fibers: AtomicUsize::new(0),
            worker_count: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
            stop_deadline: Mutex::new(None),
        };
        Self { shared: Arc::new(shared) }
    }

    /// Create a loop and start `config.num_workers` workers
    pub fn start(name: impl Into<String>, config: LoopConfig) -> SchedResult<Self> {
        let num_workers = config.num_workers;
        let event_loop = Self::new(name, config);
        event_loop.run(num_workers)?;
        Ok(event_loop)
    }

    /// Move a `Created` loop to `Running` with `num_workers` workers
    pub fn run(&self, num_workers: usize) -> SchedResult<usize> {
        let shared = &self.shared;
        if shared
            .state
            .compare_exchange(
                LoopState::Created as u8,
                LoopState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(SchedError::Stopped);
        }
        kdebug!("event loop {} starting with {} workers", shared.name, num_workers);
        match self.set_worker_threads(num_workers.max(1)) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.stop();
                Err(e)
            }
        }
    }

    /// Queue `task` to run on a fiber
    pub fn post<F>(&self, task: F) -> SchedResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_task(Box::new(task))
    }

    /// Queue an already boxed task
    pub fn post_task(&self, task: Task) -> SchedResult<()> {
        let _admitted = self.shared.admission.read().unwrap_or_else(PoisonError::into_inner);
        if !self.shared.state().accepts_work() {
            kwarn!("event loop {} is not accepting work, task dropped", self.shared.name);
            return Err(SchedError::Stopped);
        }
        self.shared.queue.push_task(task);
        Ok(())
    }

    /// Grow the worker pool to `count` threads; never shrinks.
    ///
    /// Returns the resulting worker count.
    pub fn set_worker_threads(&self, count: usize) -> SchedResult<usize> {
        if count > MAX_WORKERS {
            return Err(SchedError::TooManyWorkers);
        }
        let shared = &self.shared;
        let mut handles = shared.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if !shared.state().accepts_work() {
            return Err(SchedError::Stopped);
        }
        while handles.len() < count {
            let handle = spawn_worker(shared, handles.len())?;
            handles.push(handle);
            shared.worker_count.store(handles.len(), Ordering::Release);
        }
        Ok(handles.len())
    }

    /// Stop the loop. Idempotent.
    ///
    /// Queued tasks and live fibers get `stop_grace` to finish; tasks still
    /// queued after that are dropped. Joins every worker except the calling
    /// thread, which exits on its own once its current fiber returns.
    pub fn stop(&self) {
        let shared = &self.shared;
        let previous = {
            let _closed = shared.admission.write().unwrap_or_else(PoisonError::into_inner);
            shared.state.fetch_max(LoopState::Stopping as u8, Ordering::AcqRel)
        };
        if LoopState::from(previous) >= LoopState::Stopping {
            return;
        }
        kdebug!("event loop {} stopping", shared.name);

        *shared.stop_deadline.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Instant::now() + shared.config.stop_grace);
        shared.queue.wake_all();

        let handles = std::mem::take(&mut *shared.handles.lock().unwrap_or_else(PoisonError::into_inner));
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                kerror!("a worker of event loop {} panicked", shared.name);
            }
        }

        let dropped = shared.queue.drain_tasks();
        if !dropped.is_empty() {
            kwarn!("event loop {} dropped {} queued tasks", shared.name, dropped.len());
        }
        drop(dropped);

        shared.state.store(LoopState::Stopped as u8, Ordering::Release);
        kdebug!("event loop {} stopped", shared.name);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    pub fn config(&self) -> &LoopConfig {
        &self.shared.config
    }

    /// Worker threads started so far
    pub fn worker_count(&self) -> usize {
        self.shared.worker_count.load(Ordering::Acquire)
    }

    /// Tasks and resumes waiting for a worker
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    /// Fibers started and not yet finished
    pub fn live_fibers(&self) -> usize {
        self.shared.live_fibers.load(Ordering::Acquire)
    }

    pub fn stack_pool_stats(&self) -> StackPoolStats {
        self.shared.stacks.stats()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("workers", &self.worker_count())
            .field("pending", &self.pending_tasks())
            .field("live_fibers", &self.live_fibers())
            .finish()
    }
}
