//! Ready Queue abstraction for fiber scheduling
//!
//! Provides a trait-based abstraction allowing different scheduling strategies.
//!
//! # Implementations
//! - `SimpleQueue` - Go-like shared injector + per-worker resume queues

mod simple;

pub use simple::SimpleQueue;

use std::sync::Arc;
use std::time::Duration;

use crate::fiber::Fiber;

/// A unit of work posted to an event loop
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// What a worker pulls off the queue
pub(crate) enum Work {
    /// A posted task that still needs a fiber
    Spawn(Task),
    /// A suspended fiber that was woken
    Resume(Arc<Fiber>),
}

/// Trait for ready queue implementations
///
/// All implementations must be thread-safe (Send + Sync).
pub(crate) trait ReadyQueue: Send + Sync {
    /// Queue a new task; any worker may pick it up
    fn push_task(&self, task: Task);

    /// Queue a woken fiber on its home worker
    fn push_resume(&self, worker_id: usize, fiber: Arc<Fiber>);

    /// Get next work item for this worker
    ///
    /// Order: resumes on this worker, then new tasks (with a periodic
    /// fairness check of the shared queue first)
    fn pop(&self, worker_id: usize) -> Option<Work>;

    /// Park worker until work is available or timeout
    fn park(&self, worker_id: usize, timeout: Duration);

    /// Wake all parked workers (shutdown)
    fn wake_all(&self);

    /// Remove every task that has not started yet
    fn drain_tasks(&self) -> Vec<Task>;

    /// Approximate queued count, tasks and resumes (for diagnostics)
    fn len(&self) -> usize;

    /// Check if empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
