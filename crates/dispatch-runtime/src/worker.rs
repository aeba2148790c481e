//! Worker thread management
//!
//! Workers are OS threads that run fibers for one event loop. Each worker
//! pulls new tasks from the loop's shared queue, wraps them in fibers and
//! resumes its own woken fibers.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use dispatch_core::{kdebug, kerror, kprint, kwarn, FiberState, SchedResult, WorkerError};

use crate::event_loop::LoopShared;
use crate::fiber::{self, Fiber};
use crate::ready_queue::{Task, Work};
use crate::tls;

/// Spawn worker `worker_id` for `shared`
pub(crate) fn spawn_worker(shared: &Arc<LoopShared>, worker_id: usize) -> SchedResult<JoinHandle<()>> {
    let thread_name = format!("{}-worker-{}", shared.name, worker_id);
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || worker_main_loop(shared, worker_id))
        .map_err(|e| {
            kerror!("failed to spawn {}: {}", thread_name, e);
            WorkerError::SpawnFailed.into()
        })
}

fn worker_main_loop(shared: Arc<LoopShared>, worker_id: usize) {
    tls::set_worker_id(worker_id);
    kprint::set_context(format!("{}/w{}", shared.name, worker_id));
    kdebug!("started");

    let spin_limit = shared.config.idle_spins;
    let park_timeout = shared.config.park_timeout;
    let mut idle_spins = 0u32;

    loop {
        if shared.past_stop_deadline() {
            kdebug!("stop grace period elapsed, exiting");
            break;
        }

        match shared.queue.pop(worker_id) {
            Some(Work::Spawn(task)) => {
                idle_spins = 0;
                spawn_fiber(&shared, worker_id, task);
            }
            Some(Work::Resume(fiber)) => {
                idle_spins = 0;
                run_on_worker(&shared, fiber);
            }
            None => {
                if shared.drained() {
                    kdebug!("drained, exiting");
                    break;
                }
                if idle_spins < spin_limit {
                    // Quick spin first (catch fast wake→resume cycles)
                    idle_spins += 1;
                    for _ in 0..32 {
                        std::hint::spin_loop();
                    }
                    thread::yield_now();
                } else {
                    shared.queue.park(worker_id, park_timeout);
                    idle_spins = 0;
                }
            }
        }
    }

    kprint::clear_context();
    tls::clear_worker_id();
}

/// Give `task` a fiber homed on this worker and start it
fn spawn_fiber(shared: &Arc<LoopShared>, worker_id: usize, task: Task) {
    let stack = shared.stacks.acquire();
    let fiber = Fiber::new(task, stack, worker_id, Arc::downgrade(shared));
    shared.live_fibers.fetch_add(1, Ordering::AcqRel);
    run_on_worker(shared, fiber);
}

/// Run a fiber until it suspends, then act on the state it left in
fn run_on_worker(shared: &LoopShared, fiber: Arc<Fiber>) {
    match fiber::run_fiber(&fiber) {
        FiberState::Ready => {
            // Yielded - back of this worker's queue
            shared.queue.push_resume(fiber.home(), fiber);
        }
        FiberState::Finished => {
            if let Some(stack) = fiber.take_stack() {
                shared.stacks.release(stack);
            }
            shared.live_fibers.fetch_sub(1, Ordering::AcqRel);
        }
        FiberState::Blocked => {
            // Whoever it waits on holds a waker
        }
        state => kwarn!("fiber {} switched out in unexpected state {:?}", fiber.id(), state),
    }
}
