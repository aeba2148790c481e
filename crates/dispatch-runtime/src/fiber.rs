//! Fibers: stackful coroutines that carry posted tasks
//!
//! A fiber is pinned to the worker that first ran it. Only that worker
//! switches into it, so the register block, task and stack cells are never
//! touched by two threads at once. Other threads interact with a fiber
//! only through `wake`, which queues it on its home worker.

use std::cell::UnsafeCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use dispatch_core::{kerror, kwarn, panic_message, FiberId, FiberState};

use crate::arch::{self, SavedRegs};
use crate::event_loop::LoopShared;
use crate::memory::Stack;
use crate::ready_queue::Task;
use crate::tls;

pub(crate) struct Fiber {
    id: FiberId,
    regs: UnsafeCell<SavedRegs>,
    state: AtomicU8,
    /// Worker whose stack this fiber switches to and from
    home: usize,
    task: UnsafeCell<Option<Task>>,
    stack: UnsafeCell<Option<Stack>>,
    shared: Weak<LoopShared>,
}

// Safety: the cells are only accessed by the home worker thread (see module docs)
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    /// Create a fiber that will run `task` on `stack` when first switched to
    pub(crate) fn new(task: Task, stack: Stack, home: usize, shared: Weak<LoopShared>) -> Arc<Self> {
        let top = stack.top();
        let fiber = Arc::new(Fiber {
            id: FiberId::next(),
            regs: UnsafeCell::new(SavedRegs::default()),
            state: AtomicU8::new(FiberState::Created as u8),
            home,
            task: UnsafeCell::new(Some(task)),
            stack: UnsafeCell::new(Some(stack)),
            shared,
        });
        // Safety: the stack is owned by the fiber and outlives every switch into it
        unsafe {
            arch::init_context(fiber.regs.get(), top, fiber_main, Arc::as_ptr(&fiber) as usize);
        }
        fiber
    }

    #[inline]
    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    #[inline]
    pub(crate) fn home(&self) -> usize {
        self.home
    }

    #[inline]
    pub(crate) fn state(&self) -> FiberState {
        FiberState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: FiberState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Queue this fiber on its home worker.
    ///
    /// Callers must wake a blocked fiber exactly once per block; the
    /// `Waiter` gate guarantees that.
    pub(crate) fn wake(self: &Arc<Self>) {
        match self.shared.upgrade() {
            Some(shared) => shared.queue.push_resume(self.home, Arc::clone(self)),
            None => kwarn!("fiber {} woken after its loop was dropped", self.id),
        }
    }

    /// Take the stack back once the fiber has finished
    pub(crate) fn take_stack(&self) -> Option<Stack> {
        debug_assert!(self.state().is_terminated());
        // Safety: a finished fiber is never switched into again
        unsafe { (*self.stack.get()).take() }
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("home", &self.home)
            .finish()
    }
}

/// First code a fiber runs. Returning hands control to `fiber_exit`.
extern "C" fn fiber_main(arg: usize) {
    // Safety: `run_fiber` keeps the Arc alive while the fiber runs
    let fiber = unsafe { &*(arg as *const Fiber) };
    let task = unsafe { (*fiber.task.get()).take() };
    if let Some(task) = task {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            kerror!("task on fiber {} panicked: {}", fiber.id, panic_message(&*payload));
        }
    }
}

/// Called by the arch trampoline after `fiber_main` returns.
///
/// Marks the fiber finished and switches back to the scheduler for good.
pub(crate) extern "C" fn fiber_exit() -> ! {
    let ptr = tls::current_fiber_ptr();
    if !ptr.is_null() {
        // Safety: set by `run_fiber`, which holds a strong reference
        unsafe {
            let fiber = &*ptr;
            fiber.set_state(FiberState::Finished);
            arch::switch_context(fiber.regs.get(), tls::sched_regs());
        }
    }
    kerror!("finished fiber was resumed");
    std::process::abort()
}

/// Switch into `fiber` on the calling worker and return when it suspends
/// or finishes. Returns the state it left in.
pub(crate) fn run_fiber(fiber: &Arc<Fiber>) -> FiberState {
    fiber.set_state(FiberState::Running);
    tls::set_current_fiber(Arc::as_ptr(fiber));

    // Safety: only the home worker gets here, and the fiber is not running
    unsafe {
        arch::switch_context(tls::sched_regs(), fiber.regs.get());
    }

    tls::clear_current_fiber();
    fiber.state()
}

/// Suspend the current fiber and go back to the scheduler
fn switch_out(fiber: &Fiber, state: FiberState) {
    fiber.set_state(state);
    // Safety: we are running on the fiber's own stack on its home worker
    unsafe {
        arch::switch_context(fiber.regs.get(), tls::sched_regs());
    }
}

/// Yield the current fiber
///
/// Marks it Ready and switches back to the scheduler, which queues it
/// behind other work on this worker. Outside a fiber this yields the
/// OS thread.
pub fn yield_now() {
    match tls::current_fiber() {
        Some(fiber) => switch_out(&fiber, FiberState::Ready),
        None => std::thread::yield_now(),
    }
}

/// Block the current fiber until someone calls `wake` on it.
///
/// Must only be called from inside a fiber.
pub(crate) fn block_current() {
    match tls::current_fiber() {
        Some(fiber) => switch_out(&fiber, FiberState::Blocked),
        None => kerror!("block_current called outside a fiber"),
    }
}

/// Check if we're running inside a fiber
#[inline]
pub fn in_fiber() -> bool {
    tls::is_in_fiber()
}
