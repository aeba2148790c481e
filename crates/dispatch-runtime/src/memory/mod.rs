//! Fiber stacks and the per-loop stack pool
//!
//! Every fiber runs on a fixed-size block with a `PROT_NONE` guard page at
//! its low end, so an overflow faults instead of corrupting a neighbour.
//! Finished fibers hand their block back to the owning loop's pool; blocks
//! are only unmapped when the pool itself is dropped.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
    } else {
        compile_error!("fiber stacks require a unix mmap implementation");
    }
}

use std::alloc::{handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use dispatch_core::constants::GUARD_SIZE;
use dispatch_core::error::MemoryError;
use dispatch_core::SpinLock;

/// One mapped fiber stack (guard page included)
pub struct Stack {
    /// Lowest mapped address (start of the guard page)
    base: NonNull<u8>,
    /// Total mapping length, guard included
    mapped: usize,
}

// Safety: a Stack is an owned memory mapping; nothing aliases it while it
// sits in a pool, and a running fiber has exclusive use of it.
unsafe impl Send for Stack {}

impl Stack {
    /// Map a stack with at least `usable` writable bytes.
    ///
    /// Aborts through the global allocation-error handler when the mapping
    /// cannot be created.
    pub fn allocate(usable: usize) -> Stack {
        match Self::try_allocate(usable) {
            Ok(stack) => stack,
            Err(_) => {
                let size = round_to_page(usable) + GUARD_SIZE;
                let layout = Layout::from_size_align(size, GUARD_SIZE)
                    .unwrap_or_else(|_| Layout::new::<[u8; GUARD_SIZE]>());
                handle_alloc_error(layout)
            }
        }
    }

    /// Map a stack, reporting failure instead of aborting
    pub fn try_allocate(usable: usize) -> Result<Stack, MemoryError> {
        let mapped = round_to_page(usable)
            .checked_add(GUARD_SIZE)
            .ok_or(MemoryError::AllocationFailed)?;
        let base = unix::map_stack(mapped)?;
        Ok(Stack { base, mapped })
    }

    /// Exclusive upper end of the stack (stacks grow down)
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // Safety: mapped is the exact length of the mapping at base
        unsafe { self.base.as_ptr().add(self.mapped) }
    }

    /// Lowest writable address, just above the guard page
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(GUARD_SIZE) }
    }

    /// Writable bytes
    #[inline]
    pub fn usable_size(&self) -> usize {
        self.mapped - GUARD_SIZE
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unix::unmap_stack(self.base, self.mapped);
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &self.bottom())
            .field("usable", &self.usable_size())
            .finish()
    }
}

fn round_to_page(size: usize) -> usize {
    let page = unix::page_size();
    size.div_ceil(page).max(1) * page
}

/// Counters describing a stack pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackPoolStats {
    /// Usable size of every stack in the pool
    pub stack_size: usize,
    /// Stacks mapped over the pool's lifetime
    pub allocated: usize,
    /// Stacks currently parked on the free list
    pub free: usize,
    /// `acquire` calls served from the free list
    pub reused: usize,
}

/// Free list of equally sized stacks
///
/// Grows without bound: `acquire` maps a new block whenever the free list is
/// empty.
pub struct StackPool {
    stack_size: usize,
    free: SpinLock<Vec<Stack>>,
    allocated: AtomicUsize,
    reused: AtomicUsize,
}

impl StackPool {
    pub fn new(stack_size: usize) -> Self {
        Self {
            stack_size,
            free: SpinLock::new(Vec::new()),
            allocated: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    /// Take a stack from the free list or map a fresh one
    pub fn acquire(&self) -> Stack {
        if let Some(stack) = self.free.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return stack;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Stack::allocate(self.stack_size)
    }

    /// Return a stack for reuse
    pub fn release(&self, stack: Stack) {
        debug_assert!(stack.usable_size() >= self.stack_size);
        self.free.lock().push(stack);
    }

    pub fn stats(&self) -> StackPoolStats {
        StackPoolStats {
            stack_size: self.stack_size,
            allocated: self.allocated.load(Ordering::Relaxed),
            free: self.free.lock().len(),
            reused: self.reused.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_is_writable_to_both_ends() {
        let stack = Stack::allocate(64 * 1024);
        assert!(stack.usable_size() >= 64 * 1024);
        assert_eq!(stack.top() as usize - stack.bottom() as usize, stack.usable_size());
        unsafe {
            stack.bottom().write(0xAA);
            stack.top().sub(1).write(0x55);
            assert_eq!(stack.bottom().read(), 0xAA);
        }
    }

    #[test]
    fn test_odd_size_rounds_up() {
        let stack = Stack::allocate(65 * 1024 + 3);
        assert!(stack.usable_size() >= 65 * 1024 + 3);
        assert_eq!(stack.usable_size() % unix::page_size(), 0);
    }

    #[test]
    fn test_pool_recycles() {
        let pool = StackPool::new(64 * 1024);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);

        let stats = pool.stats();
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.free, 2);

        let _c = pool.acquire();
        let stats = pool.stats();
        assert_eq!(stats.free, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.allocated, 2);
    }
}
