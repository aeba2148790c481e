//! Architecture-specific context switching
//!
//! Each backend provides the same three items:
//! - `SavedRegs`: callee-saved register block for one execution context
//! - `init_context`: prime a block so the first switch enters a fiber
//! - `switch_context`: save the current context and resume another

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{init_context, switch_context, SavedRegs};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{init_context, switch_context, SavedRegs};
    } else {
        compile_error!("fiber context switching is only implemented for x86_64 and aarch64");
    }
}

/// Signature of a fiber entry point, called with the `entry_arg` given to
/// `init_context`. When it returns, the trampoline calls `fiber::fiber_exit`,
/// which switches away for good.
pub type EntryFn = extern "C" fn(usize);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Stack;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Pair {
        main: SavedRegs,
        fiber: SavedRegs,
    }

    static HITS: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn bounce(arg: usize) {
        let pair = arg as *mut Pair;
        loop {
            HITS.fetch_add(1, Ordering::SeqCst);
            unsafe { switch_context(&mut (*pair).fiber, &(*pair).main) };
        }
    }

    #[test]
    fn test_switch_into_fresh_stack_and_back() {
        let stack = Stack::allocate(64 * 1024);
        let pair = Box::into_raw(Box::new(Pair {
            main: SavedRegs::default(),
            fiber: SavedRegs::default(),
        }));

        unsafe {
            init_context(&mut (*pair).fiber, stack.top(), bounce, pair as usize);
            switch_context(&mut (*pair).main, &(*pair).fiber);
        }
        assert_eq!(HITS.load(Ordering::SeqCst), 1);

        unsafe { switch_context(&mut (*pair).main, &(*pair).fiber) };
        assert_eq!(HITS.load(Ordering::SeqCst), 2);

        // The fiber stays parked inside `bounce`; its stack is simply unmapped
        drop(unsafe { Box::from_raw(pair) });
        drop(stack);
    }
}
