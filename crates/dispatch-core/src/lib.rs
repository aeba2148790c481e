//! # dispatch-core
//!
//! Core types shared by the fiberdispatch runtime and registry crates.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! All platform-specific implementations are in `dispatch-runtime`.
//!
//! ## Modules
//!
//! - `id` - fiber identifier type
//! - `state` - fiber and event loop lifecycle enums
//! - `cancel` - cancellation token for cooperative cancellation
//! - `error` - error types
//! - `spinlock` - internal spinlock primitive
//! - `kprint` - kernel-style debug printing macros
//! - `env` - environment variable utilities

pub mod id;
pub mod state;
pub mod cancel;
pub mod error;
pub mod spinlock;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::FiberId;
pub use state::{FiberState, LoopState};
pub use cancel::CancellationToken;
pub use error::{
    panic_message, DispatchError, DispatchResult, MemoryError, NoHandler, SchedError,
    SchedResult, WorkerError,
};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_opt};

/// Constants for memory layout and limits
pub mod constants {
    /// Guard page size (4 KB) placed below every fiber stack
    pub const GUARD_SIZE: usize = 4096;

    /// Smallest stack a fiber may be configured with
    pub const MIN_STACK_SIZE: usize = 64 * 1024;

    /// Maximum workers (OS threads) per event loop
    pub const MAX_WORKERS: usize = 64;
}
