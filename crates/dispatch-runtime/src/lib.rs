//! # dispatch-runtime
//!
//! Platform-specific runtime for fiberdispatch.
//!
//! This crate provides:
//! - Fiber stacks (mmap with guard pages) and a per-loop stack pool
//! - Context switching (architecture-specific assembly)
//! - Event loops: worker threads multiplexing fibers, grouped in networks
//! - Promise/Future pairs that suspend fibers instead of workers
//! - A process-wide timer thread with a mockable clock

pub mod config;
pub mod memory;
pub mod arch;
pub mod timer;
pub mod network;
pub mod event_loop;
pub mod promise;
pub mod tls;
mod fiber;
mod ready_queue;
mod waiter;
mod worker;

// Re-exports
pub use config::{ConfigError, LoopConfig};
pub use event_loop::EventLoop;
pub use fiber::{in_fiber, yield_now};
pub use memory::StackPoolStats;
pub use network::{event_loop, shutdown_all, DefaultNetwork, Network};
pub use promise::{promise, Future, Promise};
pub use ready_queue::Task;
pub use timer::clock;
pub use waiter::sleep;
