//! Timer backend implementations
//!
//! - `HeapTimerBackend`: BinaryHeap with lazy cancellation

mod heap;

pub use heap::HeapTimerBackend;
