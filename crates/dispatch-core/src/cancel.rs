//! Cancellation token for cooperative cancellation
//!
//! Timers hand one of these to their scheduled action; replacing or dropping
//! the timer flips the token so an already queued action becomes a no-op.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag for checking and triggering cancellation
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new independent cancellation token
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation was requested through any clone
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_cancellation() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();
        let other = CancellationToken::new();

        token1.cancel();
        assert!(token2.is_cancelled());
        assert!(!other.is_cancelled());
    }
}
