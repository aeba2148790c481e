//! Timer entry and handle types

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Work run when a timer fires
///
/// Called on the timer thread (or inside `advance_time`), so it should
/// only hand work off, e.g. post to an event loop or wake a waiter.
pub type TimerAction = Arc<dyn Fn() + Send + Sync + 'static>;

/// Process-unique timer handle used for cancellation
///
/// A periodic timer keeps its handle across re-arms, so one `cancel`
/// stops every future firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

impl TimerHandle {
    /// Generate a new unique timer handle
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TimerHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw handle value (for logging)
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Type of timer - affects behavior on expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerType {
    /// Fires once and is forgotten
    Oneshot,

    /// Re-armed at `fired_at + interval` after each firing
    Periodic {
        interval: Duration,
    },
}

impl TimerType {
    #[inline]
    pub fn is_periodic(&self) -> bool {
        matches!(self, TimerType::Periodic { .. })
    }

    #[inline]
    pub fn periodic_interval(&self) -> Option<Duration> {
        match self {
            TimerType::Periodic { interval } => Some(*interval),
            TimerType::Oneshot => None,
        }
    }
}

/// Timer entry - stored in the timer backend
#[derive(Clone)]
pub struct TimerEntry {
    pub handle: TimerHandle,
    /// When this timer should fire, in the backend's clock domain
    pub deadline: Instant,
    pub timer_type: TimerType,
    pub action: TimerAction,
}

impl TimerEntry {
    /// Fire once at `deadline`
    pub fn oneshot(deadline: Instant, action: TimerAction) -> Self {
        Self {
            handle: TimerHandle::new(),
            deadline,
            timer_type: TimerType::Oneshot,
            action,
        }
    }

    /// Fire at `first`, then every `interval` after each firing
    pub fn periodic(first: Instant, interval: Duration, action: TimerAction) -> Self {
        Self {
            handle: TimerHandle::new(),
            deadline: first,
            timer_type: TimerType::Periodic { interval },
            action,
        }
    }

    /// Next occurrence of a periodic entry that fired at `fired_at`
    ///
    /// Returns None for one-shot timers. The handle is preserved.
    pub fn reschedule(&self, fired_at: Instant) -> Option<Self> {
        let interval = self.timer_type.periodic_interval()?;
        Some(Self {
            handle: self.handle,
            deadline: fired_at + interval,
            timer_type: self.timer_type,
            action: Arc::clone(&self.action),
        })
    }
}

impl std::fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerEntry")
            .field("handle", &self.handle)
            .field("deadline", &self.deadline)
            .field("timer_type", &self.timer_type)
            .finish_non_exhaustive()
    }
}
