//! Fiber and event loop lifecycle states

/// State of a fiber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// Created, entry closure not yet started
    Created = 0,

    /// Queued on its home worker, waiting to be resumed
    Ready = 1,

    /// Currently executing on a worker
    Running = 2,

    /// Suspended until a waker resumes it
    Blocked = 3,

    /// Entry closure returned, stack can be recycled
    Finished = 4,
}

impl FiberState {
    /// Check if this fiber has terminated
    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, FiberState::Finished)
    }
}

impl From<u8> for FiberState {
    fn from(v: u8) -> Self {
        match v {
            0 => FiberState::Created,
            1 => FiberState::Ready,
            2 => FiberState::Running,
            3 => FiberState::Blocked,
            _ => FiberState::Finished,
        }
    }
}

impl From<FiberState> for u8 {
    fn from(state: FiberState) -> u8 {
        state as u8
    }
}

/// Lifecycle of an event loop ("network")
///
/// `Created → Running → Stopping → Stopped`. Stopped is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LoopState {
    /// Constructed, workers not yet started
    Created = 0,

    /// Accepting and executing work
    Running = 1,

    /// Draining: no new work accepted, in-flight fibers may finish
    Stopping = 2,

    /// All workers joined
    Stopped = 3,
}

impl LoopState {
    /// Whether `post` is accepted in this state
    #[inline]
    pub const fn accepts_work(&self) -> bool {
        matches!(self, LoopState::Created | LoopState::Running)
    }
}

impl From<u8> for LoopState {
    fn from(v: u8) -> Self {
        match v {
            0 => LoopState::Created,
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Stopped,
        }
    }
}
