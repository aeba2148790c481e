//! Error types for the dispatch scheduler and registries

use core::fmt;
use std::any::Any;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Result type for registry operations that can fail for several reasons
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// The event loop is stopping or stopped and no longer accepts work
    Stopped,

    /// Worker count would exceed `constants::MAX_WORKERS`
    TooManyWorkers,

    /// Memory allocation/mapping failed
    MemoryError(MemoryError),

    /// Worker thread error
    WorkerError(WorkerError),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::Stopped => write!(f, "event loop stopped"),
            SchedError::TooManyWorkers => write!(f, "too many worker threads"),
            SchedError::MemoryError(e) => write!(f, "memory error: {}", e),
            SchedError::WorkerError(e) => write!(f, "worker error: {}", e),
        }
    }
}

impl std::error::Error for SchedError {}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap failed
    AllocationFailed,

    /// mprotect failed
    ProtectionFailed,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "memory allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "memory protection change failed"),
        }
    }
}

impl From<MemoryError> for SchedError {
    fn from(e: MemoryError) -> Self {
        SchedError::MemoryError(e)
    }
}

/// Worker thread related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Failed to spawn worker thread
    SpawnFailed,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::SpawnFailed => write!(f, "failed to spawn worker thread"),
        }
    }
}

impl From<WorkerError> for SchedError {
    fn from(e: WorkerError) -> Self {
        SchedError::WorkerError(e)
    }
}

/// Raised when a function slot is called with nothing attached
///
/// Carries the signature's name so the failure can be traced back to the
/// slot that was empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoHandler {
    pub signature: &'static str,
}

impl NoHandler {
    pub const fn new(signature: &'static str) -> Self {
        NoHandler { signature }
    }
}

impl fmt::Display for NoHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "function {} was called but no handler was attached",
            self.signature
        )
    }
}

impl std::error::Error for NoHandler {}

/// Failure delivered through a future
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The called slot had no handler at execution time
    NoHandler(NoHandler),

    /// The handler panicked; carries the panic payload message
    Panicked(String),

    /// The producing side was dropped without delivering a value
    BrokenPromise,

    /// The scheduler refused or abandoned the work
    Sched(SchedError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::NoHandler(e) => write!(f, "{}", e),
            DispatchError::Panicked(msg) => write!(f, "handler panicked: {}", msg),
            DispatchError::BrokenPromise => write!(f, "promise dropped without a value"),
            DispatchError::Sched(e) => write!(f, "scheduler error: {}", e),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::NoHandler(e) => Some(e),
            DispatchError::Sched(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NoHandler> for DispatchError {
    fn from(e: NoHandler) -> Self {
        DispatchError::NoHandler(e)
    }
}

impl From<SchedError> for DispatchError {
    fn from(e: SchedError) -> Self {
        DispatchError::Sched(e)
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
