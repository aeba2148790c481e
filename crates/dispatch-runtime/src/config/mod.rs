//! Event loop configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. User's `DSP_CONFIG_RS` file (merged by build.rs)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use dispatch_runtime::config::LoopConfig;
//!
//! let config = LoopConfig::from_env()
//!     .num_workers(2)
//!     .stop_grace(Duration::from_millis(200));
//! ```

pub mod defaults;

use std::time::Duration;

use dispatch_core::constants::{MAX_WORKERS, MIN_STACK_SIZE};
use dispatch_core::env::env_get;

/// Event loop configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Worker threads started with the loop (at least one)
    pub num_workers: usize,
    /// Usable stack bytes per fiber, excluding the guard page
    pub stack_size: usize,
    /// How long `stop` lets queued tasks and live fibers drain
    pub stop_grace: Duration,
    /// Empty polls before a worker parks
    pub idle_spins: u32,
    /// Upper bound on one park, so stop requests are noticed
    pub park_timeout: Duration,
    /// Initial capacity of each worker's resume queue
    pub local_queue_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LoopConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `DSP_NUM_WORKERS` - worker threads started with the loop
    /// - `DSP_STACK_SIZE` - fiber stack size in bytes
    /// - `DSP_STOP_GRACE_MS` - drain period for `stop`
    /// - `DSP_IDLE_SPINS` - spins before parking
    /// - `DSP_PARK_TIMEOUT_MS` - park timeout in milliseconds
    /// - `DSP_LOCAL_QUEUE_CAPACITY` - per-worker resume queue size
    pub fn from_env() -> Self {
        Self {
            num_workers: env_get("DSP_NUM_WORKERS", defaults::NUM_WORKERS),
            stack_size: env_get("DSP_STACK_SIZE", defaults::STACK_SIZE),
            stop_grace: Duration::from_millis(env_get(
                "DSP_STOP_GRACE_MS",
                defaults::STOP_GRACE_MS,
            )),
            idle_spins: env_get("DSP_IDLE_SPINS", defaults::IDLE_SPINS),
            park_timeout: Duration::from_millis(env_get(
                "DSP_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
            local_queue_capacity: env_get(
                "DSP_LOCAL_QUEUE_CAPACITY",
                defaults::LOCAL_QUEUE_CAPACITY,
            ),
        }
    }

    /// Create config with compile-time defaults only (no env override).
    pub fn new() -> Self {
        Self {
            num_workers: defaults::NUM_WORKERS,
            stack_size: defaults::STACK_SIZE,
            stop_grace: Duration::from_millis(defaults::STOP_GRACE_MS),
            idle_spins: defaults::IDLE_SPINS,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            local_queue_capacity: defaults::LOCAL_QUEUE_CAPACITY,
        }
    }

    // Builder methods

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn stop_grace(mut self, d: Duration) -> Self {
        self.stop_grace = d;
        self
    }

    pub fn idle_spins(mut self, spins: u32) -> Self {
        self.idle_spins = spins;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn local_queue_capacity(mut self, cap: usize) -> Self {
        self.local_queue_capacity = cap;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue("num_workers must be > 0"));
        }
        if self.num_workers > MAX_WORKERS {
            return Err(ConfigError::InvalidValue("num_workers exceeds MAX_WORKERS"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("stack_size must be >= 64KB"));
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("park_timeout must be > 0"));
        }
        if self.local_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("local_queue_capacity must be > 0"));
        }
        Ok(())
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LoopConfig::new();
        assert_eq!(config.num_workers, defaults::NUM_WORKERS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = LoopConfig::new()
            .num_workers(3)
            .stop_grace(Duration::from_millis(5))
            .stack_size(128 * 1024);

        assert_eq!(config.num_workers, 3);
        assert_eq!(config.stop_grace, Duration::from_millis(5));
        assert_eq!(config.stack_size, 128 * 1024);
    }

    #[test]
    fn test_validation() {
        assert!(LoopConfig::new().num_workers(0).validate().is_err());
        assert!(LoopConfig::new().num_workers(MAX_WORKERS + 1).validate().is_err());
        assert_eq!(
            LoopConfig::new().stack_size(4096).validate(),
            Err(ConfigError::InvalidValue("stack_size must be >= 64KB"))
        );
        assert!(LoopConfig::new().park_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("DSP_STOP_GRACE_MS", "25");
        let config = LoopConfig::from_env();
        std::env::remove_var("DSP_STOP_GRACE_MS");
        assert_eq!(config.stop_grace, Duration::from_millis(25));
    }
}
