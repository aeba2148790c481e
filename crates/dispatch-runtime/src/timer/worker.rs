//! Timer thread
//!
//! Single thread that polls timer backends and runs the actions of expired
//! entries. Each backend is paired with the clock it is keyed on; a clock
//! that returns None (the mock domain while pinned) is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dispatch_core::env::env_get;
use dispatch_core::error::{SchedResult, WorkerError};
use dispatch_core::{kdebug, kerror};

use crate::config::defaults;
use crate::timer::{fire, TimerBackend};

/// Configuration for the timer thread
#[derive(Debug, Clone)]
pub struct TimerThreadConfig {
    /// Maximum time between polls (even if no timers are due)
    pub max_poll_interval: Duration,

    /// Minimum sleep time (prevents busy-spinning)
    pub min_sleep: Duration,

    pub thread_name: String,

    /// Stack size for timer thread (None = system default)
    pub stack_size: Option<usize>,
}

impl Default for TimerThreadConfig {
    fn default() -> Self {
        Self {
            max_poll_interval: Duration::from_micros(defaults::TIMER_MAX_POLL_US),
            min_sleep: Duration::from_micros(50),
            thread_name: "dispatch-timer".into(),
            stack_size: None,
        }
    }
}

impl TimerThreadConfig {
    /// Defaults with `DSP_TIMER_MAX_POLL_US` applied
    pub fn from_env() -> Self {
        let default = Self::default();
        let max_poll_us = env_get("DSP_TIMER_MAX_POLL_US", defaults::TIMER_MAX_POLL_US).max(1);
        Self {
            max_poll_interval: Duration::from_micros(max_poll_us),
            min_sleep: default.min_sleep.min(Duration::from_micros(max_poll_us)),
            ..default
        }
    }
}

/// Clock paired with a backend; None means "not polled right now"
pub type SourceClock = fn() -> Option<Instant>;

/// A backend the timer thread polls
#[derive(Clone)]
pub struct TimerSource {
    pub backend: Arc<dyn TimerBackend>,
    pub clock: SourceClock,
}

/// Statistics from timer thread execution
#[derive(Debug, Clone, Default)]
pub struct TimerStats {
    pub poll_count: u64,
    pub timers_fired: u64,
    /// Time spent polling and running actions
    pub poll_time: Duration,
    pub max_batch_size: usize,
}

/// Handle to a running timer thread
pub struct TimerThreadHandle {
    handle: Option<JoinHandle<TimerStats>>,
    shutdown: Arc<AtomicBool>,
}

impl TimerThreadHandle {
    /// Request shutdown and wait for the timer thread to exit
    pub fn shutdown(mut self) -> TimerStats {
        self.join()
    }

    /// Request shutdown without waiting
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn join(&mut self) -> TimerStats {
        self.request_shutdown();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                kerror!("timer thread panicked");
                TimerStats::default()
            }
            None => TimerStats::default(),
        }
    }
}

impl Drop for TimerThreadHandle {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.join();
        }
    }
}

/// Spawn the timer thread over `sources`
pub fn spawn_timer_thread(
    sources: Vec<TimerSource>,
    config: TimerThreadConfig,
) -> SchedResult<TimerThreadHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    let mut builder = thread::Builder::new().name(config.thread_name.clone());
    if let Some(stack_size) = config.stack_size {
        builder = builder.stack_size(stack_size);
    }

    let handle = builder
        .spawn(move || timer_loop(sources, shutdown_clone, config))
        .map_err(|_| WorkerError::SpawnFailed)?;

    Ok(TimerThreadHandle {
        handle: Some(handle),
        shutdown,
    })
}

fn timer_loop(sources: Vec<TimerSource>, shutdown: Arc<AtomicBool>, config: TimerThreadConfig) -> TimerStats {
    kdebug!("timer thread started ({} sources)", sources.len());
    let mut stats = TimerStats::default();

    while !shutdown.load(Ordering::Acquire) {
        let poll_start = Instant::now();
        let mut batch = 0;

        for source in &sources {
            if let Some(now) = (source.clock)() {
                batch += fire(source.backend.poll_expired(now));
            }
        }

        stats.poll_count += 1;
        stats.timers_fired += batch as u64;
        stats.max_batch_size = stats.max_batch_size.max(batch);
        stats.poll_time += poll_start.elapsed();

        let sleep = calculate_sleep(&sources, &config);
        if sleep > Duration::ZERO {
            thread::sleep(sleep);
        }
    }

    kdebug!("timer thread exiting after {} polls", stats.poll_count);
    stats
}

/// Sleep until the earliest deadline across sources, within
/// [min_sleep, max_poll_interval]
fn calculate_sleep(sources: &[TimerSource], config: &TimerThreadConfig) -> Duration {
    let until_next = sources
        .iter()
        .filter_map(|s| Some(s.backend.next_deadline()?.saturating_duration_since((s.clock)()?)))
        .min();

    match until_next {
        Some(Duration::ZERO) => Duration::ZERO,
        Some(d) => d.min(config.max_poll_interval).max(config.min_sleep),
        None => config.max_poll_interval,
    }
}
