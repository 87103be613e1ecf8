//! Scheduler configuration parameters.

use std::time::Duration;

/// Configuration for the worker pool and epoch cadence.
///
/// # Example
///
/// ```ignore
/// use sorrel_runtime::SchedulerConfig;
///
/// // Deterministic-ish test configuration: two workers, eager epochs.
/// let config = SchedulerConfig {
///     workers: 2,
///     epoch_cadence: 1,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of OS worker threads. The pool is fixed and symmetric: any
    /// worker may run any ready behavior.
    ///
    /// Default: available parallelism
    pub workers: usize,

    /// Scheduler loop iterations between epoch publishes.
    ///
    /// Lower values reclaim retired memory sooner at the cost of more
    /// shared-counter traffic.
    ///
    /// Default: 64
    pub epoch_cadence: u32,

    /// How long an idle worker sleeps before re-checking the queues.
    ///
    /// Idle workers are also woken eagerly whenever work is injected;
    /// the timeout only bounds how long a missed wakeup can linger.
    ///
    /// Default: 1ms
    pub park_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: available_workers(),
            epoch_cadence: 64,
            park_timeout: Duration::from_millis(1),
        }
    }
}

impl SchedulerConfig {
    /// Configuration with an explicit worker count.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.epoch_cadence == 0 {
            return Err(ConfigError::ZeroCadence);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// At least one worker thread is required.
    NoWorkers,
    /// Epoch cadence must be at least 1.
    ZeroCadence,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NoWorkers => write!(f, "scheduler needs at least one worker"),
            ConfigError::ZeroCadence => write!(f, "epoch cadence must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Number of available CPUs.
fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
