//! Pool configuration and validation.

use crate::error::{PoolError, Result};
use std::time::Duration;

/// Number of CPU cores available to this process.
pub fn host_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Immutable settings for one supervisor run.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Workers forked at start (None = host core count).
    pub initial_workers: Option<usize>,
    pub min_workers: usize,
    pub max_workers: usize,
    /// Scale up when CPU percent exceeds this.
    pub cpu_threshold: f64,
    /// Scale up when memory percent exceeds this.
    pub memory_threshold: f64,
    /// Scale down only when CPU percent is below this.
    pub scale_down_cpu_threshold: f64,
    /// Scale down only when memory percent is below this.
    pub scale_down_memory_threshold: f64,
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,
    pub autoscale_interval: Duration,
    pub metrics_interval: Duration,
    /// How long a new worker may take to report ready.
    pub startup_timeout: Duration,
    /// Cooldown before a crashed worker is replaced.
    pub restart_delay: Duration,
    pub max_restarts: u32,
    pub restart_window: Duration,
    pub graceful_shutdown_timeout: Duration,
    pub autoscale: bool,
    /// Recycle workers reporting more resident memory than this.
    pub max_worker_memory_mib: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cores = host_cores();
        Self {
            initial_workers: None,
            min_workers: 1,
            max_workers: cores * 2,
            cpu_threshold: 80.0,
            memory_threshold: 85.0,
            scale_down_cpu_threshold: 50.0,
            scale_down_memory_threshold: 60.0,
            health_check_interval: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(5),
            autoscale_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(15),
            startup_timeout: Duration::from_secs(30),
            restart_delay: Duration::from_secs(1),
            max_restarts: 5,
            restart_window: Duration::from_secs(60),
            graceful_shutdown_timeout: Duration::from_secs(30),
            autoscale: true,
            max_worker_memory_mib: None,
        }
    }
}

impl PoolConfig {
    /// Reject settings the supervisor cannot run with.
    ///
    /// Called before any worker is forked.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(PoolError::Config("max_workers must be at least 1".into()));
        }
        if self.min_workers > self.max_workers {
            return Err(PoolError::Config(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }

        for (name, value) in [
            ("cpu_threshold", self.cpu_threshold),
            ("memory_threshold", self.memory_threshold),
            ("scale_down_cpu_threshold", self.scale_down_cpu_threshold),
            ("scale_down_memory_threshold", self.scale_down_memory_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(PoolError::Config(format!(
                    "{} must be between 0 and 100, got {}",
                    name, value
                )));
            }
        }
        if self.scale_down_cpu_threshold >= self.cpu_threshold {
            return Err(PoolError::Config(format!(
                "scale_down_cpu_threshold ({}) must be below cpu_threshold ({})",
                self.scale_down_cpu_threshold, self.cpu_threshold
            )));
        }
        if self.scale_down_memory_threshold >= self.memory_threshold {
            return Err(PoolError::Config(format!(
                "scale_down_memory_threshold ({}) must be below memory_threshold ({})",
                self.scale_down_memory_threshold, self.memory_threshold
            )));
        }

        for (name, value) in [
            ("health_check_interval", self.health_check_interval),
            ("health_check_timeout", self.health_check_timeout),
            ("autoscale_interval", self.autoscale_interval),
            ("metrics_interval", self.metrics_interval),
            ("startup_timeout", self.startup_timeout),
            ("graceful_shutdown_timeout", self.graceful_shutdown_timeout),
        ] {
            if value.is_zero() {
                return Err(PoolError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.health_check_timeout >= self.health_check_interval {
            return Err(PoolError::Config(format!(
                "health_check_timeout ({:?}) must be shorter than health_check_interval ({:?})",
                self.health_check_timeout, self.health_check_interval
            )));
        }
        if self.max_worker_memory_mib == Some(0) {
            return Err(PoolError::Config(
                "max_worker_memory_mib must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Requested initial size, before clamping.
    pub fn requested_workers(&self) -> usize {
        self.initial_workers.unwrap_or_else(host_cores)
    }

    /// Initial size clamped into `[min_workers, max_workers]`.
    pub fn initial_count(&self) -> usize {
        self.requested_workers()
            .clamp(self.min_workers, self.max_workers)
    }
}
