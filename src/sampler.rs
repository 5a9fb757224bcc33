//! Host CPU and memory utilization sampling.
//!
//! Backed by `sysinfo`. Each sample refreshes CPU usage twice, the minimum
//! update interval apart, so the sampler keeps no state between calls.

use crate::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Host utilization at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    /// CPU busy percentage averaged across cores (0-100).
    pub cpu_percent: f64,
    /// Memory in use percentage (0-100).
    pub memory_percent: f64,
}

/// Source of host utilization samples.
pub trait SystemSampler: Send {
    fn sample(&self) -> Result<SystemSample>;
}

/// Sampler reading the host through `sysinfo`.
#[derive(Debug, Clone, Default)]
pub struct HostSampler;

impl HostSampler {
    pub fn new() -> Self {
        Self
    }
}

impl SystemSampler for HostSampler {
    fn sample(&self) -> Result<SystemSample> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(PoolError::Sampler(
                "host sampling is not supported on this platform".into(),
            ));
        }

        let mut sys = System::new();
        // CPU usage is a delta between two refreshes.
        sys.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let usages: Vec<f32> = sys.cpus().iter().map(|cpu| cpu.cpu_usage()).collect();
        let cpu_percent = average_cpu_usage(&usages)
            .ok_or_else(|| PoolError::Sampler("no CPUs reported".into()))?;
        let memory_percent = memory_percent(sys.used_memory(), sys.total_memory())
            .ok_or_else(|| PoolError::Sampler("total memory reported as zero".into()))?;

        Ok(SystemSample {
            cpu_percent,
            memory_percent,
        })
    }
}

/// Mean of per-core usage, clamped to 0-100.
fn average_cpu_usage(usages: &[f32]) -> Option<f64> {
    if usages.is_empty() {
        return None;
    }
    let sum: f64 = usages.iter().map(|&u| u as f64).sum();
    Some((sum / usages.len() as f64).clamp(0.0, 100.0))
}

fn memory_percent(used: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some((used as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
}
