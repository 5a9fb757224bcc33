//! Scaling decisions from host utilization samples.

use super::handle::WorkerId;
use crate::config::PoolConfig;
use crate::sampler::SystemSample;
use std::fmt;

/// Why a scaling action was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleReason {
    /// Pool fell below min_workers.
    BelowMinimum,
    /// Pool exceeds max_workers.
    AboveMaximum,
    /// CPU or memory above the scale-up threshold.
    HighLoad,
    /// CPU and memory below the scale-down thresholds.
    LowLoad,
}

impl fmt::Display for ScaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BelowMinimum => "below minimum",
            Self::AboveMaximum => "above maximum",
            Self::HighLoad => "high load",
            Self::LowLoad => "low load",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    ScaleUp(ScaleReason),
    ScaleDown(ScaleReason),
    Hold,
}

/// Threshold-based scaler with hysteresis.
///
/// Scale-up and scale-down thresholds are separate (scale-down strictly lower,
/// enforced by config validation), so a load level between them produces no
/// action in either direction. Scale-down also never goes below the baseline
/// the pool started with. At most one worker is added or removed per call.
#[derive(Debug, Clone)]
pub struct Autoscaler {
    min_workers: usize,
    max_workers: usize,
    baseline: usize,
    cpu_threshold: f64,
    memory_threshold: f64,
    scale_down_cpu_threshold: f64,
    scale_down_memory_threshold: f64,
}

impl Autoscaler {
    pub fn new(config: &PoolConfig, baseline: usize) -> Self {
        Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            baseline,
            cpu_threshold: config.cpu_threshold,
            memory_threshold: config.memory_threshold,
            scale_down_cpu_threshold: config.scale_down_cpu_threshold,
            scale_down_memory_threshold: config.scale_down_memory_threshold,
        }
    }

    pub fn baseline(&self) -> usize {
        self.baseline
    }

    /// Decide one step for a pool of `size` workers.
    pub fn decide(&self, size: usize, sample: &SystemSample) -> ScalingDecision {
        if size > self.max_workers {
            return ScalingDecision::ScaleDown(ScaleReason::AboveMaximum);
        }
        if size < self.min_workers {
            return ScalingDecision::ScaleUp(ScaleReason::BelowMinimum);
        }

        let high = sample.cpu_percent > self.cpu_threshold
            || sample.memory_percent > self.memory_threshold;
        if high && size < self.max_workers {
            return ScalingDecision::ScaleUp(ScaleReason::HighLoad);
        }

        let low = sample.cpu_percent < self.scale_down_cpu_threshold
            && sample.memory_percent < self.scale_down_memory_threshold;
        if low && size > self.min_workers && size > self.baseline {
            return ScalingDecision::ScaleDown(ScaleReason::LowLoad);
        }

        ScalingDecision::Hold
    }
}

/// Pick the scale-down victim: fewest requests served, lowest id on ties.
pub fn select_least_loaded(candidates: impl IntoIterator<Item = (WorkerId, u64)>) -> Option<WorkerId> {
    candidates
        .into_iter()
        .min_by_key(|(id, served)| (*served, *id))
        .map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaler(min: usize, max: usize, baseline: usize) -> Autoscaler {
        let config = PoolConfig {
            min_workers: min,
            max_workers: max,
            ..Default::default()
        };
        Autoscaler::new(&config, baseline)
    }

    fn sample(cpu: f64, mem: f64) -> SystemSample {
        SystemSample {
            cpu_percent: cpu,
            memory_percent: mem,
        }
    }

    #[test]
    fn test_high_cpu_scales_up() {
        let s = scaler(1, 8, 2);
        assert_eq!(
            s.decide(2, &sample(95.0, 10.0)),
            ScalingDecision::ScaleUp(ScaleReason::HighLoad)
        );
    }

    #[test]
    fn test_high_memory_alone_scales_up() {
        let s = scaler(1, 8, 2);
        assert_eq!(
            s.decide(2, &sample(10.0, 90.0)),
            ScalingDecision::ScaleUp(ScaleReason::HighLoad)
        );
    }

    #[test]
    fn test_never_beyond_max() {
        let s = scaler(1, 8, 2);
        assert_eq!(s.decide(8, &sample(99.0, 99.0)), ScalingDecision::Hold);
    }

    #[test]
    fn test_dead_band_holds() {
        let s = scaler(1, 8, 2);
        // Between scale-down (50/60) and scale-up (80/85)
        assert_eq!(s.decide(4, &sample(65.0, 70.0)), ScalingDecision::Hold);
        // Low CPU but memory in the band
        assert_eq!(s.decide(4, &sample(10.0, 70.0)), ScalingDecision::Hold);
    }

    #[test]
    fn test_low_load_scales_down_to_baseline_only() {
        let s = scaler(1, 8, 2);
        assert_eq!(
            s.decide(3, &sample(5.0, 20.0)),
            ScalingDecision::ScaleDown(ScaleReason::LowLoad)
        );
        assert_eq!(s.decide(2, &sample(5.0, 20.0)), ScalingDecision::Hold);
    }

    #[test]
    fn test_floor_and_ceiling_corrections() {
        let s = scaler(3, 5, 3);
        assert_eq!(
            s.decide(2, &sample(60.0, 70.0)),
            ScalingDecision::ScaleUp(ScaleReason::BelowMinimum)
        );
        assert_eq!(
            s.decide(6, &sample(99.0, 99.0)),
            ScalingDecision::ScaleDown(ScaleReason::AboveMaximum)
        );
    }

    #[test]
    fn test_min_respected_with_low_baseline() {
        let s = scaler(2, 8, 1);
        assert_eq!(s.decide(2, &sample(1.0, 1.0)), ScalingDecision::Hold);
    }

    #[test]
    fn test_select_least_loaded() {
        let picked = select_least_loaded([
            (WorkerId::new(1), 50),
            (WorkerId::new(2), 10),
            (WorkerId::new(3), 30),
        ]);
        assert_eq!(picked, Some(WorkerId::new(2)));
    }

    #[test]
    fn test_select_least_loaded_tie_breaks_on_id() {
        let picked = select_least_loaded([
            (WorkerId::new(7), 0),
            (WorkerId::new(4), 0),
            (WorkerId::new(9), 0),
        ]);
        assert_eq!(picked, Some(WorkerId::new(4)));
        assert_eq!(select_least_loaded(Vec::new()), None);
    }
}
