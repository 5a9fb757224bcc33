//! Read-only pool snapshots shared with the status server.

use super::handle::WorkerStatus;
use crate::sampler::SystemSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Aggregated worker statistics from the last metrics tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub total_requests: u64,
    /// Request-weighted mean across workers.
    pub avg_response_time_ms: f64,
}

impl PoolMetrics {
    /// Aggregate `(requests_served, avg_response_time_ms)` pairs.
    pub fn aggregate(workers: impl IntoIterator<Item = (u64, f64)>) -> Self {
        let (total, weighted) = workers
            .into_iter()
            .fold((0u64, 0.0f64), |(total, weighted), (served, avg)| {
                (total + served, weighted + served as f64 * avg)
            });
        Self {
            total_requests: total,
            avg_response_time_ms: if total == 0 {
                0.0
            } else {
                weighted / total as f64
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerView {
    pub id: u64,
    pub pid: u32,
    pub status: WorkerStatus,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub restart_count: u32,
    pub requests_served: u64,
    pub avg_response_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mib: Option<u64>,
}

/// Point-in-time view of the whole pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Live worker processes, including draining ones.
    pub total_workers: usize,
    /// Workers in the ready state.
    pub active_workers: usize,
    pub starting_workers: usize,
    pub draining_workers: usize,
    /// Replacements waiting out their restart delay.
    pub pending_restarts: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub baseline_workers: usize,
    pub autoscale_enabled: bool,
    pub shutting_down: bool,
    pub uptime_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sample: Option<SystemSample>,
    pub metrics: PoolMetrics,
    pub total_restarts: u64,
    pub failed_workers: u64,
    pub workers: Vec<WorkerView>,
}

/// Latest published snapshot.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<PoolStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, status: PoolStatus) {
        // A poisoned lock only means a reader panicked mid-clone
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = status;
    }

    pub fn snapshot(&self) -> PoolStatus {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_request_weighted() {
        let m = PoolMetrics::aggregate([(100, 10.0), (300, 2.0)]);
        assert_eq!(m.total_requests, 400);
        // (100*10 + 300*2) / 400
        assert!((m.avg_response_time_ms - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_empty_pool() {
        let m = PoolMetrics::aggregate(Vec::new());
        assert_eq!(m, PoolMetrics::default());
        let idle = PoolMetrics::aggregate([(0, 12.0)]);
        assert_eq!(idle.avg_response_time_ms, 0.0);
    }

    #[test]
    fn test_board_publish_and_snapshot() {
        let board = StatusBoard::new();
        let reader = board.clone();
        assert_eq!(reader.snapshot().total_workers, 0);

        board.publish(PoolStatus {
            total_workers: 3,
            active_workers: 2,
            ..Default::default()
        });
        let snap = reader.snapshot();
        assert_eq!(snap.total_workers, 3);
        assert_eq!(snap.active_workers, 2);
    }

    #[test]
    fn test_status_json_shape() {
        let status = PoolStatus {
            total_workers: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["total_workers"], 1);
        assert!(json.get("last_sample").is_none());
        assert!(json["workers"].as_array().unwrap().is_empty());

        let back: PoolStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
