//! Per-worker bookkeeping owned by the supervisor.

use super::launcher::WorkerProcess;
use super::restart::RestartRecord;
use crate::error::{PoolError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Supervisor-assigned worker identifier. Never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(u64);

impl WorkerId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Ready,
    Draining,
    Dead,
}

impl WorkerStatus {
    /// Permitted edges: starting→ready, ready→draining, anything live→dead.
    pub fn can_transition_to(self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        matches!(
            (self, next),
            (Starting, Ready) | (Ready, Draining) | (Starting | Ready | Draining, Dead)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the supervisor asked a worker to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retirement {
    /// Still wanted.
    #[default]
    None,
    /// Drained by the autoscaler; not replaced.
    ScaleDown,
    /// Over its memory limit; replaced without spending restart budget.
    Recycle,
    /// The whole pool is stopping.
    PoolShutdown,
}

/// Live worker record. Removed from the table when the process exits.
pub struct WorkerHandle {
    pub id: WorkerId,
    pub pid: u32,
    pub status: WorkerStatus,
    pub started_at: Instant,
    pub started_at_utc: DateTime<Utc>,
    pub restart: RestartRecord,
    pub requests_served: u64,
    pub avg_response_time_ms: f64,
    pub memory_mib: Option<u64>,
    pub retirement: Retirement,
    /// SIGKILL is sent if the process is still alive at this point.
    pub stop_deadline: Option<Instant>,
    /// SIGKILL already sent.
    pub killed: bool,
    process: Box<dyn WorkerProcess>,
}

impl WorkerHandle {
    pub fn new(
        id: WorkerId,
        process: Box<dyn WorkerProcess>,
        restart: RestartRecord,
        now: Instant,
    ) -> Self {
        Self {
            id,
            pid: process.pid(),
            status: WorkerStatus::Starting,
            started_at: now,
            started_at_utc: Utc::now(),
            restart,
            requests_served: 0,
            avg_response_time_ms: 0.0,
            memory_mib: None,
            retirement: Retirement::None,
            stop_deadline: None,
            killed: false,
            process,
        }
    }

    pub fn transition(&mut self, next: WorkerStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PoolError::Worker(format!(
                "worker {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn is_retiring(&self) -> bool {
        self.retirement != Retirement::None
    }

    /// Ready, not retiring, and not already being killed.
    pub fn is_serving(&self) -> bool {
        self.status == WorkerStatus::Ready && !self.is_retiring() && !self.killed
    }

    pub fn process_mut(&mut self) -> &mut dyn WorkerProcess {
        self.process.as_mut()
    }

    /// SIGKILL the process once; later calls are no-ops.
    pub fn force_kill(&mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }
        self.killed = true;
        self.process.kill()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("status", &self.status)
            .field("restart", &self.restart)
            .field("retirement", &self.retirement)
            .field("killed", &self.killed)
            .finish_non_exhaustive()
    }
}
