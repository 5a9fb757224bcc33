//! Inputs to the supervisor event loop.

use super::handle::WorkerId;
use crate::error::Result;
use crate::sampler::SystemSample;
use crate::worker::{ExitCause, WorkerMessage};

/// Everything that can happen to the pool.
///
/// Worker monitors, tickers and the signal listener run on their own threads
/// and post these to the single thread that owns the supervisor.
#[derive(Debug)]
pub enum Event {
    /// A worker wrote a protocol message.
    Message { id: WorkerId, message: WorkerMessage },
    /// A worker process was reaped.
    Exited { id: WorkerId, cause: ExitCause },
    /// Time to ping ready workers.
    HealthTick,
    /// A host utilization sample (or the reason there is none).
    AutoscaleSample(Result<SystemSample>),
    /// Time to aggregate worker stats.
    MetricsTick,
    /// SIGTERM/SIGINT or an internal stop request.
    Terminate,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Exited { .. } => "exited",
            Self::HealthTick => "health_tick",
            Self::AutoscaleSample(_) => "autoscale_sample",
            Self::MetricsTick => "metrics_tick",
            Self::Terminate => "terminate",
        }
    }
}
