//! Restart budgeting for crashed workers.

use crate::config::PoolConfig;
use std::time::{Duration, Instant};

/// Restart history carried from a worker to its replacements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestartRecord {
    pub restart_count: u32,
    pub last_restart_at: Option<Instant>,
}

/// Outcome of consulting the policy after an unexpected exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Fork a replacement after `delay`.
    Restart { attempt: u32, delay: Duration },
    /// Budget exhausted within the window.
    GiveUp { restarts: u32 },
}

/// Bounded restarts within a sliding window.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    max_restarts: u32,
    window: Duration,
    delay: Duration,
}

impl RestartPolicy {
    pub fn new(max_restarts: u32, window: Duration, delay: Duration) -> Self {
        Self {
            max_restarts,
            window,
            delay,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(
            config.max_restarts,
            config.restart_window,
            config.restart_delay,
        )
    }

    /// Decide whether a crashed worker may be replaced, updating its record.
    ///
    /// The count resets once more than `window` has passed since the last
    /// restart, so a worker that stabilizes earns its budget back.
    pub fn evaluate(&self, record: &mut RestartRecord, now: Instant) -> RestartDecision {
        if let Some(last) = record.last_restart_at
            && now.saturating_duration_since(last) > self.window
        {
            record.restart_count = 0;
        }

        if record.restart_count >= self.max_restarts {
            return RestartDecision::GiveUp {
                restarts: record.restart_count,
            };
        }

        record.restart_count += 1;
        record.last_restart_at = Some(now);
        RestartDecision::Restart {
            attempt: record.restart_count,
            delay: self.delay,
        }
    }
}
