//! Ping/pong bookkeeping for worker health checks.

use super::handle::WorkerId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct PendingPing {
    nonce: u64,
    deadline: Instant,
}

/// Tracks outstanding pings and their deadlines.
///
/// At most one ping is outstanding per worker. A pong only clears its ping
/// when the nonce matches, so a late answer to an earlier probe cannot mask a
/// worker that has since stopped responding.
#[derive(Debug)]
pub struct HealthProber {
    timeout: Duration,
    next_nonce: u64,
    pending: HashMap<WorkerId, PendingPing>,
}

impl HealthProber {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            next_nonce: 1,
            pending: HashMap::new(),
        }
    }

    /// Start a probe. Returns the nonce to send, or None if one is in flight.
    pub fn begin(&mut self, id: WorkerId, now: Instant) -> Option<u64> {
        if self.pending.contains_key(&id) {
            return None;
        }
        let nonce = self.next_nonce;
        self.next_nonce += 1;
        self.pending.insert(
            id,
            PendingPing {
                nonce,
                deadline: now + self.timeout,
            },
        );
        Some(nonce)
    }

    /// Record a pong. True if it answered the outstanding ping.
    pub fn on_pong(&mut self, id: WorkerId, nonce: u64) -> bool {
        match self.pending.get(&id) {
            Some(ping) if ping.nonce == nonce => {
                self.pending.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self, id: WorkerId) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Remove and return workers whose ping deadline has passed, lowest id first.
    pub fn take_expired(&mut self, now: Instant) -> Vec<WorkerId> {
        let mut expired: Vec<WorkerId> = self
            .pending
            .iter()
            .filter(|(_, ping)| now >= ping.deadline)
            .map(|(id, _)| *id)
            .collect();
        expired.sort();
        for id in &expired {
            self.pending.remove(id);
        }
        expired
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}
