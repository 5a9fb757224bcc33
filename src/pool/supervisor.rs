//! The pool state machine.
//!
//! [`Supervisor`] owns the worker table and is driven by a single thread:
//! every state change happens inside [`Supervisor::handle`] (for events) or
//! [`Supervisor::poll`] (for deadlines). Time is always passed in, so the
//! whole lifecycle can be exercised with synthetic clocks.

use super::autoscale::{Autoscaler, ScalingDecision, select_least_loaded};
use super::event::Event;
use super::handle::{Retirement, WorkerHandle, WorkerId, WorkerStatus};
use super::health::HealthProber;
use super::launcher::Launcher;
use super::restart::{RestartDecision, RestartPolicy, RestartRecord};
use super::status::{PoolMetrics, PoolStatus, WorkerView};
use crate::config::PoolConfig;
use crate::error::Result;
use crate::sampler::SystemSample;
use crate::worker::{ControlMessage, ExitCause, WorkerMessage};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Time after the shutdown deadline for force-killed workers to be reaped.
const REAP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    ShuttingDown,
    /// Drained on purpose by the autoscaler.
    Retired,
    UnknownWorker,
}

/// What to do about a worker that just exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Fork a replacement after the restart delay, inheriting `lineage`.
    Restart {
        delay: Duration,
        lineage: RestartRecord,
    },
    /// Fork a replacement now without touching the restart budget.
    Replace { lineage: RestartRecord },
    /// Restart budget exhausted.
    Abandon { restarts: u32 },
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy)]
struct PendingFork {
    due: Instant,
    lineage: RestartRecord,
    replaces: WorkerId,
}

pub struct Supervisor<L: Launcher> {
    config: PoolConfig,
    launcher: L,
    workers: BTreeMap<WorkerId, WorkerHandle>,
    next_id: u64,
    restart_policy: RestartPolicy,
    autoscaler: Autoscaler,
    prober: HealthProber,
    pending: Vec<PendingFork>,
    shutting_down: Arc<AtomicBool>,
    shutdown_deadline: Option<Instant>,
    started_at: Option<Instant>,
    startup_deadline: Option<Instant>,
    last_sample: Option<SystemSample>,
    metrics: PoolMetrics,
    total_restarts: u64,
    failed_workers: u64,
}

impl<L: Launcher> Supervisor<L> {
    /// Validate `config` and build an idle supervisor. No worker is forked yet.
    pub fn new(config: PoolConfig, launcher: L) -> Result<Self> {
        config.validate()?;
        let baseline = config.initial_count();

        Ok(Self {
            autoscaler: Autoscaler::new(&config, baseline),
            restart_policy: RestartPolicy::from_config(&config),
            prober: HealthProber::new(config.health_check_timeout),
            config,
            launcher,
            workers: BTreeMap::new(),
            next_id: 1,
            pending: Vec::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_deadline: None,
            started_at: None,
            startup_deadline: None,
            last_sample: None,
            metrics: PoolMetrics::default(),
            total_restarts: 0,
            failed_workers: 0,
        })
    }

    /// Flag set once shutdown begins; periodic tasks stop when they see it.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutting_down.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Fork the initial workers.
    pub fn start(&mut self, now: Instant) {
        let requested = self.config.requested_workers();
        let count = self.config.initial_count();
        if requested != count {
            warn!(
                requested,
                workers = count,
                min = self.config.min_workers,
                max = self.config.max_workers,
                "Initial worker count clamped to pool bounds"
            );
        }
        info!(
            workers = count,
            min = self.config.min_workers,
            max = self.config.max_workers,
            autoscale = self.config.autoscale,
            "Starting worker pool"
        );

        self.started_at = Some(now);
        self.startup_deadline = Some(now + self.config.startup_timeout);
        for _ in 0..count {
            self.fork_worker(RestartRecord::default(), now);
        }
    }

    pub fn handle(&mut self, event: Event, now: Instant) {
        trace!(event = event.kind(), "Handling event");
        match event {
            Event::Message { id, message } => self.on_message(id, message, now),
            Event::Exited { id, cause } => {
                let action = self.on_worker_exit(id, &cause, now);
                self.apply_exit_action(id, action, now);
            }
            Event::HealthTick => self.run_health_check(now),
            Event::AutoscaleSample(sample) => self.run_autoscale(sample, now),
            Event::MetricsTick => self.collect_metrics(now),
            Event::Terminate => self.begin_shutdown(now),
        }
    }

    /// Act on every deadline that has passed.
    pub fn poll(&mut self, now: Instant) {
        self.fork_due(now);
        self.expire_health_checks(now);
        self.enforce_startup_timeouts(now);
        self.enforce_stop_deadlines(now);
        self.check_startup_complete(now);
    }

    /// True once shutdown has begun and every worker is gone (or the
    /// deadline plus a reaping grace period has passed).
    pub fn is_finished(&self, now: Instant) -> bool {
        if !self.is_shutting_down() {
            return false;
        }
        self.workers.is_empty()
            || self
                .shutdown_deadline
                .is_some_and(|deadline| now >= deadline + REAP_GRACE)
    }

    fn fork_worker(&mut self, lineage: RestartRecord, now: Instant) -> Option<WorkerId> {
        if self.is_shutting_down() {
            debug!("Not forking a worker during shutdown");
            return None;
        }

        let id = WorkerId::new(self.next_id);
        self.next_id += 1;

        match self.launcher.launch(id) {
            Ok(process) => {
                let handle = WorkerHandle::new(id, process, lineage, now);
                info!(
                    worker_id = %id,
                    pid = handle.pid,
                    restart_count = lineage.restart_count,
                    "Forked worker"
                );
                self.workers.insert(id, handle);
                Some(id)
            }
            Err(e) => {
                error!(worker_id = %id, error = %e, "Failed to fork worker");
                let action = self.decide_restart(id, lineage, now);
                self.apply_exit_action(id, action, now);
                None
            }
        }
    }

    fn on_message(&mut self, id: WorkerId, message: WorkerMessage, now: Instant) {
        let Some(handle) = self.workers.get_mut(&id) else {
            trace!(worker_id = %id, "Message from a worker no longer in the table");
            return;
        };

        match message {
            WorkerMessage::Ready => {
                if handle.status != WorkerStatus::Starting || handle.killed {
                    debug!(worker_id = %id, status = %handle.status, "Ignoring ready message");
                    return;
                }
                if let Err(e) = handle.transition(WorkerStatus::Ready) {
                    warn!(error = %e, "Invalid worker transition");
                    return;
                }
                info!(
                    worker_id = %id,
                    pid = handle.pid,
                    startup_ms = now.saturating_duration_since(handle.started_at).as_millis() as u64,
                    "Worker ready"
                );
                self.check_startup_complete(now);
            }
            WorkerMessage::Pong { nonce } => {
                if self.prober.on_pong(id, nonce) {
                    trace!(worker_id = %id, nonce, "Health check passed");
                } else {
                    debug!(worker_id = %id, nonce, "Ignoring stale pong");
                }
            }
            WorkerMessage::Stats {
                requests_served,
                avg_response_time_ms,
                memory_mib,
            } => {
                handle.requests_served = requests_served;
                handle.avg_response_time_ms = avg_response_time_ms;
                if memory_mib.is_some() {
                    handle.memory_mib = memory_mib;
                }
            }
            WorkerMessage::Drained => {
                if handle.status != WorkerStatus::Draining {
                    debug!(worker_id = %id, status = %handle.status, "Unexpected drained message");
                    return;
                }
                debug!(worker_id = %id, "Worker drained, sending SIGTERM");
                if let Err(e) = handle.process_mut().terminate() {
                    debug!(worker_id = %id, error = %e, "Failed to signal drained worker");
                }
            }
        }
    }

    /// Remove an exited worker from the table and decide what replaces it.
    pub fn on_worker_exit(&mut self, id: WorkerId, cause: &ExitCause, now: Instant) -> ExitAction {
        self.prober.cancel(id);
        let Some(mut handle) = self.workers.remove(&id) else {
            debug!(worker_id = %id, %cause, "Exit from unknown worker");
            return ExitAction::Ignore(IgnoreReason::UnknownWorker);
        };
        let last_status = handle.status;
        if let Err(e) = handle.transition(WorkerStatus::Dead) {
            warn!(error = %e, "Invalid worker transition");
        }
        let uptime_secs = now.saturating_duration_since(handle.started_at).as_secs();

        if self.is_shutting_down() {
            info!(worker_id = %id, pid = handle.pid, %cause, "Worker exited during shutdown");
            return ExitAction::Ignore(IgnoreReason::ShuttingDown);
        }

        match handle.retirement {
            Retirement::ScaleDown => {
                info!(worker_id = %id, pid = handle.pid, %cause, "Retired worker exited");
                ExitAction::Ignore(IgnoreReason::Retired)
            }
            Retirement::Recycle => {
                info!(worker_id = %id, pid = handle.pid, %cause, "Recycled worker exited, replacing");
                ExitAction::Replace {
                    lineage: handle.restart,
                }
            }
            Retirement::PoolShutdown => ExitAction::Ignore(IgnoreReason::ShuttingDown),
            Retirement::None => {
                if cause.is_clean() {
                    info!(
                        worker_id = %id,
                        pid = handle.pid,
                        status = %last_status,
                        uptime_secs,
                        "Worker exited on its own"
                    );
                } else {
                    warn!(
                        worker_id = %id,
                        pid = handle.pid,
                        status = %last_status,
                        cause = %cause,
                        uptime_secs,
                        "Worker died unexpectedly"
                    );
                }
                self.decide_restart(id, handle.restart, now)
            }
        }
    }

    fn decide_restart(&self, id: WorkerId, mut lineage: RestartRecord, now: Instant) -> ExitAction {
        match self.restart_policy.evaluate(&mut lineage, now) {
            RestartDecision::Restart { attempt, delay } => {
                info!(
                    worker_id = %id,
                    attempt,
                    max_restarts = self.config.max_restarts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling worker restart"
                );
                ExitAction::Restart { delay, lineage }
            }
            RestartDecision::GiveUp { restarts } => ExitAction::Abandon { restarts },
        }
    }

    fn apply_exit_action(&mut self, id: WorkerId, action: ExitAction, now: Instant) {
        match action {
            ExitAction::Restart { delay, lineage } => {
                self.total_restarts += 1;
                self.pending.push(PendingFork {
                    due: now + delay,
                    lineage,
                    replaces: id,
                });
            }
            ExitAction::Replace { lineage } => {
                self.fork_worker(lineage, now);
            }
            ExitAction::Abandon { restarts } => {
                self.failed_workers += 1;
                error!(
                    worker_id = %id,
                    restarts,
                    window_secs = self.config.restart_window.as_secs(),
                    "Worker exceeded restart limit, giving up"
                );
            }
            ExitAction::Ignore(reason) => {
                trace!(worker_id = %id, ?reason, "No replacement needed");
            }
        }
    }

    fn fork_due(&mut self, now: Instant) {
        if self.is_shutting_down() {
            self.pending.clear();
            return;
        }
        let (mut due, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|p| p.due <= now);
        self.pending = waiting;
        due.sort_by_key(|p| p.due);

        for fork in due {
            info!(replaces = %fork.replaces, "Restarting worker");
            self.fork_worker(fork.lineage, now);
        }
    }

    fn run_health_check(&mut self, now: Instant) {
        if self.is_shutting_down() {
            return;
        }
        let ids: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|h| h.is_serving())
            .map(|h| h.id)
            .collect();

        for id in ids {
            let Some(nonce) = self.prober.begin(id, now) else {
                continue;
            };
            if let Some(handle) = self.workers.get_mut(&id)
                && let Err(e) = handle.process_mut().send(&ControlMessage::Ping { nonce })
            {
                debug!(worker_id = %id, error = %e, "Failed to send ping");
            }
        }
        trace!(in_flight = self.prober.in_flight(), "Health pings outstanding");
    }

    fn expire_health_checks(&mut self, now: Instant) {
        let timeout_ms = self.config.health_check_timeout.as_millis() as u64;
        for id in self.prober.take_expired(now) {
            let Some(handle) = self.workers.get_mut(&id) else {
                continue;
            };
            if handle.status != WorkerStatus::Ready || handle.killed {
                continue;
            }
            warn!(worker_id = %id, pid = handle.pid, timeout_ms, "Worker failed health check, killing");
            if let Err(e) = handle.force_kill() {
                error!(worker_id = %id, error = %e, "Failed to kill unresponsive worker");
            }
        }
    }

    fn enforce_startup_timeouts(&mut self, now: Instant) {
        let timeout = self.config.startup_timeout;
        for handle in self.workers.values_mut() {
            if handle.status != WorkerStatus::Starting
                || handle.killed
                || handle.is_retiring()
                || now.saturating_duration_since(handle.started_at) < timeout
            {
                continue;
            }
            warn!(
                worker_id = %handle.id,
                pid = handle.pid,
                timeout_secs = timeout.as_secs(),
                "Worker did not report ready in time, killing"
            );
            if let Err(e) = handle.force_kill() {
                error!(worker_id = %handle.id, error = %e, "Failed to kill stalled worker");
            }
        }
    }

    fn enforce_stop_deadlines(&mut self, now: Instant) {
        for handle in self.workers.values_mut() {
            if handle.killed || !handle.stop_deadline.is_some_and(|d| now >= d) {
                continue;
            }
            warn!(
                worker_id = %handle.id,
                pid = handle.pid,
                "Worker did not exit within graceful shutdown timeout, sending SIGKILL"
            );
            if let Err(e) = handle.force_kill() {
                error!(worker_id = %handle.id, error = %e, "Failed to kill worker");
            }
        }
    }

    fn check_startup_complete(&mut self, now: Instant) {
        let Some(deadline) = self.startup_deadline else {
            return;
        };
        let ready = self.count(WorkerStatus::Ready);
        let expected = self.autoscaler.baseline();
        let elapsed_ms = self
            .started_at
            .map(|t| now.saturating_duration_since(t).as_millis() as u64)
            .unwrap_or(0);

        if ready >= expected {
            info!(workers = ready, elapsed_ms, "Worker pool ready");
            self.startup_deadline = None;
        } else if now >= deadline {
            warn!(ready, expected, elapsed_ms, "Startup timeout elapsed before all workers were ready");
            self.startup_deadline = None;
        }
    }

    /// Workers that count toward the pool size: live ones not being scaled
    /// away, plus replacements waiting to be forked.
    fn pool_size(&self) -> usize {
        self.workers
            .values()
            .filter(|h| h.retirement != Retirement::ScaleDown)
            .count()
            + self.pending.len()
    }

    fn run_autoscale(&mut self, sample: Result<SystemSample>, now: Instant) {
        if self.is_shutting_down() || !self.config.autoscale {
            return;
        }
        let sample = match sample {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "Skipping autoscale cycle, no host sample");
                return;
            }
        };
        self.last_sample = Some(sample);

        let size = self.pool_size();
        match self.autoscaler.decide(size, &sample) {
            ScalingDecision::ScaleUp(reason) => {
                info!(
                    %reason,
                    cpu = %format!("{:.1}", sample.cpu_percent),
                    memory = %format!("{:.1}", sample.memory_percent),
                    from = size,
                    to = size + 1,
                    "Scaling up"
                );
                self.fork_worker(RestartRecord::default(), now);
            }
            ScalingDecision::ScaleDown(reason) => {
                let victim = select_least_loaded(
                    self.workers
                        .values()
                        .filter(|h| h.is_serving())
                        .map(|h| (h.id, h.requests_served)),
                );
                match victim {
                    Some(id) => {
                        info!(
                            %reason,
                            worker_id = %id,
                            cpu = %format!("{:.1}", sample.cpu_percent),
                            memory = %format!("{:.1}", sample.memory_percent),
                            from = size,
                            to = size - 1,
                            "Scaling down"
                        );
                        self.begin_drain(id, Retirement::ScaleDown, now);
                    }
                    None => debug!(%reason, "No ready worker to retire"),
                }
            }
            ScalingDecision::Hold => {
                debug!(
                    cpu = %format!("{:.1}", sample.cpu_percent),
                    memory = %format!("{:.1}", sample.memory_percent),
                    workers = size,
                    "Pool size unchanged"
                );
            }
        }
    }

    fn collect_metrics(&mut self, now: Instant) {
        self.metrics = PoolMetrics::aggregate(
            self.workers
                .values()
                .map(|h| (h.requests_served, h.avg_response_time_ms)),
        );
        debug!(
            workers = self.workers.len(),
            total_requests = self.metrics.total_requests,
            avg_response_time_ms = %format!("{:.2}", self.metrics.avg_response_time_ms),
            "Pool metrics"
        );
        self.recycle_oversized(now);
    }

    /// Drain the largest worker over the memory limit, one per cycle.
    fn recycle_oversized(&mut self, now: Instant) {
        if self.is_shutting_down() {
            return;
        }
        let Some(limit) = self.config.max_worker_memory_mib else {
            return;
        };
        if self
            .workers
            .values()
            .any(|h| h.retirement == Retirement::Recycle)
        {
            return;
        }

        let oversized = self
            .workers
            .values()
            .filter(|h| h.is_serving())
            .filter_map(|h| h.memory_mib.filter(|m| *m > limit).map(|m| (m, h.id)))
            .max_by_key(|(memory, id)| (*memory, std::cmp::Reverse(*id)));

        if let Some((memory_mib, id)) = oversized {
            info!(worker_id = %id, memory_mib, limit_mib = limit, "Recycling worker over memory limit");
            self.begin_drain(id, Retirement::Recycle, now);
        }
    }

    fn begin_drain(&mut self, id: WorkerId, reason: Retirement, now: Instant) {
        self.prober.cancel(id);
        let deadline = now + self.config.graceful_shutdown_timeout;
        let Some(handle) = self.workers.get_mut(&id) else {
            return;
        };

        match handle.status {
            WorkerStatus::Ready => {
                if let Err(e) = handle.transition(WorkerStatus::Draining) {
                    warn!(error = %e, "Invalid worker transition");
                    return;
                }
                handle.retirement = reason;
                handle.stop_deadline = Some(deadline);
                if let Err(e) = handle.process_mut().send(&ControlMessage::Shutdown) {
                    debug!(worker_id = %id, error = %e, "Failed to send shutdown, sending SIGTERM");
                    if let Err(e) = handle.process_mut().terminate() {
                        debug!(worker_id = %id, error = %e, "Failed to signal worker");
                    }
                }
            }
            WorkerStatus::Starting => {
                handle.retirement = reason;
                handle.stop_deadline = Some(deadline);
                if let Err(e) = handle.process_mut().terminate() {
                    debug!(worker_id = %id, error = %e, "Failed to signal starting worker");
                }
            }
            WorkerStatus::Draining => {
                handle.stop_deadline = Some(handle.stop_deadline.map_or(deadline, |d| d.min(deadline)));
            }
            WorkerStatus::Dead => {}
        }
    }

    /// Stop the pool. Safe to call any number of times.
    fn begin_shutdown(&mut self, now: Instant) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Shutdown already in progress");
            return;
        }

        let timeout = self.config.graceful_shutdown_timeout;
        self.shutdown_deadline = Some(now + timeout);
        let cancelled = self.pending.len();
        self.pending.clear();
        self.prober.clear();

        info!(
            workers = self.workers.len(),
            cancelled_restarts = cancelled,
            timeout_secs = timeout.as_secs(),
            "Shutting down worker pool"
        );

        let ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        for id in ids {
            self.begin_drain(id, Retirement::PoolShutdown, now);
        }
    }

    fn count(&self, status: WorkerStatus) -> usize {
        self.workers.values().filter(|h| h.status == status).count()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker(&self, id: WorkerId) -> Option<&WorkerHandle> {
        self.workers.get(&id)
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    pub fn pending_restarts(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot for the status endpoint.
    pub fn status(&self, now: Instant) -> PoolStatus {
        let workers = self
            .workers
            .values()
            .map(|h| WorkerView {
                id: h.id.get(),
                pid: h.pid,
                status: h.status,
                started_at: h.started_at_utc,
                uptime_secs: now.saturating_duration_since(h.started_at).as_secs(),
                restart_count: h.restart.restart_count,
                requests_served: h.requests_served,
                avg_response_time_ms: h.avg_response_time_ms,
                memory_mib: h.memory_mib,
            })
            .collect();

        PoolStatus {
            total_workers: self.workers.len(),
            active_workers: self.count(WorkerStatus::Ready),
            starting_workers: self.count(WorkerStatus::Starting),
            draining_workers: self.count(WorkerStatus::Draining),
            pending_restarts: self.pending.len(),
            min_workers: self.config.min_workers,
            max_workers: self.config.max_workers,
            baseline_workers: self.autoscaler.baseline(),
            autoscale_enabled: self.config.autoscale,
            shutting_down: self.is_shutting_down(),
            uptime_secs: self
                .started_at
                .map(|t| now.saturating_duration_since(t).as_secs())
                .unwrap_or(0),
            last_sample: self.last_sample,
            metrics: self.metrics,
            total_restarts: self.total_restarts,
            failed_workers: self.failed_workers,
            workers,
        }
    }
}
