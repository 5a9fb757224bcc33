//! Wires the supervisor to real processes, timers, signals and the status server.
//!
//! ```text
//!  monitor threads ─┐
//!  health ticker ───┤
//!  autoscale ticker ┼──► channel ► event loop (owns Supervisor) ──► StatusBoard
//!  metrics ticker ──┤                                                 │
//!  signal listener ─┘  (tokio)                    status server ◄─────┘ (tokio)
//! ```

use super::event::Event;
use super::launcher::{Launcher, ProcessLauncher};
use super::status::StatusBoard;
use super::supervisor::Supervisor;
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::sampler::{HostSampler, SystemSampler};
use crate::server;
use crate::worker::WorkerCommand;
use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info};

/// Longest the event loop waits before re-checking deadlines.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Granularity at which tickers notice shutdown.
const TICKER_SLICE: Duration = Duration::from_millis(100);

/// Everything `procpool run` needs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: PoolConfig,
    pub command: WorkerCommand,
    pub status_addr: Option<SocketAddr>,
}

/// Run a pool until it is told to stop and every worker has exited.
pub fn run(options: RunOptions) -> Result<()> {
    let RunOptions {
        config,
        command,
        status_addr,
    } = options;

    let (tx, rx) = unbounded();
    let launcher = ProcessLauncher::new(command.clone(), tx.clone());
    let mut supervisor = Supervisor::new(config.clone(), launcher)?;
    let board = StatusBoard::new();

    // Signal handlers and the status listener are installed before the
    // first fork so an early SIGTERM is never lost.
    let control = ControlPlane::start(tx.clone(), board.clone(), status_addr)?;

    info!(worker = %command.describe(), "Supervisor starting");
    let now = Instant::now();
    supervisor.start(now);
    board.publish(supervisor.status(now));

    let stop = supervisor.shutdown_flag();
    let mut tickers = vec![
        spawn_ticker(
            "health-ticker",
            config.health_check_interval,
            stop.clone(),
            tx.clone(),
            || Event::HealthTick,
        )?,
        spawn_ticker(
            "metrics-ticker",
            config.metrics_interval,
            stop.clone(),
            tx.clone(),
            || Event::MetricsTick,
        )?,
    ];
    if config.autoscale {
        let sampler = HostSampler::new();
        tickers.push(spawn_ticker(
            "autoscale-ticker",
            config.autoscale_interval,
            stop.clone(),
            tx.clone(),
            move || Event::AutoscaleSample(sampler.sample()),
        )?);
    }
    drop(tx);

    loop {
        let event = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let now = Instant::now();
        step(&mut supervisor, event, now);
        board.publish(supervisor.status(now));
        if supervisor.is_finished(now) {
            break;
        }
    }

    // Tickers exit on their own once the shutdown flag is set
    stop.store(true, Ordering::SeqCst);
    for ticker in tickers {
        let _ = ticker.join();
    }
    control.stop();

    let status = supervisor.status(Instant::now());
    if status.total_workers > 0 {
        error!(workers = status.total_workers, "Supervisor exiting with workers still alive");
    }
    info!(
        restarts = status.total_restarts,
        failed = status.failed_workers,
        "Supervisor stopped"
    );
    Ok(())
}

/// Hand `event` (if any) to the supervisor, then act on passed deadlines.
///
/// A panic in either half is logged and swallowed. Returns false if
/// something panicked.
fn step<L: Launcher>(supervisor: &mut Supervisor<L>, event: Option<Event>, now: Instant) -> bool {
    let mut clean = true;
    if let Some(event) = event {
        let kind = event.kind();
        if catch_unwind(AssertUnwindSafe(|| supervisor.handle(event, now))).is_err() {
            error!(event = kind, "Supervisor panicked handling event, continuing");
            clean = false;
        }
    }
    if catch_unwind(AssertUnwindSafe(|| supervisor.poll(now))).is_err() {
        error!("Supervisor panicked checking deadlines, continuing");
        clean = false;
    }
    clean
}

/// Start a thread that posts `tick()` every `interval` until `stop` is set.
///
/// A panic inside `tick` is logged and the ticker keeps going.
fn spawn_ticker<F>(
    name: &str,
    interval: Duration,
    stop: Arc<AtomicBool>,
    events: Sender<Event>,
    mut tick: F,
) -> Result<JoinHandle<()>>
where
    F: FnMut() -> Event + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            loop {
                let started = Instant::now();
                while started.elapsed() < interval {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    thread::sleep(TICKER_SLICE.min(interval.saturating_sub(started.elapsed())));
                }
                if stop.load(Ordering::SeqCst) {
                    return;
                }

                match catch_unwind(AssertUnwindSafe(&mut tick)) {
                    Ok(event) => {
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                    Err(_) => error!(ticker = %thread_name, "Periodic task panicked, continuing"),
                }
            }
        })
        .map_err(PoolError::Io)
}

/// Async side of the supervisor: signal listener and optional status server.
struct ControlPlane {
    runtime: tokio::runtime::Runtime,
}

impl ControlPlane {
    fn start(
        events: Sender<Event>,
        board: StatusBoard,
        status_addr: Option<SocketAddr>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("procpool-control")
            .enable_all()
            .build()?;

        let (mut sigterm, mut sigint) = runtime.block_on(async {
            Ok::<_, std::io::Error>((
                signal(SignalKind::terminate())?,
                signal(SignalKind::interrupt())?,
            ))
        })?;

        if let Some(addr) = status_addr {
            let listener = runtime
                .block_on(tokio::net::TcpListener::bind(addr))
                .map_err(|e| PoolError::Server(format!("Failed to bind {}: {}", addr, e)))?;
            let local = listener.local_addr()?;
            info!(address = %local, "Status endpoint listening");
            let router = server::router(board);
            runtime.spawn(async move {
                if let Err(e) = server::serve(listener, router).await {
                    error!(error = %e, "Status server stopped");
                }
            });
        }

        runtime.spawn(async move {
            loop {
                let name = tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                };
                info!(signal = name, "Received shutdown signal");
                if events.send(Event::Terminate).is_err() {
                    debug!("Event loop gone, signal listener exiting");
                    break;
                }
            }
        });

        Ok(Self { runtime })
    }

    fn stop(self) {
        self.runtime.shutdown_timeout(Duration::from_secs(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::handle::WorkerId;
    use crate::pool::launcher::WorkerProcess;
    use crate::worker::{ControlMessage, ExitCause, WorkerMessage};

    #[test]
    fn test_ticker_posts_until_stopped() {
        let (tx, rx) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_ticker(
            "test-ticker",
            Duration::from_millis(20),
            stop.clone(),
            tx,
            || Event::HealthTick,
        )
        .unwrap();

        for _ in 0..3 {
            let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert!(matches!(event, Event::HealthTick));
        }
        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn test_ticker_survives_panicking_task() {
        let (tx, rx) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let mut calls = 0u32;
        let handle = spawn_ticker(
            "flaky-ticker",
            Duration::from_millis(10),
            stop.clone(),
            tx,
            move || {
                calls += 1;
                if calls == 1 {
                    panic!("first tick fails");
                }
                Event::MetricsTick
            },
        )
        .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, Event::MetricsTick));
        stop.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn test_ticker_stops_when_receiver_dropped() {
        let (tx, rx) = unbounded();
        drop(rx);
        let handle = spawn_ticker(
            "orphan-ticker",
            Duration::from_millis(5),
            Arc::new(AtomicBool::new(false)),
            tx,
            || Event::HealthTick,
        )
        .unwrap();
        handle.join().unwrap();
    }

    struct PanickyProcess;

    impl WorkerProcess for PanickyProcess {
        fn pid(&self) -> u32 {
            4242
        }
        fn send(&mut self, _message: &ControlMessage) -> Result<()> {
            panic!("pipe exploded");
        }
        fn terminate(&mut self) -> Result<()> {
            Ok(())
        }
        fn kill(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct PanickyLauncher;

    impl Launcher for PanickyLauncher {
        fn launch(&mut self, _id: WorkerId) -> Result<Box<dyn WorkerProcess>> {
            Ok(Box::new(PanickyProcess))
        }
    }

    #[test]
    fn test_step_survives_panic_during_health_tick() {
        let config = PoolConfig {
            initial_workers: Some(1),
            min_workers: 1,
            max_workers: 2,
            autoscale: false,
            ..Default::default()
        };
        let mut supervisor = Supervisor::new(config, PanickyLauncher).unwrap();
        let now = Instant::now();
        supervisor.start(now);

        let ready = Event::Message {
            id: WorkerId::new(1),
            message: WorkerMessage::Ready,
        };
        assert!(step(&mut supervisor, Some(ready), now));
        assert!(!step(&mut supervisor, Some(Event::HealthTick), now));

        // Later events are still handled.
        assert!(step(&mut supervisor, Some(Event::MetricsTick), now));
        let exited = Event::Exited {
            id: WorkerId::new(1),
            cause: ExitCause::Exited(1),
        };
        assert!(step(&mut supervisor, Some(exited), now));
        assert_eq!(supervisor.worker_count(), 0);
        assert_eq!(supervisor.pending_restarts(), 1);
    }

    #[test]
    fn test_invalid_config_fails_before_spawning() {
        let options = RunOptions {
            config: PoolConfig {
                min_workers: 4,
                max_workers: 2,
                ..Default::default()
            },
            command: WorkerCommand::External {
                program: "/nonexistent/worker".into(),
                args: Vec::new(),
            },
            status_addr: None,
        };
        assert!(matches!(run(options), Err(PoolError::Config(_))));
    }
}
