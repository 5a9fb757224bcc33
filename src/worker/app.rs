//! Built-in reference worker application.
//!
//! This runs when `procpool worker` is invoked (the supervisor's default
//! worker). It runs a synthetic workload, answers pings, reports stats and
//! drains on request. It exists so the supervisor can be exercised end to end
//! without an external application, and doubles as a template for the
//! protocol a real worker must speak.

use super::ipc::{LineReader, LineWriter, PipeFd, Received};
use super::protocol::{ControlMessage, WorkerMessage};
use std::io;
use sysinfo::{Pid, System};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Behavior of the reference worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Delay before announcing readiness.
    pub startup_delay: Duration,
    /// Pause between synthetic work units.
    pub work_interval: Duration,
    /// How often to report stats.
    pub stats_interval: Duration,
    /// Never answer pings (simulates a wedged event loop).
    pub unresponsive: bool,
    /// Exit with status 1 after this long (simulates a crash).
    pub crash_after: Option<Duration>,
    /// Keep running after a shutdown request.
    pub ignore_shutdown: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            startup_delay: Duration::ZERO,
            work_interval: Duration::from_millis(100),
            stats_interval: Duration::from_secs(5),
            unresponsive: false,
            crash_after: None,
            ignore_shutdown: false,
        }
    }
}

/// Counters shared between the workload and the stats reporter.
#[derive(Debug, Default)]
struct Workload {
    accepting: AtomicBool,
    served: AtomicU64,
    busy_micros: AtomicU64,
}

impl Workload {
    fn new() -> Self {
        Self {
            accepting: AtomicBool::new(true),
            ..Default::default()
        }
    }

    fn record(&self, elapsed: Duration) {
        self.served.fetch_add(1, Ordering::Relaxed);
        self.busy_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self, memory_mib: Option<u64>) -> WorkerMessage {
        let served = self.served.load(Ordering::Relaxed);
        let busy = self.busy_micros.load(Ordering::Relaxed);
        let avg_ms = if served == 0 {
            0.0
        } else {
            busy as f64 / served as f64 / 1000.0
        };
        WorkerMessage::stats(served, avg_ms, memory_mib)
    }
}

/// Current resident set size of this process, read through `sysinfo`.
struct ResidentMemory {
    sys: System,
    pid: Option<Pid>,
}

impl ResidentMemory {
    fn new() -> Self {
        Self {
            sys: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    fn current_mib(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.sys.refresh_all();
        self.sys.process(pid).map(|p| p.memory() / (1024 * 1024))
    }
}

/// One synthetic unit of work: hash a small buffer a few thousand times.
fn work_unit(seed: u64) -> u64 {
    let mut acc = seed ^ 0x9e37_79b9_7f4a_7c15;
    for i in 0..20_000u64 {
        acc = acc.rotate_left(5) ^ i.wrapping_mul(0x100_0000_01b3);
    }
    acc
}

fn spawn_workload(workload: Arc<Workload>, interval: Duration) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("workload".into())
        .spawn(move || {
            let mut seed = 0u64;
            while workload.accepting.load(Ordering::Relaxed) {
                let start = Instant::now();
                seed = std::hint::black_box(work_unit(seed));
                workload.record(start.elapsed());
                thread::sleep(interval);
            }
        })
}

fn spawn_stats_reporter(
    workload: Arc<Workload>,
    writer: Arc<Mutex<LineWriter>>,
    interval: Duration,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stats".into())
        .spawn(move || {
            let mut memory = ResidentMemory::new();
            loop {
                thread::sleep(interval);
                let line = workload.snapshot(memory.current_mib()).to_line();
                let Ok(mut w) = writer.lock() else { return };
                if w.write_line(&line).is_err() {
                    return;
                }
            }
        })
}

fn send(writer: &Mutex<LineWriter>, message: &WorkerMessage) -> io::Result<()> {
    let mut w = writer
        .lock()
        .map_err(|_| io::Error::other("writer mutex poisoned"))?;
    w.write_line(&message.to_line())
}

/// Worker main loop: announce readiness, then serve control messages until
/// shutdown or EOF.
fn worker_loop(
    reader: &mut LineReader,
    writer: Arc<Mutex<LineWriter>>,
    options: &WorkerOptions,
) -> io::Result<()> {
    if !options.startup_delay.is_zero() {
        thread::sleep(options.startup_delay);
    }

    let workload = Arc::new(Workload::new());
    let workload_thread = spawn_workload(workload.clone(), options.work_interval)?;
    spawn_stats_reporter(workload.clone(), writer.clone(), options.stats_interval)?;

    send(&writer, &WorkerMessage::Ready)?;

    loop {
        let message = match reader.recv::<ControlMessage>()? {
            Received::Message(message) => message,
            Received::Malformed(line) => {
                eprintln!("worker: ignoring invalid control message: {}", line);
                continue;
            }
            // Supervisor went away
            Received::Closed => {
                workload.accepting.store(false, Ordering::Relaxed);
                return Ok(());
            }
        };

        match message {
            ControlMessage::Ping { nonce } => {
                if !options.unresponsive {
                    send(&writer, &WorkerMessage::Pong { nonce })?;
                }
            }
            ControlMessage::Shutdown => {
                if options.ignore_shutdown {
                    continue;
                }
                workload.accepting.store(false, Ordering::Relaxed);
                let _ = workload_thread.join();
                send(&writer, &workload.snapshot(ResidentMemory::new().current_mib()))?;
                send(&writer, &WorkerMessage::Drained)?;
                return Ok(());
            }
        }
    }
}

/// Run the reference worker. Never returns.
pub fn run_worker_main(options: WorkerOptions) -> ! {
    // The supervisor orchestrates shutdown, so SIGINT is ignored. Pipe
    // errors are handled as io::Error.
    unsafe {
        use nix::sys::signal::{SigHandler, Signal, signal};
        signal(Signal::SIGPIPE, SigHandler::SigIgn).ok();
        signal(Signal::SIGINT, SigHandler::SigIgn).ok();
    }

    if let Some(after) = options.crash_after {
        thread::spawn(move || {
            thread::sleep(after);
            eprintln!("worker: simulated crash");
            std::process::exit(1);
        });
    }

    // Safety: file descriptors 0 and 1 are always valid for stdin/stdout
    let stdin_fd = unsafe { PipeFd::from_raw(0) };
    let stdout_fd = unsafe { PipeFd::from_raw(1) };

    let mut reader = LineReader::new(stdin_fd);
    let writer = Arc::new(Mutex::new(LineWriter::new(stdout_fd)));

    match worker_loop(&mut reader, writer, &options) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("worker error: {}", e);
            std::process::exit(1);
        }
    }
}
