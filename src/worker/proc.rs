//! Process handle for worker subprocesses.
//!
//! A spawned worker is split in two halves: [`Proc`], the control half kept by
//! the supervisor (send messages, signal the process), and [`ProcMonitor`], the
//! observation half that reads the worker's messages and reaps it on exit.
//!
//! Each worker leads its own process group. Signals go to the whole group so
//! helpers it forked stop with it, and the exit is taken from `waitpid` rather
//! than from stdout closing, which a surviving descendant could hold open.

use super::exit::{ExitCause, analyze_wait_status};
use super::ipc::{LineReader, LineWriter, PipeFd, Received};
use super::protocol::{ControlMessage, WorkerMessage};
use crate::error::{PoolError, Result};
use crossbeam_channel::{RecvTimeoutError, bounded};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use std::os::unix::io::OwnedFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// How long a reaped worker's output may keep draining before the exit is
/// reported anyway.
const OUTPUT_GRACE: Duration = Duration::from_millis(200);

/// Control half of a worker subprocess.
pub struct Proc {
    pid: Pid,
    writer: LineWriter,
    /// Set by the monitor once the process has been reaped; the pid must not
    /// be signalled after that point.
    reaped: Arc<AtomicBool>,
}

/// Observation half of a worker subprocess.
pub struct ProcMonitor {
    pid: Pid,
    reader: LineReader,
    reaped: Arc<AtomicBool>,
}

impl Proc {
    /// Split a spawned child into its control and monitor halves.
    ///
    /// The child must have been spawned with piped stdin and stdout, as the
    /// leader of its own process group.
    pub fn from_child(mut child: std::process::Child) -> Result<(Proc, ProcMonitor)> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Spawn("Child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Spawn("Child stdout not captured".into()))?;

        let stdin = PipeFd::from(OwnedFd::from(stdin));
        stdin.set_nonblocking()?;

        let reaped = Arc::new(AtomicBool::new(false));
        let proc = Proc {
            pid,
            writer: LineWriter::new(stdin),
            reaped: reaped.clone(),
        };
        let monitor = ProcMonitor {
            pid,
            reader: LineReader::new(PipeFd::from(OwnedFd::from(stdout))),
            reaped,
        };
        Ok((proc, monitor))
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Whether the monitor has already reaped the process.
    pub fn is_reaped(&self) -> bool {
        self.reaped.load(Ordering::Acquire)
    }

    /// Send a control message to the worker.
    ///
    /// Never blocks: if the worker has stopped reading and its stdin pipe is
    /// full, the message is dropped and an error returned.
    pub fn send(&mut self, message: &ControlMessage) -> Result<()> {
        self.writer
            .write_line(&message.to_line())
            .map_err(|e| PoolError::Worker(format!("Failed to send to worker {}: {}", self.pid, e)))
    }

    /// Send SIGTERM to the worker's process group.
    pub fn terminate(&self) -> Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// Send SIGKILL to the worker's process group. The exit is observed by
    /// the monitor, not here.
    pub fn kill(&self) -> Result<()> {
        self.signal(Signal::SIGKILL)
    }

    fn signal(&self, sig: Signal) -> Result<()> {
        if self.is_reaped() {
            return Ok(());
        }
        match killpg(self.pid, sig) {
            // Exited but not yet reaped by the monitor
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(PoolError::Worker(format!(
                "Failed to send {:?} to {}: {}",
                sig, self.pid, e
            ))),
        }
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        // Never leave an orphaned worker behind; the monitor still reaps it.
        if !self.is_reaped() {
            let _ = killpg(self.pid, Signal::SIGKILL);
        }
    }
}

impl ProcMonitor {
    /// Forward every message the worker writes and return once it is reaped.
    ///
    /// Messages are read on a separate thread. After the worker exits its
    /// remaining output gets a short grace period to drain, so messages
    /// written just before exiting are delivered before this returns. Blocks
    /// the calling thread for the lifetime of the worker.
    pub fn run<F>(self, on_message: F) -> ExitCause
    where
        F: FnMut(WorkerMessage) + Send + 'static,
    {
        let ProcMonitor {
            pid,
            reader,
            reaped,
        } = self;

        let (done_tx, done_rx) = bounded::<()>(0);
        let spawned = thread::Builder::new()
            .name(format!("worker-{}-reader", pid))
            .spawn(move || {
                forward_messages(pid, reader, on_message);
                drop(done_tx);
            });
        if let Err(e) = spawned {
            warn!(pid = pid.as_raw(), error = %e, "Failed to start worker reader, output dropped");
        }

        let cause = reap(pid);
        reaped.store(true, Ordering::Release);

        if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(OUTPUT_GRACE) {
            debug!(
                pid = pid.as_raw(),
                "Worker output still open after exit, a descendant may hold it"
            );
        }
        cause
    }
}

fn forward_messages(pid: Pid, mut reader: LineReader, mut on_message: impl FnMut(WorkerMessage)) {
    loop {
        match reader.recv::<WorkerMessage>() {
            Ok(Received::Message(message)) => {
                trace!(pid = pid.as_raw(), ?message, "Worker message");
                on_message(message);
            }
            Ok(Received::Malformed(line)) => {
                warn!(pid = pid.as_raw(), line = %line, "Ignoring malformed worker message");
            }
            Ok(Received::Closed) => break,
            Err(e) => {
                debug!(pid = pid.as_raw(), error = %e, "Worker channel read failed");
                break;
            }
        }
    }
}

/// Block until `pid` exits and collect its status.
fn reap(pid: Pid) -> ExitCause {
    loop {
        match waitpid(pid, None) {
            Ok(status) => return analyze_wait_status(status),
            Err(Errno::EINTR) => continue,
            Err(e) => {
                debug!(pid = pid.as_raw(), error = %e, "waitpid failed");
                return ExitCause::Unknown;
            }
        }
    }
}
