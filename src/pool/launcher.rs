//! Process creation seam between the supervisor and the OS.

use super::event::Event;
use super::handle::WorkerId;
use crate::error::{PoolError, Result};
use crate::worker::{ControlMessage, Proc, WorkerCommand, spawn_worker};
use crossbeam_channel::Sender;
use std::thread;
use tracing::{debug, trace};

/// Control side of a running worker.
pub trait WorkerProcess: Send {
    fn pid(&self) -> u32;
    fn send(&mut self, message: &ControlMessage) -> Result<()>;
    /// Polite stop (SIGTERM).
    fn terminate(&mut self) -> Result<()>;
    /// Forced stop (SIGKILL).
    fn kill(&mut self) -> Result<()>;
}

/// Starts worker processes.
///
/// Implementations must eventually deliver exactly one [`Event::Exited`] for
/// every worker they successfully launch.
pub trait Launcher {
    fn launch(&mut self, id: WorkerId) -> Result<Box<dyn WorkerProcess>>;
}

impl WorkerProcess for Proc {
    fn pid(&self) -> u32 {
        Proc::pid(self).as_raw() as u32
    }

    fn send(&mut self, message: &ControlMessage) -> Result<()> {
        Proc::send(self, message)
    }

    fn terminate(&mut self) -> Result<()> {
        Proc::terminate(self)
    }

    fn kill(&mut self) -> Result<()> {
        Proc::kill(self)
    }
}

/// Launches real subprocesses, each with a monitor thread feeding the event loop.
pub struct ProcessLauncher {
    command: WorkerCommand,
    events: Sender<Event>,
}

impl ProcessLauncher {
    pub fn new(command: WorkerCommand, events: Sender<Event>) -> Self {
        Self { command, events }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, id: WorkerId) -> Result<Box<dyn WorkerProcess>> {
        let (proc, monitor) = spawn_worker(&self.command, id.get())?;
        let events = self.events.clone();
        let messages = self.events.clone();

        thread::Builder::new()
            .name(format!("worker-{}-monitor", id))
            .spawn(move || {
                let cause = monitor.run(move |message| {
                    trace!(worker_id = %id, ?message, "Worker message");
                    let _ = messages.send(Event::Message { id, message });
                });
                debug!(worker_id = %id, %cause, "Worker reaped");
                let _ = events.send(Event::Exited { id, cause });
            })
            .map_err(|e| PoolError::Spawn(format!("monitor thread for worker {}: {}", id, e)))?;

        Ok(Box::new(proc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{ExitCause, WorkerMessage};
    use crossbeam_channel::unbounded;
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand::External {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into()],
        }
    }

    #[test]
    fn test_launch_posts_messages_then_exit() {
        let (tx, rx) = unbounded();
        let mut launcher = ProcessLauncher::new(sh(r#"echo '{"type":"ready"}'"#), tx);
        let process = launcher.launch(WorkerId::new(5)).expect("launch failed");
        assert!(process.pid() > 0);

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            first,
            Event::Message {
                id,
                message: WorkerMessage::Ready
            } if id == WorkerId::new(5)
        ));
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::Exited { id, cause } => {
                assert_eq!(id, WorkerId::new(5));
                assert!(cause.is_clean());
            }
            other => panic!("Expected exit event, got {:?}", other),
        }
    }

    #[test]
    fn test_kill_reports_signal() {
        let (tx, rx) = unbounded();
        let mut launcher = ProcessLauncher::new(sh("sleep 30"), tx);
        let mut process = launcher.launch(WorkerId::new(1)).expect("launch failed");
        process.kill().unwrap();

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::Exited { cause, .. } => {
                assert_eq!(cause, ExitCause::Signaled(Signal::SIGKILL));
            }
            other => panic!("Expected exit event, got {:?}", other),
        }
    }

    #[test]
    fn test_exit_posted_promptly_when_child_leaves_stdout_open() {
        let (tx, rx) = unbounded();
        let mut launcher = ProcessLauncher::new(sh("sleep 8 & exec sleep 60"), tx);
        let process = launcher.launch(WorkerId::new(2)).expect("launch failed");

        let started = Instant::now();
        kill(Pid::from_raw(process.pid() as i32), Signal::SIGKILL).unwrap();

        match rx.recv_timeout(Duration::from_secs(3)).unwrap() {
            Event::Exited { id, cause } => {
                assert_eq!(id, WorkerId::new(2));
                assert_eq!(cause, ExitCause::Signaled(Signal::SIGKILL));
            }
            other => panic!("Expected exit event, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(3));
        let _ = killpg(Pid::from_raw(process.pid() as i32), Signal::SIGKILL);
    }

    #[test]
    fn test_launch_failure_is_an_error() {
        let (tx, _rx) = unbounded();
        let mut launcher = ProcessLauncher::new(
            WorkerCommand::External {
                program: PathBuf::from("/nonexistent/worker"),
                args: Vec::new(),
            },
            tx,
        );
        assert!(launcher.launch(WorkerId::new(1)).is_err());
    }
}
