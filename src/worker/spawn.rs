//! Worker subprocess spawning.
//!
//! Uses `posix_spawn` via `std::process::Command` rather than a raw `fork()`,
//! so the supervisor's threads are never duplicated into the child. Every
//! worker starts as the leader of a new process group.

use super::proc::{Proc, ProcMonitor};
use crate::error::{PoolError, Result};
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Environment variable carrying the worker id into the child.
pub const WORKER_ID_ENV: &str = "PROCPOOL_WORKER_ID";

/// What to run as a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    /// This binary's own `worker` subcommand with the given extra arguments.
    Builtin { args: Vec<OsString> },
    /// An external program speaking the JSON-line protocol.
    External {
        program: PathBuf,
        args: Vec<OsString>,
    },
}

impl WorkerCommand {
    /// Build from a `-- CMD ARGS...` tail; empty means the built-in worker.
    pub fn from_argv(argv: &[OsString], builtin_args: Vec<OsString>) -> Self {
        match argv.split_first() {
            Some((program, args)) => Self::External {
                program: PathBuf::from(program),
                args: args.to_vec(),
            },
            None => Self::Builtin { args: builtin_args },
        }
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Builtin { .. } => "built-in reference worker".to_string(),
            Self::External { program, .. } => program.display().to_string(),
        }
    }

    fn to_command(&self) -> Result<Command> {
        let cmd = match self {
            Self::Builtin { args } => {
                let exe_path = std::env::current_exe().map_err(|e| {
                    PoolError::Spawn(format!("Failed to get current executable: {}", e))
                })?;
                let mut cmd = Command::new(exe_path);
                cmd.arg("worker").args(args);
                cmd
            }
            Self::External { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        };
        Ok(cmd)
    }
}

/// Spawn one worker subprocess with its message channel wired to stdin/stdout.
pub fn spawn_worker(command: &WorkerCommand, worker_id: u64) -> Result<(Proc, ProcMonitor)> {
    let mut cmd = command.to_command()?;

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit()); // Worker diagnostics go to the supervisor's stderr
    cmd.env(WORKER_ID_ENV, worker_id.to_string());
    // Own group, so signals reach the worker's children and a terminal
    // Ctrl-C goes to the supervisor alone.
    cmd.process_group(0);

    let child = cmd
        .spawn()
        .map_err(|e| PoolError::Spawn(format!("{}: {}", command.describe(), e)))?;

    Proc::from_child(child)
}
