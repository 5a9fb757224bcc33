//! Worker subprocess plumbing.
//!
//! Everything the supervisor needs to run a worker as a separate OS process
//! and talk to it: spawning, the JSON-line message protocol over the
//! worker's stdin/stdout, exit-cause analysis, and the built-in reference
//! worker application.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────────┐
//!                     │  Supervisor      │
//!                     │  (event loop)    │
//!                     └────────┬─────────┘
//!                              │ Proc (stdin)      ▲ ProcMonitor (waitpid, stdout)
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 1  │  │ Worker 2  │  │ Worker N  │
//!         │ (process) │  │ (process) │  │ (process) │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```

pub mod app;
pub mod exit;
mod ipc;
pub mod proc;
pub mod protocol;
pub mod spawn;

pub use app::{WorkerOptions, run_worker_main};
pub use exit::ExitCause;
pub use proc::Proc;
pub use protocol::{ControlMessage, WorkerMessage};
pub use spawn::{WorkerCommand, spawn_worker};
