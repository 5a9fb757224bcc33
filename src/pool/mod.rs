//! Process-pool supervision.
//!
//! The [`Supervisor`](supervisor::Supervisor) keeps a table of worker
//! processes and reacts to [`Event`](event::Event)s: worker messages and exits, periodic health checks, autoscaler
//! samples, metrics ticks and termination requests. [`runtime::run`] drives
//! it with real processes, timers and signals.

pub mod autoscale;
pub mod event;
pub mod handle;
pub mod health;
pub mod launcher;
pub mod restart;
pub mod runtime;
pub mod status;
pub mod supervisor;

pub use handle::WorkerStatus;
pub use runtime::{RunOptions, run};
pub use status::{PoolStatus, StatusBoard, WorkerView};
