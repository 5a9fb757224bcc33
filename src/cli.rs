//! Command-line interface definitions using clap.

use crate::client::DEFAULT_STATUS_URL;
use crate::config::{PoolConfig, host_cores};
use crate::logging::LogFormat;
use crate::output::OutputFormat;
use crate::worker::{WorkerCommand, WorkerOptions};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Process-pool supervisor with health checks, restarts and autoscaling.
#[derive(Parser, Debug)]
#[command(name = "procpool")]
#[command(author, version = crate::version::clap_version(), about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a supervised worker pool.
    Run(Box<RunArgs>),

    /// Show the status of a running pool.
    Status(StatusArgs),

    /// Run the built-in reference worker (spawned by `run`).
    #[command(hide = true)]
    Worker(WorkerArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "procpool",
            &mut std::io::stdout(),
        );
    }
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Initial number of workers [default: number of CPU cores].
    #[arg(short, long, env = "PROCPOOL_WORKERS")]
    pub workers: Option<usize>,

    /// Lower bound on the pool size.
    #[arg(long, env = "PROCPOOL_MIN_WORKERS", default_value_t = 1)]
    pub min_workers: usize,

    /// Upper bound on the pool size [default: 2 x CPU cores].
    #[arg(long, env = "PROCPOOL_MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Scale up when host CPU percent exceeds this.
    #[arg(long, env = "PROCPOOL_CPU_THRESHOLD", default_value_t = 80.0)]
    pub cpu_threshold: f64,

    /// Scale up when host memory percent exceeds this.
    #[arg(long, env = "PROCPOOL_MEMORY_THRESHOLD", default_value_t = 85.0)]
    pub memory_threshold: f64,

    /// Scale down only when host CPU percent is below this.
    #[arg(long, env = "PROCPOOL_SCALE_DOWN_CPU_THRESHOLD", default_value_t = 50.0)]
    pub scale_down_cpu_threshold: f64,

    /// Scale down only when host memory percent is below this.
    #[arg(long, env = "PROCPOOL_SCALE_DOWN_MEMORY_THRESHOLD", default_value_t = 60.0)]
    pub scale_down_memory_threshold: f64,

    /// Milliseconds between health checks.
    #[arg(long, env = "PROCPOOL_HEALTH_CHECK_INTERVAL_MS", default_value_t = 10_000)]
    pub health_check_interval_ms: u64,

    /// Milliseconds a worker has to answer a ping.
    #[arg(long, env = "PROCPOOL_HEALTH_CHECK_TIMEOUT_MS", default_value_t = 5_000)]
    pub health_check_timeout_ms: u64,

    /// Milliseconds between autoscaling decisions.
    #[arg(long, env = "PROCPOOL_AUTOSCALE_INTERVAL_MS", default_value_t = 30_000)]
    pub autoscale_interval_ms: u64,

    /// Milliseconds between metrics aggregation.
    #[arg(long, env = "PROCPOOL_METRICS_INTERVAL_MS", default_value_t = 15_000)]
    pub metrics_interval_ms: u64,

    /// Milliseconds a new worker has to report ready.
    #[arg(long, env = "PROCPOOL_STARTUP_TIMEOUT_MS", default_value_t = 30_000)]
    pub startup_timeout_ms: u64,

    /// Milliseconds to wait before replacing a crashed worker.
    #[arg(long, env = "PROCPOOL_RESTART_DELAY_MS", default_value_t = 1_000)]
    pub restart_delay_ms: u64,

    /// Restarts allowed per worker within the restart window.
    #[arg(long, env = "PROCPOOL_MAX_RESTARTS", default_value_t = 5)]
    pub max_restarts: u32,

    /// Restart window in milliseconds.
    #[arg(long, env = "PROCPOOL_RESTART_WINDOW_MS", default_value_t = 60_000)]
    pub restart_window_ms: u64,

    /// Milliseconds a draining worker gets before SIGKILL.
    #[arg(long, env = "PROCPOOL_GRACEFUL_SHUTDOWN_TIMEOUT_MS", default_value_t = 30_000)]
    pub graceful_shutdown_timeout_ms: u64,

    /// Disable autoscaling (the pool keeps its initial size).
    #[arg(long, env = "PROCPOOL_NO_AUTOSCALE")]
    pub no_autoscale: bool,

    /// Recycle workers whose reported memory exceeds this many MiB.
    #[arg(long, env = "PROCPOOL_MAX_WORKER_MEMORY_MIB")]
    pub max_worker_memory_mib: Option<u64>,

    /// Serve GET /status and /health on this address (e.g. 127.0.0.1:7070).
    #[arg(long, env = "PROCPOOL_STATUS_ADDR")]
    pub status_addr: Option<SocketAddr>,

    /// Extra argument for the built-in worker (repeatable).
    #[arg(long = "worker-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub worker_args: Vec<OsString>,

    /// Worker program and its arguments. Omit to use the built-in worker.
    #[arg(last = true, value_name = "CMD")]
    pub command: Vec<OsString>,
}

impl RunArgs {
    pub fn to_config(&self) -> PoolConfig {
        PoolConfig {
            initial_workers: self.workers,
            min_workers: self.min_workers,
            max_workers: self.max_workers.unwrap_or_else(|| host_cores() * 2),
            cpu_threshold: self.cpu_threshold,
            memory_threshold: self.memory_threshold,
            scale_down_cpu_threshold: self.scale_down_cpu_threshold,
            scale_down_memory_threshold: self.scale_down_memory_threshold,
            health_check_interval: Duration::from_millis(self.health_check_interval_ms),
            health_check_timeout: Duration::from_millis(self.health_check_timeout_ms),
            autoscale_interval: Duration::from_millis(self.autoscale_interval_ms),
            metrics_interval: Duration::from_millis(self.metrics_interval_ms),
            startup_timeout: Duration::from_millis(self.startup_timeout_ms),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            max_restarts: self.max_restarts,
            restart_window: Duration::from_millis(self.restart_window_ms),
            graceful_shutdown_timeout: Duration::from_millis(self.graceful_shutdown_timeout_ms),
            autoscale: !self.no_autoscale,
            max_worker_memory_mib: self.max_worker_memory_mib,
        }
    }

    pub fn worker_command(&self) -> WorkerCommand {
        WorkerCommand::from_argv(&self.command, self.worker_args.clone())
    }
}

/// Arguments for the status command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the supervisor's status endpoint.
    #[arg(long, env = "PROCPOOL_STATUS_URL", default_value = DEFAULT_STATUS_URL)]
    pub url: String,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Use ASCII table borders instead of Unicode.
    #[arg(long)]
    pub ascii: bool,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 5)]
    pub timeout_secs: u64,

    /// Only query the liveness endpoint.
    #[arg(long)]
    pub health: bool,
}

/// Arguments for the built-in reference worker.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Milliseconds to wait before reporting ready.
    #[arg(long, default_value_t = 0)]
    pub startup_delay_ms: u64,

    /// Milliseconds between synthetic work units.
    #[arg(long, default_value_t = 100)]
    pub work_interval_ms: u64,

    /// Milliseconds between stats reports.
    #[arg(long, default_value_t = 5_000)]
    pub stats_interval_ms: u64,

    /// Never answer pings.
    #[arg(long)]
    pub unresponsive: bool,

    /// Exit with status 1 after this many milliseconds.
    #[arg(long)]
    pub crash_after_ms: Option<u64>,

    /// Keep running after a shutdown request.
    #[arg(long)]
    pub ignore_shutdown: bool,
}

impl WorkerArgs {
    pub fn to_options(&self) -> WorkerOptions {
        WorkerOptions {
            startup_delay: Duration::from_millis(self.startup_delay_ms),
            work_interval: Duration::from_millis(self.work_interval_ms),
            stats_interval: Duration::from_millis(self.stats_interval_ms),
            unresponsive: self.unresponsive,
            crash_after: self.crash_after_ms.map(Duration::from_millis),
            ignore_shutdown: self.ignore_shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults_match_pool_defaults() {
        let args = Cli::try_parse_from(["procpool", "run"]).unwrap();
        match args.command {
            Commands::Run(run) => {
                let config = run.to_config();
                let defaults = PoolConfig::default();
                assert_eq!(config, defaults);
                assert_eq!(run.worker_command(), WorkerCommand::Builtin { args: Vec::new() });
                assert!(run.status_addr.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_options() {
        let args = Cli::try_parse_from([
            "procpool",
            "run",
            "--workers",
            "3",
            "--min-workers",
            "2",
            "--max-workers",
            "6",
            "--health-check-interval-ms",
            "500",
            "--no-autoscale",
            "--status-addr",
            "127.0.0.1:7070",
        ])
        .unwrap();
        match args.command {
            Commands::Run(run) => {
                let config = run.to_config();
                assert_eq!(config.initial_workers, Some(3));
                assert_eq!(config.min_workers, 2);
                assert_eq!(config.max_workers, 6);
                assert_eq!(config.health_check_interval, Duration::from_millis(500));
                assert!(!config.autoscale);
                assert_eq!(run.status_addr, Some("127.0.0.1:7070".parse().unwrap()));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_external_command() {
        let args =
            Cli::try_parse_from(["procpool", "run", "--", "node", "app.js", "--port", "0"]).unwrap();
        match args.command {
            Commands::Run(run) => match run.worker_command() {
                WorkerCommand::External { program, args } => {
                    assert_eq!(program, PathBuf::from("node"));
                    assert_eq!(args, vec!["app.js", "--port", "0"]);
                }
                other => panic!("Expected external worker, got {:?}", other),
            },
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_builtin_worker_args_passthrough() {
        let args = Cli::try_parse_from([
            "procpool",
            "run",
            "--worker-arg=--stats-interval-ms",
            "--worker-arg",
            "250",
        ])
        .unwrap();
        match args.command {
            Commands::Run(run) => assert_eq!(
                run.worker_command(),
                WorkerCommand::Builtin {
                    args: vec!["--stats-interval-ms".into(), "250".into()]
                }
            ),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_worker_command() {
        let args =
            Cli::try_parse_from(["procpool", "worker", "--unresponsive", "--crash-after-ms", "50"])
                .unwrap();
        match args.command {
            Commands::Worker(worker) => {
                let options = worker.to_options();
                assert!(options.unresponsive);
                assert_eq!(options.crash_after, Some(Duration::from_millis(50)));
                assert_eq!(options.work_interval, Duration::from_millis(100));
            }
            _ => panic!("Expected Worker command"),
        }
    }

    #[test]
    fn test_status_command() {
        let args = Cli::try_parse_from(["procpool", "status", "--format", "json"]).unwrap();
        match args.command {
            Commands::Status(status) => {
                assert_eq!(status.url, DEFAULT_STATUS_URL);
                assert_eq!(status.format, OutputFormat::Json);
            }
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_global_options() {
        let args = Cli::try_parse_from(["procpool", "-vv", "--log-format", "json", "status"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["procpool", "-v", "-q", "status"]).is_err());
    }
}
