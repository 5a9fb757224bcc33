//! Logging setup for the supervisor.
//!
//! Everything goes to stderr (stdout is reserved for command output and, in
//! workers, for the message protocol), optionally mirrored to a file.
//!
//! # Environment Variables
//!
//! - `PROCPOOL_LOG` - Log filter (overrides RUST_LOG)
//! - `PROCPOOL_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `PROCPOOL_LOG_FORMAT` - Output format: pretty, compact, json
//! - `PROCPOOL_LOG_FILE` - Path to a log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! Command-line flags (`-v`, `-q`, `--log-format`, `--log-file`) win over
//! the environment.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable multi-field lines
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// Newline-delimited JSON for log aggregation
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

/// Logging configuration, built up then passed to [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Mirror logs to this file (no rotation).
    pub file_path: Option<PathBuf>,
    /// Filter directive string; overrides `level` when set.
    pub filter: Option<String>,
    pub show_target: bool,
    /// Include thread names (worker monitors and tickers are named).
    pub show_thread_names: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            filter: None,
            show_target: false,
            show_thread_names: false,
        }
    }
}

impl LogConfig {
    /// Map `-q` / `-v` counts to a filter. No flags leaves the filter unset so
    /// the environment can supply one.
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        let config = Self::default();
        let level = match (quiet, verbose) {
            (true, _) => Level::ERROR,
            (false, 0) => return config,
            (false, 1) => Level::DEBUG,
            (false, _) => Level::TRACE,
        };
        let config = config
            .with_level(level)
            .with_filter(level.as_str().to_lowercase());
        if verbose >= 2 {
            config.with_thread_names(true)
        } else {
            config
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_thread_names(mut self, enabled: bool) -> Self {
        self.show_thread_names = enabled;
        self
    }

    /// Fill in anything not already set from `PROCPOOL_*` / `RUST_LOG`.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("PROCPOOL_LOG") {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }

        if self.filter.is_none()
            && let Ok(level_str) = std::env::var("PROCPOOL_LOG_LEVEL")
        {
            self.level = parse_level(&level_str).unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var("PROCPOOL_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if self.file_path.is_none()
            && let Ok(path) = std::env::var("PROCPOOL_LOG_FILE")
        {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.as_str().to_lowercase());
        match self.filter {
            Some(ref filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(config.show_target)
        .with_thread_names(config.show_thread_names);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}

/// Install the global subscriber. Later calls are silently ignored.
pub fn init(config: LogConfig) {
    let ansi = std::io::stderr().is_terminal() && crate::theme::colors_enabled();
    let mut layers = vec![fmt_layer(&config, std::io::stderr, ansi)];

    if let Some(ref path) = config.file_path {
        let dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("procpool.log");
        let appender = tracing_appender::rolling::never(dir, file_name);
        layers.push(fmt_layer(&config, appender, false));
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(config.build_filter())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("TRACE"), Some(Level::TRACE));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_verbosity_mapping() {
        let config = LogConfig::from_verbosity(0, false);
        assert_eq!(config.level, Level::INFO);
        assert!(config.filter.is_none());

        let config = LogConfig::from_verbosity(1, false);
        assert_eq!(config.filter.as_deref(), Some("debug"));
        assert!(!config.show_thread_names);

        let config = LogConfig::from_verbosity(3, false);
        assert_eq!(config.level, Level::TRACE);
        assert!(config.show_thread_names);

        // Quiet wins over verbose
        let config = LogConfig::from_verbosity(2, true);
        assert_eq!(config.filter.as_deref(), Some("error"));
    }

    #[test]
    fn test_cli_filter_not_overridden_by_env() {
        // Only the already-set filter is checked; no env mutation needed
        let config = LogConfig::default()
            .with_filter("warn".to_string())
            .with_env_overrides();
        assert_eq!(config.filter.as_deref(), Some("warn"));
    }

    #[test]
    fn test_builder() {
        let config = LogConfig::default()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_file(PathBuf::from("/tmp/procpool.log"));
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/procpool.log")));
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        let config = LogConfig::default().with_filter("=[not a filter".to_string());
        // Should not panic
        let _ = config.build_filter();
    }
}
