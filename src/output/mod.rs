//! Output formatting for pool status.

pub mod json;
pub mod plain;
pub mod table;

use crate::pool::PoolStatus;

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Colored summary and worker table (default).
    #[default]
    Table,
    /// The raw status document as JSON.
    Json,
    /// Tab-separated worker rows, no colors.
    Plain,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TableOptions {
    /// Use ASCII borders instead of Unicode.
    pub ascii: bool,
}

/// Format and print a pool snapshot.
pub fn print_status(status: &PoolStatus, format: OutputFormat, options: TableOptions) {
    match format {
        OutputFormat::Table => table::print_table(status, options),
        OutputFormat::Json => json::print_json(status),
        OutputFormat::Plain => plain::print_plain(status),
    }
}

/// Compact `1h02m`, `3m05s`, `42s` uptime.
pub fn format_uptime(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m", h, m)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0s");
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(185), "3m05s");
        assert_eq!(format_uptime(3720), "1h02m");
    }
}
