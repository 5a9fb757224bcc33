//! Colored summary and worker table.

use crate::output::{TableOptions, format_uptime};
use crate::pool::PoolStatus;
use crate::theme::{Semantic, Themed, ThemedCell};
use comfy_table::{
    Cell, CellAlignment, ContentArrangement, Table,
    presets::{ASCII_FULL, UTF8_FULL},
};

/// Summary lines shown above the worker table.
pub fn summary_lines(status: &PoolStatus) -> Vec<String> {
    let state = if status.shutting_down {
        "shutting down".warning()
    } else {
        "running".success()
    };
    let mut lines = vec![
        format!("{} {} (up {})", "Pool:".label(), state, format_uptime(status.uptime_secs)),
        format!(
            "{} {} total, {} ready, {} starting, {} draining, {} pending restart",
            "Workers:".label(),
            status.total_workers.count(),
            status.active_workers,
            status.starting_workers,
            status.draining_workers,
            status.pending_restarts,
        ),
        format!(
            "{} min {}, max {}, baseline {}, autoscale {}",
            "Bounds:".label(),
            status.min_workers,
            status.max_workers,
            status.baseline_workers,
            if status.autoscale_enabled { "on" } else { "off" },
        ),
        format!(
            "{} {} requests, {:.2} ms avg, {} restarts, {} failed",
            "Traffic:".label(),
            status.metrics.total_requests,
            status.metrics.avg_response_time_ms,
            status.total_restarts,
            status.failed_workers,
        ),
    ];
    if let Some(sample) = status.last_sample {
        lines.push(format!(
            "{} cpu {:.1}%, memory {:.1}%",
            "Host:".label(),
            sample.cpu_percent,
            sample.memory_percent
        ));
    }
    lines
}

pub fn build_table(status: &PoolStatus, options: TableOptions) -> Table {
    let mut table = Table::new();
    if options.ascii {
        table.load_preset(ASCII_FULL);
    } else {
        table.load_preset(UTF8_FULL);
    }
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "ID", "PID", "Status", "Uptime", "Restarts", "Requests", "Avg ms", "Mem MiB",
    ]);

    for worker in &status.workers {
        table.add_row(vec![
            Cell::new(worker.id).themed(Semantic::WorkerId),
            Cell::new(worker.pid).themed(Semantic::Pid),
            Cell::new(worker.status).themed(Semantic::for_status(worker.status)),
            Cell::new(format_uptime(worker.uptime_secs)),
            Cell::new(worker.restart_count).set_alignment(CellAlignment::Right),
            Cell::new(worker.requests_served).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", worker.avg_response_time_ms))
                .set_alignment(CellAlignment::Right),
            Cell::new(
                worker
                    .memory_mib
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            )
            .themed(Semantic::Muted)
            .set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

/// Print the summary and, when there are workers, the table.
pub fn print_table(status: &PoolStatus, options: TableOptions) {
    for line in summary_lines(status) {
        println!("{}", line);
    }
    println!();
    if status.workers.is_empty() {
        println!("No workers running.");
        return;
    }
    println!("{}", build_table(status, options));
}
