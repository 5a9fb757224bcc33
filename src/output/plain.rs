//! Plain text output for pool status.

use crate::pool::{PoolStatus, WorkerView};

/// One tab-separated line per worker, for scripts.
pub fn format_row(worker: &WorkerView) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{:.2}\t{}",
        worker.id,
        worker.pid,
        worker.status,
        worker.uptime_secs,
        worker.restart_count,
        worker.requests_served,
        worker.avg_response_time_ms,
        worker
            .memory_mib
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string()),
    )
}

pub fn print_plain(status: &PoolStatus) {
    println!("ID\tPID\tSTATUS\tUPTIME\tRESTARTS\tREQUESTS\tAVG_MS\tMEM_MIB");
    for worker in &status.workers {
        println!("{}", format_row(worker));
    }
}
