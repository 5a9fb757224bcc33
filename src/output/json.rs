//! JSON output for pool status.

use crate::pool::PoolStatus;

/// Print the status document as pretty JSON.
pub fn print_json(status: &PoolStatus) {
    let json = serde_json::to_string_pretty(status).unwrap_or_else(|_| "{}".to_string());
    println!("{}", json);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_json_default() {
        // Should not panic
        print_json(&PoolStatus::default());
    }
}
