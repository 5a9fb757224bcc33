//! Message protocol between the supervisor and its workers.
//!
//! Messages are JSON-serialized and newline-delimited. The supervisor writes
//! [`ControlMessage`]s to a worker's stdin; the worker writes
//! [`WorkerMessage`]s to its stdout.

use serde::{Deserialize, Serialize};

/// Message from the supervisor to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Liveness probe; the worker must echo the nonce in a `pong`.
    Ping { nonce: u64 },

    /// Stop accepting new work, finish in-flight work and exit.
    Shutdown,
}

/// Message from a worker to the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Worker finished initializing and accepts work.
    Ready,

    /// Answer to a ping.
    Pong { nonce: u64 },

    /// Periodic advisory counters.
    Stats {
        requests_served: u64,
        avg_response_time_ms: f64,
        /// Current (not peak) resident memory in MiB, when the worker reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memory_mib: Option<u64>,
    },

    /// In-flight work is finished after a shutdown request.
    Drained,
}

impl ControlMessage {
    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> String {
        let mut json = serde_json::to_string(self).expect("ControlMessage serialization failed");
        json.push('\n');
        json
    }
}

impl WorkerMessage {
    /// Create a stats message.
    pub fn stats(requests_served: u64, avg_response_time_ms: f64, memory_mib: Option<u64>) -> Self {
        Self::Stats {
            requests_served,
            avg_response_time_ms,
            memory_mib,
        }
    }

    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> String {
        let mut json = serde_json::to_string(self).expect("WorkerMessage serialization failed");
        json.push('\n');
        json
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_wire_format() {
        let line = ControlMessage::Ping { nonce: 42 }.to_line();
        assert_eq!(line, "{\"type\":\"ping\",\"nonce\":42}\n");
    }

    #[test]
    fn test_shutdown_wire_format() {
        let line = ControlMessage::Shutdown.to_line();
        assert_eq!(line, "{\"type\":\"shutdown\"}\n");
        assert_eq!(
            serde_json::from_str::<ControlMessage>(&line).unwrap(),
            ControlMessage::Shutdown
        );
    }

    #[test]
    fn test_pong_parses_from_foreign_worker() {
        // Workers written in other languages may add whitespace or reorder keys
        let parsed: WorkerMessage =
            serde_json::from_str("  { \"nonce\": 7, \"type\": \"pong\" }  ").unwrap();
        assert_eq!(parsed, WorkerMessage::Pong { nonce: 7 });
    }

    #[test]
    fn test_stats_without_memory() {
        let parsed = serde_json::from_str::<WorkerMessage>(
            r#"{"type":"stats","requests_served":120,"avg_response_time_ms":3.5}"#,
        )
        .unwrap();
        match parsed {
            WorkerMessage::Stats {
                requests_served,
                avg_response_time_ms,
                memory_mib,
            } => {
                assert_eq!(requests_served, 120);
                assert!((avg_response_time_ms - 3.5).abs() < f64::EPSILON);
                assert!(memory_mib.is_none());
            }
            other => panic!("Expected Stats variant, got {:?}", other),
        }
    }

    #[test]
    fn test_stats_omits_missing_memory() {
        let line = WorkerMessage::stats(1, 2.0, None).to_line();
        assert!(!line.contains("memory_mib"));
        let line = WorkerMessage::stats(1, 2.0, Some(64)).to_line();
        assert!(line.contains("\"memory_mib\":64"));
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        assert!(serde_json::from_str::<WorkerMessage>(r#"{"type":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<ControlMessage>("not json").is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Whatever a worker prints, parsing returns Ok or Err without panicking.
        #[test]
        fn worker_line_parse_never_panics(s in "\\PC*") {
            let _ = serde_json::from_str::<WorkerMessage>(&s);
        }

        #[test]
        fn pong_nonce_survives_the_wire(nonce in any::<u64>()) {
            let line = ControlMessage::Ping { nonce }.to_line();
            prop_assert_eq!(serde_json::from_str::<ControlMessage>(&line).unwrap(), ControlMessage::Ping { nonce });
        }
    }
}
