//! HTTP handlers for the status endpoint.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::pool::{PoolStatus, StatusBoard};
use crate::version;

/// Liveness of the supervisor itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, or `shutting_down` once termination has begun.
    pub status: String,
    pub version: String,
    pub workers: usize,
}

/// Latest pool snapshot.
#[instrument(skip(board))]
pub async fn get_status(State(board): State<StatusBoard>) -> Json<PoolStatus> {
    Json(board.snapshot())
}

#[instrument(skip(board))]
pub async fn health_check(State(board): State<StatusBoard>) -> Json<HealthResponse> {
    let status = board.snapshot();
    Json(HealthResponse {
        status: if status.shutting_down {
            "shutting_down".to_string()
        } else {
            "ok".to_string()
        },
        version: version::full_version(),
        workers: status.total_workers,
    })
}
