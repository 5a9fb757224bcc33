//! Read-only HTTP status endpoint for a running pool.
//!
//! Enabled with `procpool run --status-addr 127.0.0.1:7070`.
//!
//! ```bash
//! curl http://127.0.0.1:7070/status
//! curl http://127.0.0.1:7070/health
//! ```

pub mod handlers;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::error::{PoolError, Result};
use crate::pool::StatusBoard;

/// Routes for the status endpoint, serving snapshots from `board`.
pub fn router(board: StatusBoard) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/health", get(handlers::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(board)
}

/// Serve `router` on an already-bound listener until the runtime shuts down.
pub async fn serve(listener: tokio::net::TcpListener, router: Router) -> Result<()> {
    axum::serve(listener, router)
        .await
        .map_err(|e| PoolError::Server(e.to_string()))
}
