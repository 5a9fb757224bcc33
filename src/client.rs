//! HTTP client for a running supervisor's status endpoint.
//!
//! Used by `procpool status`. The supervisor must have been started with
//! `--status-addr`.

use crate::error::{PoolError, Result};
use crate::pool::PoolStatus;
use crate::server::handlers::HealthResponse;
use reqwest::blocking::Client;
use std::time::Duration;

/// Default endpoint queried by `procpool status`.
pub const DEFAULT_STATUS_URL: &str = "http://127.0.0.1:7070";

/// Blocking client for the status endpoint.
pub struct StatusClient {
    base_url: String,
    client: Client,
}

impl StatusClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PoolError::Network)?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the current pool snapshot.
    pub fn get_status(&self) -> Result<PoolStatus> {
        self.get(&format!("{}/status", self.base_url))
    }

    pub fn get_health(&self) -> Result<HealthResponse> {
        self.get(&format!("{}/health", self.base_url))
    }

    /// Perform a GET request and parse the JSON body.
    fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client.get(url).send().map_err(PoolError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PoolError::ApiError {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.json().map_err(PoolError::Network)
    }
}
