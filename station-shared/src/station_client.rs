//! HTTP client for interacting with the station_serve API.
//!
//! Consolidates the query and health endpoints for native consumers
//! (dashboards, export scripts, integration tests).

use serde::de::DeserializeOwned;

use crate::{BucketAggregate, HealthInfo, Timestamp};

/// Error type for station server operations.
#[derive(Debug, thiserror::Error)]
pub enum StationError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(String),
    /// Failed to parse response
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned an error status
    #[error("Server error (status {status}): {message}")]
    ServerError { status: u16, message: String },
}

impl From<reqwest::Error> for StationError {
    fn from(err: reqwest::Error) -> Self {
        StationError::Http(err.to_string())
    }
}

/// Client for the station HTTP API.
#[derive(Debug, Clone)]
pub struct StationClient {
    base_url: String,
    http: reqwest::Client,
}

impl StationClient {
    /// Create a new client pointing to the given base URL.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of station_serve (e.g., "http://localhost:8518")
    pub fn new(base_url: &str) -> Self {
        // Remove trailing slash if present
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Get the base URL this client is configured for.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, StationError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StationError::ServerError {
                status: status.as_u16(),
                message: response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string()),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StationError::Parse(e.to_string()))
    }

    /// Check that the server is up.
    pub async fn health(&self) -> Result<HealthInfo, StationError> {
        self.get("/health", &[]).await
    }

    /// Fetch bucketed history for `[start, end)`.
    ///
    /// `buckets` falls back to the server's configured default when `None`.
    pub async fn history(
        &self,
        start: Timestamp,
        end: Timestamp,
        buckets: Option<u32>,
    ) -> Result<Vec<BucketAggregate>, StationError> {
        let mut query = vec![("start", start.to_string()), ("end", end.to_string())];
        if let Some(buckets) = buckets {
            query.push(("buckets", buckets.to_string()));
        }
        self.get("/query", &query).await
    }
}
