//! HTTP fetching for poll endpoints.

use crate::error::{PollError, PollResult};
use reqwest::header::ACCEPT;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Default timeout for poll requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches the JSON body of a poll endpoint.
pub trait PollFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = PollResult<serde_json::Value>> + Send;
}

/// reqwest-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default request timeout.
    pub fn new() -> PollResult<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> PollResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PollError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

impl PollFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = PollResult<serde_json::Value>> + Send {
        let request = self.client.get(url).header(ACCEPT, "application/json");
        let url = url.to_string();

        async move {
            let response = request
                .send()
                .await
                .map_err(|e| PollError::HttpClient(format!("HTTP request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(PollError::Status {
                    status: status.as_u16(),
                    url,
                });
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| PollError::InvalidBody(format!("Failed to parse response: {e}")))?;

            debug!(url = %url, "Poll response received");
            Ok(body)
        }
    }
}
