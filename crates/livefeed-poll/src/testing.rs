//! Scripted fetcher for exercising `PollingTransport` without HTTP.

use crate::error::{PollError, PollResult};
use crate::fetcher::PollFetcher;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio::time::Instant;

/// Canned response for one URL.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Json(serde_json::Value),
    /// Non-2xx status.
    Status(u16),
    /// Body that is not JSON.
    InvalidBody,
}

/// Fetcher that answers from a table and records every call.
///
/// URLs without an entry answer `{"url": <url>}`.
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, MockResponse>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response` from now on.
    pub fn respond(&self, url: impl Into<String>, response: MockResponse) {
        self.responses.lock().insert(url.into(), response);
    }

    pub fn with_response(self, url: impl Into<String>, response: MockResponse) -> Self {
        self.respond(url, response);
        self
    }

    /// Total number of fetches.
    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of fetches of `url`.
    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|(u, _)| u == url).count()
    }

    /// When each fetch of `url` happened (tokio clock).
    pub fn call_times(&self, url: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, at)| *at)
            .collect()
    }
}

impl PollFetcher for MockFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = PollResult<serde_json::Value>> + Send {
        self.calls.lock().push((url.to_string(), Instant::now()));
        let response = self.responses.lock().get(url).cloned();
        let url = url.to_string();

        async move {
            match response {
                Some(MockResponse::Json(value)) => Ok(value),
                Some(MockResponse::Status(status)) => Err(PollError::Status { status, url }),
                Some(MockResponse::InvalidBody) => Err(PollError::InvalidBody(
                    "expected value at line 1 column 1".to_string(),
                )),
                None => Ok(serde_json::json!({ "url": url })),
            }
        }
    }
}
