//! Polling transport.
//!
//! Each endpoint gets its own timer task. The first tick fires immediately
//! so the initial load does not wait a full interval. A failed fetch is
//! logged and counted and the timer keeps its cadence; missed ticks are
//! delayed rather than bursted.

use crate::error::{PollError, PollResult};
use crate::fetcher::PollFetcher;
use livefeed_core::{ChannelConfig, EventKind, EventSource, TransportEvent, UpdateEvent};
use livefeed_telemetry::Metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A resolved poll endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    /// Kind that responses are tagged with.
    pub kind: EventKind,
    /// Absolute request URL.
    pub url: String,
    pub interval: Duration,
}

/// HTTP polling transport.
pub struct PollingTransport<F: PollFetcher> {
    targets: Vec<PollTarget>,
    fetcher: Arc<F>,
    request_timeout: Duration,
    events_tx: mpsc::Sender<TransportEvent>,
    /// Token of the current run; replaced on every `start`.
    shutdown_token: Mutex<CancellationToken>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<F: PollFetcher> PollingTransport<F> {
    pub fn new(
        targets: Vec<PollTarget>,
        fetcher: Arc<F>,
        request_timeout: Duration,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            targets,
            fetcher,
            request_timeout,
            events_tx,
            shutdown_token: Mutex::new(CancellationToken::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Build a transport for every `poll_endpoints` entry of `config`.
    ///
    /// # Errors
    /// `PollError::InvalidEndpoint` if an endpoint does not resolve to an
    /// absolute `http(s)` URL.
    pub fn from_config(
        config: &ChannelConfig,
        fetcher: Arc<F>,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> PollResult<Self> {
        let targets = config
            .poll_endpoints
            .iter()
            .map(|endpoint| {
                let url = config.poll_url(endpoint);
                let parsed = reqwest::Url::parse(&url)
                    .map_err(|e| PollError::InvalidEndpoint(format!("{url}: {e}")))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(PollError::InvalidEndpoint(format!(
                        "{url}: unsupported scheme {}",
                        parsed.scheme()
                    )));
                }
                Ok(PollTarget {
                    kind: endpoint.name,
                    url,
                    interval: endpoint.interval(),
                })
            })
            .collect::<PollResult<Vec<_>>>()?;

        Ok(Self::new(targets, fetcher, config.poll_timeout(), events_tx))
    }

    pub fn targets(&self) -> &[PollTarget] {
        &self.targets
    }

    /// Start one timer per endpoint. No-op while already running.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            debug!("Polling already running");
            return;
        }

        let token = CancellationToken::new();
        *self.shutdown_token.lock() = token.clone();

        for target in &self.targets {
            info!(
                kind = %target.kind,
                url = %target.url,
                interval_ms = target.interval.as_millis() as u64,
                "Starting poll timer"
            );
            handles.push(tokio::spawn(poll_loop(
                target.clone(),
                self.fetcher.clone(),
                self.request_timeout,
                self.events_tx.clone(),
                token.clone(),
            )));
        }
    }

    /// Cancel every timer. Idempotent.
    pub fn stop(&self) {
        self.shutdown_token.lock().cancel();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in &handles {
            handle.abort();
        }
        info!(timers = handles.len(), "Polling stopped");
    }

    /// Number of running timer tasks.
    pub fn active_timers(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl<F: PollFetcher> Drop for PollingTransport<F> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop<F: PollFetcher>(
    target: PollTarget,
    fetcher: Arc<F>,
    request_timeout: Duration,
    events_tx: mpsc::Sender<TransportEvent>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(target.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let endpoint = target.kind.as_str();

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            () = token.cancelled() => break,
            result = tokio::time::timeout(request_timeout, fetcher.fetch(&target.url)) => {
                result.unwrap_or_else(|_| {
                    Err(PollError::Timeout {
                        url: target.url.clone(),
                        timeout_ms: request_timeout.as_millis() as u64,
                    })
                })
            }
        };

        match result {
            Ok(body) => {
                Metrics::poll_fetch(endpoint, true);
                let event = UpdateEvent::new(target.kind, body, EventSource::Poll);
                if events_tx.send(TransportEvent::Update(event)).await.is_err() {
                    debug!(endpoint, "Event receiver dropped, stopping poll timer");
                    break;
                }
            }
            Err(e) => {
                Metrics::poll_fetch(endpoint, false);
                warn!(endpoint, url = %target.url, error = %e, "Poll fetch failed");
            }
        }
    }

    debug!(endpoint, "Poll timer exited");
}
