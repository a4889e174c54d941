//! Heartbeat tracking for the push connection.
//!
//! A `ping` frame goes out every interval; the matching `pong` must arrive
//! within the timeout or the connection is treated as silently dropped.

use livefeed_telemetry::Metrics;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Heartbeat state for one connection.
#[derive(Debug)]
pub struct HeartbeatManager {
    /// How often to send a ping.
    interval: Duration,
    /// How long to wait for the pong.
    timeout: Duration,
    last_ping: Option<Instant>,
    waiting_for_pong: bool,
}

impl HeartbeatManager {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_ping: None,
            waiting_for_pong: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record that a ping was sent.
    ///
    /// An unanswered earlier ping keeps its original deadline.
    pub fn record_ping(&mut self) {
        if self.waiting_for_pong {
            return;
        }
        self.last_ping = Some(Instant::now());
        self.waiting_for_pong = true;
        debug!("Recorded ping");
    }

    /// Record that a pong was received. Returns the round-trip time.
    pub fn record_pong(&mut self) -> Option<Duration> {
        let now = Instant::now();
        let was_waiting = std::mem::replace(&mut self.waiting_for_pong, false);

        let rtt = self
            .last_ping
            .filter(|_| was_waiting)
            .map(|ping_time| now.saturating_duration_since(ping_time));
        if let Some(rtt) = rtt {
            debug!(rtt_ms = rtt.as_millis() as u64, "Received pong");
            Metrics::heartbeat_rtt(rtt.as_secs_f64() * 1000.0);
        }
        rtt
    }

    /// Deadline for the outstanding pong, if a ping is unanswered.
    pub fn pong_deadline(&self) -> Option<Instant> {
        if !self.waiting_for_pong {
            return None;
        }
        self.last_ping.map(|ping_time| ping_time + self.timeout)
    }
}
