//! Prometheus metrics for livefeed channels.
//!
//! Covers:
//! - Channel connection state
//! - Push reconnects, heartbeat round trips, fallbacks to polling
//! - Frames dropped at the parse boundary (malformed or unknown type)
//! - Poll fetch outcomes per endpoint
//! - Delivery to subscribers and subscriber panics
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a programming error that should crash on
//! first use rather than silently drop observability.

use crate::error::TelemetryResult;
use livefeed_core::ConnectionState;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram,
    register_int_gauge, Counter, CounterVec, Encoder, GaugeVec, Histogram, IntGauge, TextEncoder,
};

/// Longest label value recorded for unknown event tags.
const MAX_TAG_LABEL_LEN: usize = 64;

/// Channel state (1 = active, 0 = inactive).
/// Labels: state (idle/connecting/connected/reconnecting/polling/failed)
pub static CONNECTION_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "livefeed_connection_state",
        "Live data channel state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Push reconnection attempts.
pub static RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "livefeed_reconnect_total",
        "Total push transport reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Switches from push to polling after retries were exhausted.
pub static FALLBACK_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "livefeed_fallback_total",
        "Total fallbacks from push transport to polling"
    )
    .unwrap()
});

/// Frames received on the push transport.
pub static PUSH_FRAMES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "livefeed_push_frames_total",
        "Total text frames received on the push transport"
    )
    .unwrap()
});

/// Payloads dropped because they could not be parsed.
pub static MALFORMED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "livefeed_malformed_total",
        "Total payloads dropped at the parse boundary",
        &["source"]
    )
    .unwrap()
});

/// Frames dropped because their type tag is not a known event kind.
pub static UNKNOWN_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "livefeed_unknown_events_total",
        "Total frames with an unknown event type",
        &["event_type"]
    )
    .unwrap()
});

/// Poll fetches by endpoint and outcome (ok/error).
pub static POLL_FETCH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "livefeed_poll_fetch_total",
        "Total poll fetches",
        &["endpoint", "outcome"]
    )
    .unwrap()
});

/// Events fanned out to subscribers.
pub static EVENTS_DELIVERED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "livefeed_events_delivered_total",
        "Total update events dispatched to subscribers",
        &["kind", "source"]
    )
    .unwrap()
});

/// Subscriber handlers that panicked during delivery.
pub static SUBSCRIBER_PANICS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "livefeed_subscriber_panics_total",
        "Total subscriber handler panics caught during delivery"
    )
    .unwrap()
});

/// Registered subscribers.
pub static SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("livefeed_subscribers", "Registered subscribers").unwrap()
});

/// Heartbeat round-trip time in milliseconds.
pub static HEARTBEAT_RTT_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "livefeed_heartbeat_rtt_ms",
        "Heartbeat ping/pong round-trip time in milliseconds",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set the active channel state; all others are zeroed.
    pub fn connection_state(state: ConnectionState) {
        for s in ConnectionState::ALL {
            CONNECTION_STATE.with_label_values(&[s.as_str()]).set(0.0);
        }
        CONNECTION_STATE
            .with_label_values(&[state.as_str()])
            .set(1.0);
    }

    /// Record a push reconnection attempt.
    pub fn reconnect(reason: &str) {
        RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record a fallback from push to polling.
    pub fn fallback_to_polling() {
        FALLBACK_TOTAL.inc();
    }

    /// Record a push text frame.
    pub fn push_frame() {
        PUSH_FRAMES_TOTAL.inc();
    }

    /// Record a payload dropped as malformed.
    pub fn malformed(source: &str) {
        MALFORMED_TOTAL.with_label_values(&[source]).inc();
    }

    /// Record a frame with an unknown event type.
    pub fn unknown_event(event_type: &str) {
        let label = truncate_label(event_type);
        UNKNOWN_EVENTS_TOTAL.with_label_values(&[label]).inc();
    }

    /// Record a poll fetch outcome.
    pub fn poll_fetch(endpoint: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        POLL_FETCH_TOTAL
            .with_label_values(&[endpoint, outcome])
            .inc();
    }

    /// Record an event dispatched to subscribers.
    pub fn event_delivered(kind: &str, source: &str) {
        EVENTS_DELIVERED_TOTAL
            .with_label_values(&[kind, source])
            .inc();
    }

    /// Record a caught subscriber panic.
    pub fn subscriber_panic() {
        SUBSCRIBER_PANICS_TOTAL.inc();
    }

    /// Set the registered subscriber count.
    pub fn subscribers(count: usize) {
        SUBSCRIBERS.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Record a heartbeat round trip.
    pub fn heartbeat_rtt(rtt_ms: f64) {
        HEARTBEAT_RTT_MS.observe(rtt_ms);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn truncate_label(value: &str) -> &str {
    if value.len() <= MAX_TAG_LABEL_LEN {
        return value;
    }
    let mut end = MAX_TAG_LABEL_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
