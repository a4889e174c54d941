//! Channel state and update event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Observable state of a live data channel.
///
/// Exactly one value is current per channel. `Connected` and `Polling` are
/// mutually exclusive because the channel owns at most one live transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not started, or closed.
    #[default]
    Idle,
    /// First push connection attempt in progress.
    Connecting,
    /// Push transport is connected.
    Connected,
    /// Push transport lost its connection and is retrying.
    Reconnecting,
    /// Polling transport is active.
    Polling,
    /// Push failed permanently and there is nothing to fall back to.
    Failed,
}

impl ConnectionState {
    /// All states, in declaration order.
    pub const ALL: [ConnectionState; 6] = [
        Self::Idle,
        Self::Connecting,
        Self::Connected,
        Self::Reconnecting,
        Self::Polling,
        Self::Failed,
    ];

    /// Lowercase label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Polling => "polling",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag of an update event.
///
/// This is a closed set validated at the parse boundary: frames carrying any
/// other tag are rejected and counted instead of being forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Fast-moving dashboard metrics.
    #[serde(rename = "metrics.update")]
    Metrics,
    /// Chart series data.
    #[serde(rename = "chart.update")]
    Chart,
    /// Full dashboard refresh.
    #[serde(rename = "dashboard.refresh")]
    Refresh,
    #[serde(rename = "market.update")]
    MarketUpdate,
    #[serde(rename = "portfolio.update")]
    PortfolioUpdate,
    #[serde(rename = "trade.executed")]
    TradeExecuted,
    #[serde(rename = "order.update")]
    OrderUpdate,
    #[serde(rename = "alert")]
    Alert,
    #[serde(rename = "notification")]
    Notification,
    #[serde(rename = "chat.message")]
    ChatMessage,
    #[serde(rename = "analytics.event")]
    AnalyticsEvent,
    #[serde(rename = "collection.update")]
    CollectionUpdate,
}

impl EventKind {
    /// Every known event kind.
    pub const ALL: [EventKind; 12] = [
        Self::Metrics,
        Self::Chart,
        Self::Refresh,
        Self::MarketUpdate,
        Self::PortfolioUpdate,
        Self::TradeExecuted,
        Self::OrderUpdate,
        Self::Alert,
        Self::Notification,
        Self::ChatMessage,
        Self::AnalyticsEvent,
        Self::CollectionUpdate,
    ];

    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metrics => "metrics.update",
            Self::Chart => "chart.update",
            Self::Refresh => "dashboard.refresh",
            Self::MarketUpdate => "market.update",
            Self::PortfolioUpdate => "portfolio.update",
            Self::TradeExecuted => "trade.executed",
            Self::OrderUpdate => "order.update",
            Self::Alert => "alert",
            Self::Notification => "notification",
            Self::ChatMessage => "chat.message",
            Self::AnalyticsEvent => "analytics.event",
            Self::CollectionUpdate => "collection.update",
        }
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| s.to_string())
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which transport produced an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Push,
    Poll,
}

/// A single update delivered to subscribers.
///
/// Handlers receive `&UpdateEvent`; anything they want to keep past the
/// callback has to be cloned out.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    pub kind: EventKind,
    /// Opaque structured payload, forwarded verbatim.
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub source: EventSource,
}

impl UpdateEvent {
    /// Create an event stamped with the current time.
    pub fn new(kind: EventKind, payload: serde_json::Value, source: EventSource) -> Self {
        Self {
            kind,
            payload,
            received_at: Utc::now(),
            source,
        }
    }
}

/// Reconnect bookkeeping for a push transport.
///
/// Backoff is linear: the k-th retry waits `base_delay_ms * k`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCounter {
    /// Consecutive failed connections since the last success.
    pub attempts: u32,
    /// Delay that the next retry will wait.
    pub next_delay_ms: u64,
    base_delay_ms: u64,
}

impl RetryCounter {
    /// Create a counter at zero attempts.
    pub fn new(base_delay_ms: u64) -> Self {
        Self {
            attempts: 0,
            next_delay_ms: base_delay_ms,
            base_delay_ms,
        }
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_delay_ms = self.base_delay_ms;
    }

    /// Register a failed connection.
    ///
    /// Returns the delay to wait before the next attempt, or `None` once
    /// `max_retries` retries have been used up.
    pub fn next_retry(&mut self, max_retries: u32) -> Option<u64> {
        if self.attempts >= max_retries {
            return None;
        }
        self.attempts += 1;
        let delay = self.base_delay_ms.saturating_mul(u64::from(self.attempts));
        self.next_delay_ms = self
            .base_delay_ms
            .saturating_mul(u64::from(self.attempts) + 1);
        Some(delay)
    }

    /// Whether `max_retries` has been reached.
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.attempts >= max_retries
    }
}

/// Lifecycle signal from a push transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushSignal {
    /// Initial connection attempt started.
    Connecting,
    /// Connection established.
    Connected,
    /// Server greeting named our client id.
    Identified { client_id: String },
    /// Connection lost; retry `attempt` starts after `delay_ms`.
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Retries exhausted. Sent at most once per transport.
    Failed { attempts: u32 },
    /// A probe reached the push endpoint again while polling.
    Recovered,
}

/// Message from a transport task to the orchestrator.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Update(UpdateEvent),
    Push(PushSignal),
}
