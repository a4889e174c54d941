//! Core types for livefeed channels.
//!
//! This crate provides the vocabulary shared by every transport:
//! - `ChannelConfig`: immutable channel configuration (TOML loadable)
//! - `ConnectionState`: the single observable channel state
//! - `EventKind`, `UpdateEvent`: typed updates delivered to subscribers
//! - `RetryCounter`: linear reconnect backoff bookkeeping
//! - `TransportEvent`: what transports send to the orchestrator
//! - `LatestCache`: bounded, expiring latest-value-per-kind cache

pub mod cache;
pub mod config;
pub mod error;
pub mod types;

pub use cache::{latest_cache, LatestCache};
pub use config::{ChannelConfig, PollEndpoint, CONFIG_ENV_VAR};
pub use error::{CoreError, Result};
pub use types::{
    ConnectionState, EventKind, EventSource, PushSignal, RetryCounter, TransportEvent,
    UpdateEvent,
};
