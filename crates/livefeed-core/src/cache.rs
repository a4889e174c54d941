//! Latest-value cache backing `LiveDataChannel::latest`.
//!
//! One entry per `EventKind`, bounded by `cache_capacity` and expiring
//! `cache_ttl_ms` after the last write.

use crate::config::ChannelConfig;
use crate::types::{EventKind, UpdateEvent};
use moka::sync::Cache;

/// Most recent update per kind.
pub type LatestCache = Cache<EventKind, UpdateEvent>;

/// Build an empty cache sized from `config`.
pub fn latest_cache(config: &ChannelConfig) -> LatestCache {
    Cache::builder()
        .max_capacity(config.cache_capacity as u64)
        .time_to_live(config.cache_ttl())
        .build()
}
