//! Channel configuration.

use crate::error::{CoreError, Result};
use crate::types::EventKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "LIVEFEED_CONFIG";

/// One polling cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollEndpoint {
    /// Event kind that responses from this endpoint are tagged with.
    pub name: EventKind,
    /// Absolute `http(s)://` URL, or a path joined onto `poll_base_url`.
    pub path: String,
    /// Polling interval (ms).
    pub interval_ms: u64,
}

impl PollEndpoint {
    pub fn new(name: EventKind, path: impl Into<String>, interval_ms: u64) -> Self {
        Self {
            name,
            path: path.into(),
            interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Live data channel configuration.
///
/// Immutable for the lifetime of a started channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Push (WebSocket) endpoint. Polling only when absent.
    #[serde(default)]
    pub push_endpoint: Option<String>,
    /// Base URL for relative poll endpoint paths.
    #[serde(default)]
    pub poll_base_url: Option<String>,
    /// Polling cadences, in order.
    #[serde(default)]
    pub poll_endpoints: Vec<PollEndpoint>,
    /// Reconnect attempts after the initial connection fails. Default: 3.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff unit (ms). Must be > 0. Default: 1000.
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
    /// Heartbeat ping interval (ms). Default: 30,000.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this (ms). Default: 10,000.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Event types requested with the `subscribe` frame after connecting.
    #[serde(default)]
    pub subscribe_events: Vec<EventKind>,
    /// Per-request HTTP timeout for polling (ms). Default: 10,000.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Re-probe the push endpoint this often while polling (ms). Disabled when absent.
    #[serde(default)]
    pub push_probe_interval_ms: Option<u64>,
    /// Latest-value cache capacity. Default: 32.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Latest-value cache TTL (ms). Default: 300,000.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_poll_timeout_ms() -> u64 {
    10_000
}

fn default_cache_capacity() -> usize {
    32
}

fn default_cache_ttl_ms() -> u64 {
    300_000
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            push_endpoint: None,
            poll_base_url: None,
            poll_endpoints: Vec::new(),
            max_retries: default_max_retries(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            subscribe_events: Vec::new(),
            poll_timeout_ms: default_poll_timeout_ms(),
            push_probe_interval_ms: None,
            cache_capacity: default_cache_capacity(),
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl ChannelConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `LIVEFEED_CONFIG`, or `default_path`.
    pub fn from_env_or(default_path: &str) -> Result<Self> {
        let path = std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| default_path.to_string());
        info!(config_path = %path, "Loading channel configuration");
        Self::from_file(path)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.base_retry_delay_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "base_retry_delay_ms must be > 0".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "heartbeat_interval_ms must be > 0".to_string(),
            ));
        }
        if self.push_probe_interval_ms == Some(0) {
            return Err(CoreError::InvalidConfig(
                "push_probe_interval_ms must be > 0 when set".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for endpoint in &self.poll_endpoints {
            if endpoint.interval_ms == 0 {
                return Err(CoreError::InvalidConfig(format!(
                    "poll endpoint {} has zero interval",
                    endpoint.name
                )));
            }
            if endpoint.path.trim().is_empty() {
                return Err(CoreError::InvalidConfig(format!(
                    "poll endpoint {} has empty path",
                    endpoint.name
                )));
            }
            if !names.insert(endpoint.name) {
                return Err(CoreError::InvalidConfig(format!(
                    "duplicate poll endpoint {}",
                    endpoint.name
                )));
            }
            if !is_absolute_http(&endpoint.path) && self.poll_base_url.is_none() {
                return Err(CoreError::InvalidConfig(format!(
                    "poll endpoint {} uses a relative path but poll_base_url is not set",
                    endpoint.name
                )));
            }
        }

        Ok(())
    }

    /// Resolve the request URL of a poll endpoint.
    pub fn poll_url(&self, endpoint: &PollEndpoint) -> String {
        if is_absolute_http(&endpoint.path) {
            return endpoint.path.clone();
        }
        match &self.poll_base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                endpoint.path.trim_start_matches('/')
            ),
            None => endpoint.path.clone(),
        }
    }

    /// Delay before the first retry.
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn push_probe_interval(&self) -> Option<Duration> {
        self.push_probe_interval_ms.map(Duration::from_millis)
    }
}

fn is_absolute_http(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}
