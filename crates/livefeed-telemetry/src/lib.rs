//! Prometheus metrics and structured logging for livefeed.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus counters for transport health, dropped frames and delivery

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
