//! Integration tests for livefeed-channel.
//!
//! These run the channel against real in-process servers:
//! - WebSocket push lifecycle and delivery
//! - Fallback from push to HTTP polling
//! - Teardown on close

pub mod common;
