//! WebSocket push transport for livefeed channels.
//!
//! Provides:
//! - Bounded reconnection with linear backoff, then a single permanent failure signal
//! - Application-level heartbeat (`ping`/`pong`) with timeout detection
//! - `subscribe` control frame after every (re)connection
//! - Parse-boundary validation of inbound frames into typed update events
//! - A `PushConnector` seam so the socket can be replaced in tests

pub mod connector;
pub mod error;
pub mod heartbeat;
pub mod message;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use connector::{probe, PushConnector, TungsteniteConnector};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatManager;
pub use message::{parse_frame, InboundFrame, OutboundFrame};
pub use transport::{PushConfig, PushState, PushTransport};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
