//! Initial transport selection.

use livefeed_core::ChannelConfig;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::debug;

/// Outcome of [`select_initial`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportChoice {
    pub use_push: bool,
}

/// Decide whether to start with the push transport.
///
/// Push is used only when an endpoint is configured, it is a well-formed
/// `ws://` or `wss://` URL, and streaming sockets are supported. Anything
/// else selects polling.
pub fn select_initial(config: &ChannelConfig, supports_streaming: bool) -> TransportChoice {
    let use_push = supports_streaming
        && config
            .push_endpoint
            .as_deref()
            .is_some_and(is_push_url);

    debug!(
        use_push,
        supports_streaming,
        push_endpoint = ?config.push_endpoint,
        "Selected initial transport"
    );
    TransportChoice { use_push }
}

/// Whether `url` is a usable WebSocket URL.
pub fn is_push_url(url: &str) -> bool {
    let url = url.trim();
    if url.is_empty() {
        return false;
    }
    match url.into_client_request() {
        Ok(request) => {
            let uri = request.uri();
            matches!(uri.scheme_str(), Some("ws" | "wss")) && uri.host().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}
