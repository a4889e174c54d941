//! Socket establishment.
//!
//! `PushTransport` only needs a message stream/sink; how the socket is
//! opened is behind `PushConnector` so tests can hand it an in-memory one.

use crate::error::{WsError, WsResult};
use futures_util::{Sink, SinkExt, Stream};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

/// Default handshake timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens push connections.
pub trait PushConnector: Send + Sync + 'static {
    /// Established connection: a stream of inbound and a sink of outbound messages.
    type Stream: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin
        + Send
        + 'static;

    /// Open a connection to `url`.
    fn connect(&self, url: &str) -> impl Future<Output = WsResult<Self::Stream>> + Send;

    /// Whether this runtime can open streaming sockets at all.
    fn is_supported(&self) -> bool {
        true
    }
}

/// tokio-tungstenite connector (ws:// and wss://).
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl PushConnector for TungsteniteConnector {
    type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn connect(&self, url: &str) -> impl Future<Output = WsResult<Self::Stream>> + Send {
        let url = url.to_string();
        let timeout = self.connect_timeout;

        async move {
            // TCP_NODELAY: frames are small and latency-sensitive
            let handshake = connect_async_tls_with_config(url.as_str(), None, true, None);
            let (ws_stream, response) = tokio::time::timeout(timeout, handshake)
                .await
                .map_err(|_| {
                    WsError::ConnectionFailed(format!(
                        "handshake timed out after {}ms",
                        timeout.as_millis()
                    ))
                })??;
            debug!(status = %response.status(), "WebSocket handshake complete");
            Ok(ws_stream)
        }
    }
}

/// Check whether the push endpoint accepts connections again.
///
/// Opens a connection and closes it right away.
pub async fn probe<C: PushConnector>(connector: &C, url: &str) -> bool {
    match connector.connect(url).await {
        Ok(mut stream) => {
            let _ = stream.close().await;
            info!(url = %url, "Push endpoint reachable");
            true
        }
        Err(e) => {
            debug!(url = %url, error = %e, "Push endpoint still unreachable");
            false
        }
    }
}
