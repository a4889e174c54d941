//! In-memory connector for exercising `PushTransport` without a network.
//!
//! Each `connect` call consumes the next scripted outcome. Accepted
//! connections are real WebSocket streams over a `tokio::io::duplex` pipe;
//! the server half is handed to the test as a [`MockPeer`].

use crate::connector::PushConnector;
use crate::error::{WsError, WsResult};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const PIPE_CAPACITY: usize = 64 * 1024;

/// What a single `connect` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    /// Fail the handshake.
    Fail,
    /// Accept and hand the server side to the test.
    Accept,
}

/// Scripted connector.
pub struct MockConnector {
    script: Mutex<VecDeque<MockOutcome>>,
    /// Used once the script runs out.
    fallback: MockOutcome,
    supported: bool,
    attempts: Mutex<Vec<Instant>>,
    peers_tx: mpsc::UnboundedSender<MockPeer>,
    peers_rx: TokioMutex<mpsc::UnboundedReceiver<MockPeer>>,
}

impl MockConnector {
    pub fn new(fallback: MockOutcome) -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            supported: true,
            attempts: Mutex::new(Vec::new()),
            peers_tx,
            peers_rx: TokioMutex::new(peers_rx),
        }
    }

    /// Every connection attempt fails.
    pub fn always_failing() -> Self {
        Self::new(MockOutcome::Fail)
    }

    /// Every connection attempt succeeds.
    pub fn accepting() -> Self {
        Self::new(MockOutcome::Accept)
    }

    /// Play `outcomes` in order before falling back.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        self.script.lock().extend(outcomes);
        self
    }

    /// Report that streaming sockets are unavailable.
    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    /// Number of `connect` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    /// When each `connect` call happened (tokio clock).
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    /// Wait for the server side of the next accepted connection.
    pub async fn next_peer(&self) -> Option<MockPeer> {
        self.peers_rx.lock().await.recv().await
    }
}

impl PushConnector for MockConnector {
    type Stream = WebSocketStream<DuplexStream>;

    fn connect(&self, _url: &str) -> impl Future<Output = WsResult<Self::Stream>> + Send {
        self.attempts.lock().push(Instant::now());
        let outcome = self.script.lock().pop_front().unwrap_or(self.fallback);
        let peers_tx = self.peers_tx.clone();

        async move {
            match outcome {
                MockOutcome::Fail => Err(WsError::ConnectionFailed(
                    "mock connection refused".to_string(),
                )),
                MockOutcome::Accept => {
                    let (client_io, server_io) = tokio::io::duplex(PIPE_CAPACITY);
                    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
                    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
                    let _ = peers_tx.send(MockPeer { ws: server });
                    Ok(client)
                }
            }
        }
    }

    fn is_supported(&self) -> bool {
        self.supported
    }
}

/// Server side of an accepted mock connection.
pub struct MockPeer {
    ws: WebSocketStream<DuplexStream>,
}

impl MockPeer {
    /// Send a JSON value as a text frame.
    pub async fn send_json(&mut self, value: serde_json::Value) -> WsResult<()> {
        self.send_text(value.to_string()).await
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: impl Into<String>) -> WsResult<()> {
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Send a binary frame.
    pub async fn send_binary(&mut self, data: Vec<u8>) -> WsResult<()> {
        self.ws.send(Message::Binary(data)).await?;
        Ok(())
    }

    /// Next text frame from the client. `None` once the client is gone.
    pub async fn recv_text(&mut self) -> Option<String> {
        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    }

    /// Next text frame parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    /// Close the connection from the server side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
