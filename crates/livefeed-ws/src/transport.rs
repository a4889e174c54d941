//! Push transport.
//!
//! Owns one streaming connection at a time: connects, sends the `subscribe`
//! frame, runs the heartbeat, forwards validated updates, and reconnects with
//! linear backoff until `max_retries` is used up. Everything it observes is
//! reported to the orchestrator as `TransportEvent`s; nothing is returned to
//! the caller except through that channel.

use crate::connector::PushConnector;
use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{parse_frame, InboundFrame, OutboundFrame};
use futures_util::{SinkExt, StreamExt};
use livefeed_core::{
    ChannelConfig, EventKind, EventSource, PushSignal, RetryCounter, TransportEvent, UpdateEvent,
};
use livefeed_telemetry::Metrics;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outbound queue depth.
const OUTBOUND_CAPACITY: usize = 100;

/// Push transport configuration.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnect attempts after the initial connection fails.
    pub max_retries: u32,
    /// Linear backoff unit (ms).
    pub base_retry_delay_ms: u64,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    /// Event types requested after each connection.
    pub subscribe_events: Vec<EventKind>,
}

impl PushConfig {
    /// Push settings of a channel config. `None` when no push endpoint is set.
    pub fn from_channel(config: &ChannelConfig) -> Option<Self> {
        let url = config.push_endpoint.clone()?;
        Some(Self {
            url,
            max_retries: config.max_retries,
            base_retry_delay_ms: config.base_retry_delay_ms,
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            subscribe_events: config.subscribe_events.clone(),
        })
    }
}

/// Push transport lifecycle.
///
/// Idle → Connecting → {Connected ⇄ Reconnecting} → Failed, or back to Idle on close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries exhausted. Terminal for this instance.
    Failed,
}

/// WebSocket push transport.
pub struct PushTransport<C: PushConnector> {
    config: PushConfig,
    connector: Arc<C>,
    state: Arc<RwLock<PushState>>,
    retry: Mutex<RetryCounter>,
    client_id: RwLock<Option<String>>,
    /// Events for the orchestrator.
    events_tx: mpsc::Sender<TransportEvent>,
    outbound_tx: mpsc::Sender<String>,
    /// Consumed by the connection loop.
    outbound_rx: TokioMutex<mpsc::Receiver<String>>,
    shutdown_token: CancellationToken,
}

impl<C: PushConnector> PushTransport<C> {
    pub fn new(
        config: PushConfig,
        connector: Arc<C>,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        Self {
            retry: Mutex::new(RetryCounter::new(config.base_retry_delay_ms)),
            config,
            connector,
            state: Arc::new(RwLock::new(PushState::Idle)),
            client_id: RwLock::new(None),
            events_tx,
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> PushState {
        *self.state.read()
    }

    pub fn retry_counter(&self) -> RetryCounter {
        self.retry.lock().clone()
    }

    /// Client id from the server's `connection.established` greeting.
    pub fn client_id(&self) -> Option<String> {
        self.client_id.read().clone()
    }

    /// Queue a text frame. Dropped (and logged) unless connected.
    pub fn send(&self, message: impl Into<String>) -> bool {
        if self.state() != PushState::Connected {
            warn!(state = ?self.state(), "Push transport not connected, dropping message");
            return false;
        }
        match self.outbound_tx.try_send(message.into()) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to queue outbound message");
                false
            }
        }
    }

    /// Stop the transport: heartbeat, pending reconnect delay and socket.
    ///
    /// Idempotent. The run loop observes the cancellation at its next await
    /// point and returns without emitting further signals.
    pub fn close(&self) {
        if !self.shutdown_token.is_cancelled() {
            info!(url = %self.config.url, "Push transport close requested");
            self.shutdown_token.cancel();
        }
        *self.state.write() = PushState::Idle;
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and keep the connection alive until close or permanent failure.
    pub async fn run(&self) {
        if self.is_closed() {
            return;
        }
        *self.state.write() = PushState::Connecting;
        self.emit(TransportEvent::Push(PushSignal::Connecting)).await;

        loop {
            let result = tokio::select! {
                biased;
                () = self.shutdown_token.cancelled() => {
                    return self.finish_closed();
                }
                result = self.connect_and_serve() => result,
            };

            if self.is_closed() {
                return self.finish_closed();
            }

            let reason = match &result {
                Ok(()) => {
                    info!("Push connection ended");
                    "closed"
                }
                Err(e) => {
                    warn!(error = %e, "Push connection lost");
                    e.reason()
                }
            };

            let next = self.retry.lock().next_retry(self.config.max_retries);
            let Some(delay_ms) = next else {
                let attempts = self.retry.lock().attempts;
                *self.state.write() = PushState::Failed;
                error!(attempts, "Max reconnection attempts reached");
                self.emit(TransportEvent::Push(PushSignal::Failed { attempts }))
                    .await;
                return;
            };

            let attempt = self.retry.lock().attempts;
            *self.state.write() = PushState::Reconnecting;
            Metrics::reconnect(reason);
            warn!(attempt, delay_ms, "Reconnecting");
            self.emit(TransportEvent::Push(PushSignal::Reconnecting { attempt, delay_ms }))
                .await;

            tokio::select! {
                biased;
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff");
                    return self.finish_closed();
                }
                () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
        }
    }

    fn finish_closed(&self) {
        *self.state.write() = PushState::Idle;
        debug!("Push transport stopped");
    }

    async fn emit(&self, event: TransportEvent) {
        if self.events_tx.send(event).await.is_err() {
            debug!("Transport event receiver dropped");
        }
    }

    async fn connect_and_serve(&self) -> WsResult<()> {
        info!(url = %self.config.url, "Connecting to push endpoint");

        let ws_stream = self.connector.connect(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        // `send` refuses while not connected, so anything queued here predates this connection
        let mut outbound_rx = self.outbound_rx.lock().await;
        let mut stale = 0usize;
        while outbound_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "Discarded messages queued before reconnect");
        }

        self.retry.lock().reset();
        *self.client_id.write() = None;
        *self.state.write() = PushState::Connected;
        info!("Push transport connected");
        self.emit(TransportEvent::Push(PushSignal::Connected)).await;

        if !self.config.subscribe_events.is_empty() {
            let frame = OutboundFrame::subscribe(&self.config.subscribe_events).to_text()?;
            write.send(Message::Text(frame)).await?;
            debug!(events = ?self.config.subscribe_events, "Sent subscribe frame");
        }

        let mut heartbeat =
            HeartbeatManager::new(self.config.heartbeat_interval, self.config.heartbeat_timeout);
        let mut ping_interval = tokio::time::interval_at(
            Instant::now() + heartbeat.interval(),
            heartbeat.interval(),
        );
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let pong_deadline = heartbeat.pong_deadline();
            let pong_timeout = async move {
                match pong_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text, &mut heartbeat).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat.record_pong();
                        }
                        Some(Ok(Message::Binary(data))) => {
                            warn!(len = data.len(), "Dropping binary push frame");
                            Metrics::malformed("push");
                        }
                        Some(Ok(Message::Frame(_))) => {
                            warn!("Dropping raw push frame");
                            Metrics::malformed("push");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "Push connection closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            warn!("Push stream ended");
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended".to_string(),
                            });
                        }
                    }
                }

                outbound = outbound_rx.recv() => {
                    if let Some(text) = outbound {
                        write
                            .send(Message::Text(text))
                            .await
                            .map_err(|e| WsError::SendFailed(e.to_string()))?;
                    }
                }

                () = pong_timeout => {
                    error!("Heartbeat timeout");
                    return Err(WsError::HeartbeatTimeout);
                }

                _ = ping_interval.tick() => {
                    let ping = OutboundFrame::Ping.to_text()?;
                    write.send(Message::Text(ping)).await?;
                    heartbeat.record_ping();
                    debug!("Sent heartbeat ping");
                }
            }
        }
    }

    /// Validate one text frame. Bad frames are dropped here and never reach subscribers.
    async fn handle_text_message(&self, text: &str, heartbeat: &mut HeartbeatManager) {
        Metrics::push_frame();

        match parse_frame(text) {
            Ok(InboundFrame::Pong) => {
                heartbeat.record_pong();
            }
            Ok(InboundFrame::ConnectionEstablished { client_id }) => {
                info!(client_id = ?client_id, "Push connection established");
                *self.client_id.write() = client_id.clone();
                if let Some(client_id) = client_id {
                    self.emit(TransportEvent::Push(PushSignal::Identified { client_id }))
                        .await;
                }
            }
            Ok(InboundFrame::Update { kind, data }) => {
                let event = UpdateEvent::new(kind, data, EventSource::Push);
                self.emit(TransportEvent::Update(event)).await;
            }
            Err(WsError::UnknownEventType(event_type)) => {
                warn!(%event_type, "Dropping frame with unknown event type");
                Metrics::unknown_event(&event_type);
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed push frame");
                Metrics::malformed("push");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnector, MockOutcome};
    use serde_json::json;

    fn push_config(max_retries: u32, base_retry_delay_ms: u64) -> PushConfig {
        PushConfig {
            url: "ws://mock.invalid/ws".to_string(),
            max_retries,
            base_retry_delay_ms,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            subscribe_events: Vec::new(),
        }
    }

    fn drain(rx: &mut mpsc::Receiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn push_signals(events: &[TransportEvent]) -> Vec<PushSignal> {
        events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Push(signal) => Some(signal.clone()),
                TransportEvent::Update(_) => None,
            })
            .collect()
    }

    /// Wait until `signal` arrives, returning every signal seen up to it.
    async fn wait_for_signal(
        rx: &mut mpsc::Receiver<TransportEvent>,
        signal: PushSignal,
    ) -> Vec<PushSignal> {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            if let TransportEvent::Push(s) = event {
                let done = s == signal;
                seen.push(s);
                if done {
                    break;
                }
            }
        }
        seen
    }

    #[test]
    fn test_push_config_from_channel() {
        assert!(PushConfig::from_channel(&ChannelConfig::default()).is_none());

        let channel = ChannelConfig {
            push_endpoint: Some("wss://example.com/ws".to_string()),
            max_retries: 7,
            ..Default::default()
        };
        let config = PushConfig::from_channel(&channel).unwrap();
        assert_eq!(config.url, "wss://example.com/ws");
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_reported_once() {
        for max_retries in 0..4u32 {
            let connector = Arc::new(MockConnector::always_failing());
            let (tx, mut rx) = mpsc::channel(64);
            let transport = PushTransport::new(push_config(max_retries, 100), connector.clone(), tx);

            transport.run().await;

            let signals = push_signals(&drain(&mut rx));
            let failures = signals
                .iter()
                .filter(|s| matches!(s, PushSignal::Failed { .. }))
                .count();
            assert_eq!(failures, 1);
            assert_eq!(
                signals.last(),
                Some(&PushSignal::Failed {
                    attempts: max_retries
                })
            );
            assert_eq!(connector.attempts(), max_retries as usize + 1);
            assert_eq!(transport.state(), PushState::Failed);

            // Nothing further happens after the failure
            tokio::time::advance(Duration::from_secs(60)).await;
            assert_eq!(connector.attempts(), max_retries as usize + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_delays() {
        let connector = Arc::new(MockConnector::always_failing());
        let (tx, mut rx) = mpsc::channel(64);
        let transport = PushTransport::new(push_config(4, 250), connector.clone(), tx);

        transport.run().await;

        let delays: Vec<u64> = push_signals(&drain(&mut rx))
            .into_iter()
            .filter_map(|s| match s {
                PushSignal::Reconnecting { delay_ms, .. } => Some(delay_ms),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![250, 500, 750, 1000]);

        let times = connector.attempt_times();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(750),
                Duration::from_millis(1000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_backoff_cancels_reconnect() {
        let connector = Arc::new(MockConnector::always_failing());
        let (tx, mut rx) = mpsc::channel(64);
        let transport = Arc::new(PushTransport::new(
            push_config(5, 1_000),
            connector.clone(),
            tx,
        ));

        let runner = transport.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        // Initial attempt fails, first backoff (1s) is pending
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(transport.state(), PushState::Reconnecting);

        transport.close();
        handle.await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(transport.state(), PushState::Idle);
        assert!(!push_signals(&drain(&mut rx))
            .iter()
            .any(|s| matches!(s, PushSignal::Failed { .. })));

        // Idempotent
        transport.close();
        assert!(transport.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_subscribe_and_forward_updates() {
        let connector = Arc::new(MockConnector::accepting());
        let (tx, mut rx) = mpsc::channel(64);
        let mut config = push_config(2, 100);
        config.subscribe_events = vec![EventKind::MarketUpdate, EventKind::Alert];
        let transport = Arc::new(PushTransport::new(config, connector.clone(), tx));

        let runner = transport.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        let mut peer = connector.next_peer().await.unwrap();
        assert_eq!(
            peer.recv_json().await.unwrap(),
            json!({"type": "subscribe", "event_types": ["market.update", "alert"]})
        );

        peer.send_json(json!({"type": "connection.established", "data": {"client_id": "abc"}}))
            .await
            .unwrap();
        peer.send_text("{broken").await.unwrap();
        peer.send_json(json!({"type": "price.tick", "data": {}}))
            .await
            .unwrap();
        peer.send_json(json!({"type": "market.update", "data": {"symbol": "ETH"}}))
            .await
            .unwrap();

        let mut updates = Vec::new();
        let mut signals = Vec::new();
        while updates.is_empty() {
            match rx.recv().await.unwrap() {
                TransportEvent::Update(event) => updates.push(event),
                TransportEvent::Push(signal) => signals.push(signal),
            }
        }

        assert_eq!(
            signals,
            vec![
                PushSignal::Connecting,
                PushSignal::Connected,
                PushSignal::Identified {
                    client_id: "abc".to_string()
                },
            ]
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kind, EventKind::MarketUpdate);
        assert_eq!(updates[0].payload, json!({"symbol": "ETH"}));
        assert_eq!(updates[0].source, EventSource::Push);
        assert_eq!(transport.client_id().as_deref(), Some("abc"));
        assert_eq!(transport.state(), PushState::Connected);

        transport.close();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_connection() {
        let connector = Arc::new(MockConnector::accepting());
        let (tx, mut rx) = mpsc::channel(64);
        let transport = Arc::new(PushTransport::new(push_config(0, 100), connector.clone(), tx));

        assert!(!transport.send(r#"{"type":"chat.message"}"#));

        let runner = transport.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        let mut peer = connector.next_peer().await.unwrap();
        wait_for_signal(&mut rx, PushSignal::Connected).await;

        assert!(transport.send(r#"{"type":"chat.message","data":{"text":"hi"}}"#));
        assert_eq!(
            peer.recv_json().await.unwrap(),
            json!({"type": "chat.message", "data": {"text": "hi"}})
        );

        transport.close();
        handle.await.unwrap();
        assert!(!transport.send("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_right_after_connect_is_delivered() {
        let connector = Arc::new(MockConnector::accepting());
        // Room for one event only: the runner stalls emitting `Connected`
        let (tx, mut rx) = mpsc::channel(1);
        let transport = Arc::new(PushTransport::new(push_config(0, 100), connector.clone(), tx));

        let runner = transport.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        let mut peer = connector.next_peer().await.unwrap();

        while transport.state() != PushState::Connected {
            tokio::task::yield_now().await;
        }
        assert!(transport.send(r#"{"type":"chat.message","data":{"text":"early"}}"#));

        assert_eq!(
            wait_for_signal(&mut rx, PushSignal::Connected).await,
            vec![PushSignal::Connecting, PushSignal::Connected]
        );
        assert_eq!(
            peer.recv_json().await.unwrap(),
            json!({"type": "chat.message", "data": {"text": "early"}})
        );

        transport.close();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_binary_frames_dropped_and_counted() {
        let malformed = livefeed_telemetry::metrics::MALFORMED_TOTAL.with_label_values(&["push"]);
        let before = malformed.get();

        let connector = Arc::new(MockConnector::accepting());
        let (tx, mut rx) = mpsc::channel(64);
        let transport = Arc::new(PushTransport::new(push_config(0, 100), connector.clone(), tx));

        let runner = transport.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        let mut peer = connector.next_peer().await.unwrap();

        peer.send_binary(vec![0xde, 0xad]).await.unwrap();
        peer.send_json(json!({"type": "alert", "data": {"level": "high"}}))
            .await
            .unwrap();

        let update = loop {
            match rx.recv().await.unwrap() {
                TransportEvent::Update(event) => break event,
                TransportEvent::Push(signal) => {
                    assert!(!matches!(signal, PushSignal::Reconnecting { .. }))
                }
            }
        };
        assert_eq!(update.kind, EventKind::Alert);
        assert!(malformed.get() >= before + 1.0);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(transport.state(), PushState::Connected);

        transport.close();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ping_and_timeout() {
        let connector = Arc::new(MockConnector::accepting());
        let (tx, mut rx) = mpsc::channel(64);
        let mut config = push_config(1, 100);
        config.heartbeat_interval = Duration::from_secs(30);
        config.heartbeat_timeout = Duration::from_secs(10);
        let transport = Arc::new(PushTransport::new(config, connector.clone(), tx));

        let runner = transport.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        let mut peer = connector.next_peer().await.unwrap();

        // First ping after one interval, answered
        assert_eq!(peer.recv_json().await.unwrap(), json!({"type": "ping"}));
        peer.send_json(json!({"type": "pong"})).await.unwrap();

        // Second ping goes unanswered: connection is dropped and retried
        assert_eq!(peer.recv_json().await.unwrap(), json!({"type": "ping"}));
        let mut second_peer = connector.next_peer().await.unwrap();
        assert_eq!(second_peer.recv_json().await.unwrap(), json!({"type": "ping"}));

        let signals = push_signals(&drain(&mut rx));
        assert!(signals.contains(&PushSignal::Reconnecting {
            attempt: 1,
            delay_ms: 100
        }));
        assert_eq!(connector.attempts(), 2);

        // Successful reconnect resets the counter
        assert_eq!(transport.retry_counter(), RetryCounter::new(100));

        transport.close();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_server_close() {
        let connector = Arc::new(
            MockConnector::always_failing()
                .with_script([MockOutcome::Accept, MockOutcome::Fail, MockOutcome::Accept]),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let transport = Arc::new(PushTransport::new(push_config(3, 200), connector.clone(), tx));

        let runner = transport.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        connector.next_peer().await.unwrap().close().await;
        let _second = connector.next_peer().await.unwrap();

        let _ = wait_for_signal(&mut rx, PushSignal::Connected).await;
        let signals = wait_for_signal(&mut rx, PushSignal::Connected).await;
        assert_eq!(
            signals,
            vec![
                PushSignal::Reconnecting {
                    attempt: 1,
                    delay_ms: 200
                },
                PushSignal::Reconnecting {
                    attempt: 2,
                    delay_ms: 400
                },
                PushSignal::Connected,
            ]
        );
        assert_eq!(transport.retry_counter().attempts, 0);

        transport.close();
        handle.await.unwrap();
    }
}
