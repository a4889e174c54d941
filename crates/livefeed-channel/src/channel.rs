//! Live data channel orchestrator.
//!
//! Owns at most one live transport. Transport tasks report through a single
//! mpsc channel; the event loop maps push signals to `ConnectionState`
//! transitions, swaps to polling when push gives up, and fans updates out to
//! subscribers.

use crate::error::{ChannelError, ChannelResult};
use crate::selector::{is_push_url, select_initial};
use crate::subscribers::{SubscriberRegistry, Unsubscribe};
use crate::throttle::Throttle;
use livefeed_core::{
    latest_cache, ChannelConfig, ConnectionState, EventKind, EventSource, LatestCache, PushSignal,
    TransportEvent, UpdateEvent,
};
use livefeed_poll::{HttpFetcher, PollFetcher, PollingTransport};
use livefeed_telemetry::Metrics;
use livefeed_ws::{probe, PushConfig, PushConnector, PushTransport, TungsteniteConnector};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Transport event queue depth.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// State broadcast depth.
const STATE_CHANNEL_CAPACITY: usize = 64;

/// State, cache and subscribers. Shared by every run of a channel.
struct Shared {
    state: RwLock<ConnectionState>,
    state_tx: broadcast::Sender<ConnectionState>,
    subscribers: Arc<SubscriberRegistry>,
    latest: RwLock<LatestCache>,
}

impl Shared {
    fn new(config: &ChannelConfig) -> Self {
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(ConnectionState::Idle),
            state_tx,
            subscribers: Arc::new(SubscriberRegistry::new()),
            latest: RwLock::new(latest_cache(config)),
        }
    }

    /// Apply a transition and broadcast it. Repeated `Reconnecting` is
    /// broadcast every time; other repeats are ignored.
    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.state.write();
            if *state == next && next != ConnectionState::Reconnecting {
                return;
            }
            debug!(from = %*state, to = %next, "Connection state changed");
            *state = next;
        }
        Metrics::connection_state(next);
        let _ = self.state_tx.send(next);
    }

    fn deliver(&self, event: UpdateEvent) {
        if self.subscribers.is_closed() {
            return;
        }
        self.latest.read().insert(event.kind, event.clone());
        Metrics::event_delivered(event.kind.as_str(), source_label(&event));
        self.subscribers.dispatch(&event);
    }
}

fn source_label(event: &UpdateEvent) -> &'static str {
    match event.source {
        EventSource::Push => "push",
        EventSource::Poll => "poll",
    }
}

/// A running push transport and its task.
struct ActivePush<C: PushConnector> {
    transport: Arc<PushTransport<C>>,
    task: JoinHandle<()>,
}

impl<C: PushConnector> ActivePush<C> {
    fn shutdown(self) {
        self.transport.close();
        self.task.abort();
    }
}

/// Everything belonging to one `start` .. `close` run.
struct Session<C: PushConnector, F: PollFetcher> {
    config: ChannelConfig,
    /// Push settings, when the endpoint is usable at all.
    push_config: Option<PushConfig>,
    connector: Arc<C>,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<TransportEvent>,
    token: CancellationToken,
    push: Mutex<Option<ActivePush<C>>>,
    /// Built up front so endpoint errors surface from `start`.
    polling: Option<PollingTransport<F>>,
    probe: Mutex<Option<JoinHandle<()>>>,
}

impl<C: PushConnector, F: PollFetcher> Session<C, F> {
    fn start_push(&self) {
        let Some(push_config) = self.push_config.clone() else {
            return;
        };
        let transport = Arc::new(PushTransport::new(
            push_config,
            self.connector.clone(),
            self.events_tx.clone(),
        ));
        self.shared.set_state(ConnectionState::Connecting);
        let runner = transport.clone();
        let task = tokio::spawn(async move { runner.run().await });

        if let Some(previous) = self.push.lock().replace(ActivePush { transport, task }) {
            previous.shutdown();
        }
    }

    fn stop_push(&self) {
        if let Some(active) = self.push.lock().take() {
            active.shutdown();
        }
    }

    /// Start polling, or enter `Failed` when there is nothing to poll.
    fn start_polling(&self) {
        match &self.polling {
            Some(polling) => {
                polling.start();
                self.shared.set_state(ConnectionState::Polling);
                self.start_probe();
            }
            None => {
                error!("No poll endpoints configured, channel failed");
                self.shared.set_state(ConnectionState::Failed);
            }
        }
    }

    fn start_probe(&self) {
        let (Some(interval), Some(push_config)) =
            (self.config.push_probe_interval(), self.push_config.as_ref())
        else {
            return;
        };
        if !self.connector.is_supported() {
            return;
        }

        let task = tokio::spawn(probe_loop(
            self.connector.clone(),
            push_config.url.clone(),
            interval,
            self.events_tx.clone(),
            self.token.child_token(),
        ));
        if let Some(previous) = self.probe.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop_probe(&self) {
        if let Some(task) = self.probe.lock().take() {
            task.abort();
        }
    }

    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Update(update) => self.shared.deliver(update),
            TransportEvent::Push(signal) => self.handle_push_signal(signal),
        }
    }

    fn handle_push_signal(&self, signal: PushSignal) {
        match signal {
            PushSignal::Connecting => self.shared.set_state(ConnectionState::Connecting),
            PushSignal::Connected => self.shared.set_state(ConnectionState::Connected),
            PushSignal::Identified { client_id } => {
                debug!(%client_id, "Push client identified");
            }
            PushSignal::Reconnecting { attempt, delay_ms } => {
                debug!(attempt, delay_ms, "Push transport reconnecting");
                self.shared.set_state(ConnectionState::Reconnecting);
            }
            PushSignal::Failed { attempts } => {
                warn!(attempts, "Push transport failed, falling back to polling");
                self.stop_push();
                Metrics::fallback_to_polling();
                self.start_polling();
            }
            PushSignal::Recovered => {
                if *self.shared.state.read() != ConnectionState::Polling {
                    return;
                }
                info!("Push endpoint reachable again, leaving polling");
                self.stop_probe();
                if let Some(polling) = &self.polling {
                    polling.stop();
                }
                self.start_push();
            }
        }
    }

    fn shutdown(&self) {
        self.token.cancel();
        self.stop_probe();
        self.stop_push();
        if let Some(polling) = &self.polling {
            polling.stop();
        }
    }
}

async fn run_event_loop<C: PushConnector, F: PollFetcher>(
    session: Arc<Session<C, F>>,
    mut events_rx: mpsc::Receiver<TransportEvent>,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = session.token.cancelled() => break,
            event = events_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        session.handle_event(event);
    }
    debug!("Channel event loop exited");
}

async fn probe_loop<C: PushConnector>(
    connector: Arc<C>,
    url: String,
    interval: Duration,
    events_tx: mpsc::Sender<TransportEvent>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let reachable = tokio::select! {
            biased;
            () = token.cancelled() => return,
            reachable = probe(connector.as_ref(), &url) => reachable,
        };
        if reachable {
            let _ = events_tx
                .send(TransportEvent::Push(PushSignal::Recovered))
                .await;
            return;
        }
    }
}

struct Running<C: PushConnector, F: PollFetcher> {
    session: Arc<Session<C, F>>,
    event_loop: JoinHandle<()>,
}

/// Live data channel.
///
/// Construct once and share as `Arc<LiveDataChannel<..>>`. `start` and
/// `close` must be called from within a Tokio runtime.
pub struct LiveDataChannel<C: PushConnector = TungsteniteConnector, F: PollFetcher = HttpFetcher> {
    connector: Arc<C>,
    fetcher: Arc<F>,
    shared: Arc<Shared>,
    running: Mutex<Option<Running<C, F>>>,
}

impl LiveDataChannel<TungsteniteConnector, HttpFetcher> {
    /// Channel over real WebSocket and HTTP transports.
    pub fn new() -> ChannelResult<Self> {
        livefeed_ws::init_crypto();
        Ok(Self::with_transports(
            Arc::new(TungsteniteConnector::new()),
            Arc::new(HttpFetcher::new()?),
        ))
    }
}

impl<C: PushConnector, F: PollFetcher> LiveDataChannel<C, F> {
    /// Channel over the given connector and fetcher.
    pub fn with_transports(connector: Arc<C>, fetcher: Arc<F>) -> Self {
        Self {
            connector,
            fetcher,
            shared: Arc::new(Shared::new(&ChannelConfig::default())),
            running: Mutex::new(None),
        }
    }

    /// Validate `config` and start the selected transport.
    ///
    /// # Errors
    /// - `ChannelError::AlreadyStarted` if the channel is running
    /// - `ChannelError::Config` if `config` fails validation
    /// - `ChannelError::Poll` if a poll endpoint does not resolve to a URL
    ///
    /// Transport failures are never returned; watch [`state`](Self::state).
    pub fn start(&self, config: ChannelConfig) -> ChannelResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(ChannelError::AlreadyStarted);
        }
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let polling = if config.poll_endpoints.is_empty() {
            None
        } else {
            Some(PollingTransport::from_config(
                &config,
                self.fetcher.clone(),
                events_tx.clone(),
            )?)
        };

        self.shared.subscribers.reopen();
        *self.shared.latest.write() = latest_cache(&config);

        let choice = select_initial(&config, self.connector.is_supported());
        let push_config = PushConfig::from_channel(&config)
            .filter(|push| is_push_url(&push.url) && self.connector.is_supported());

        info!(
            use_push = choice.use_push,
            poll_endpoints = config.poll_endpoints.len(),
            "Starting live data channel"
        );

        let session = Arc::new(Session {
            config,
            push_config,
            connector: self.connector.clone(),
            shared: self.shared.clone(),
            events_tx,
            token: CancellationToken::new(),
            push: Mutex::new(None),
            polling,
            probe: Mutex::new(None),
        });

        if choice.use_push {
            session.start_push();
        } else {
            session.start_polling();
        }

        let event_loop = tokio::spawn(run_event_loop(session.clone(), events_rx));
        *running = Some(Running {
            session,
            event_loop,
        });
        Ok(())
    }

    /// Register a handler for every update. Handlers run in registration order.
    pub fn subscribe<H>(&self, handler: H) -> Unsubscribe
    where
        H: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        let id = self.shared.subscribers.add(Arc::new(handler));
        Unsubscribe::new(&self.shared.subscribers, id)
    }

    /// Like [`subscribe`](Self::subscribe), but at most one event per kind
    /// per `min_interval` reaches the handler.
    pub fn subscribe_throttled<H>(&self, handler: H, min_interval: Duration) -> Unsubscribe
    where
        H: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        let throttle = Throttle::new(min_interval);
        self.subscribe(move |event: &UpdateEvent| {
            if throttle.allow(event.kind) {
                handler(event);
            }
        })
    }

    /// Most recent unexpired event of `kind`.
    pub fn latest(&self, kind: EventKind) -> Option<UpdateEvent> {
        self.shared.latest.read().get(&kind)
    }

    /// Send a text frame over the push transport.
    ///
    /// Returns false (and logs) when push is not connected.
    pub fn send(&self, message: impl Into<String>) -> bool {
        let running = self.running.lock();
        let push = running
            .as_ref()
            .and_then(|r| r.session.push.lock().as_ref().map(|p| p.transport.clone()));
        match push {
            Some(transport) => transport.send(message),
            None => {
                warn!(state = %self.state(), "No push transport, dropping message");
                false
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Every state transition from now on, in order.
    pub fn state_changes(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Client id assigned by the push server, while connected.
    pub fn client_id(&self) -> Option<String> {
        let running = self.running.lock();
        let session = &running.as_ref()?.session;
        let push = session.push.lock();
        push.as_ref()?.transport.client_id()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Stop everything and drop all subscribers. Idempotent.
    ///
    /// No handler is invoked after this returns, except one that was already
    /// executing on another thread.
    pub fn close(&self) {
        self.shared.subscribers.close();

        if let Some(running) = self.running.lock().take() {
            running.session.shutdown();
            running.event_loop.abort();
            info!("Live data channel closed");
        }

        self.shared.latest.read().invalidate_all();
        self.shared.set_state(ConnectionState::Idle);
    }
}

impl<C: PushConnector, F: PollFetcher> Drop for LiveDataChannel<C, F> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.session.shutdown();
            running.event_loop.abort();
        }
    }
}
