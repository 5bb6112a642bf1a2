#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::collections::VecDeque;
use std::fmt::Debug;
use std::future::pending;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_stream::try_stream;
use backoff::backoff::Backoff;
use futures::Stream;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Sleep, sleep, timeout};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::error::WsError;
use super::state::{Effect, Event, StateMachine, Status};
use super::traits::{Handler, MessageParser};
use super::transport::{Connector, Transport, TransportEvent, TungsteniteConnector};
use crate::Result;
use crate::error::Error;

/// Broadcast channel capacity for incoming messages.
const BROADCAST_CAPACITY: usize = 1024;
/// Upper bound on closing a replaced or torn down transport in the background.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// One inbound payload as delivered to subscribers.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound<M> {
    /// The payload decoded into a structured message
    Decoded(M),
    /// The payload could not be decoded and is forwarded unmodified
    Raw(String),
    /// A binary payload that is not valid UTF-8, forwarded unmodified
    Binary(Vec<u8>),
}

impl<M> Inbound<M> {
    #[must_use]
    pub const fn as_decoded(&self) -> Option<&M> {
        match self {
            Self::Decoded(message) => Some(message),
            Self::Raw(_) | Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn into_decoded(self) -> Option<M> {
        match self {
            Self::Decoded(message) => Some(message),
            Self::Raw(_) | Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Self::Raw(text) => Some(text),
            Self::Decoded(_) | Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            Self::Decoded(_) | Self::Raw(_) => None,
        }
    }
}

#[derive(Debug)]
enum Command {
    Send(String),
    ForceReconnect,
}

/// Manages the lifecycle of a single WebSocket subscription.
///
/// The manager starts connecting as soon as it is created. A background task owns the transport
/// and the reconnect timer and runs every transition through a [`StateMachine`], so transitions
/// never interleave. The handle is cheap to clone; all clones control the same connection.
///
/// - Status: [`ConnectionManager::status`] and [`ConnectionManager::status_receiver`], or
///   [`Handler::on_status`] to see every transition.
/// - Messages: [`ConnectionManager::subscribe`] or [`ConnectionManager::messages`]. Late subscribers
///   only see messages that arrive after they subscribed.
/// - Commands: [`ConnectionManager::send`], [`ConnectionManager::force_reconnect`],
///   [`ConnectionManager::teardown`]. None of them block.
///
/// Dropping the last handle tears the connection down. A [`Handler`] that needs to call back into
/// the manager should hold a [`WeakConnectionManager`]; a strong clone inside the handler keeps the
/// connection alive until [`ConnectionManager::teardown`] is called explicitly.
///
/// # Example
///
/// ```ignore
/// let connection = ConnectionManager::new(
///     "wss://example.com/ws",
///     Config::default(),
///     SimpleParser,
/// )?;
///
/// let mut rx = connection.subscribe();
/// while let Ok(msg) = rx.recv().await {
///     println!("Received: {:?}", msg);
/// }
/// ```
pub struct ConnectionManager<M>
where
    M: Debug + Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<M>>,
}

impl<M> Clone for ConnectionManager<M>
where
    M: Debug + Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Handle that does not keep the connection alive, see [`ConnectionManager::downgrade`].
pub struct WeakConnectionManager<M> {
    shared: Weak<Shared<M>>,
}

impl<M> Clone for WeakConnectionManager<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<M> WeakConnectionManager<M>
where
    M: Debug + Clone + Send + Sync + 'static,
{
    /// The manager, unless every strong handle has been dropped.
    #[must_use]
    pub fn upgrade(&self) -> Option<ConnectionManager<M>> {
        self.shared
            .upgrade()
            .map(|shared| ConnectionManager { shared })
    }
}

struct Shared<M> {
    target: Url,
    /// Watch channel sender for state changes
    state_tx: watch::Sender<Status>,
    /// Sender channel for commands processed by the driver task
    command_tx: mpsc::UnboundedSender<Command>,
    /// Broadcast sender for incoming messages
    broadcast_tx: broadcast::Sender<Inbound<M>>,
    /// Mirror of the driver's attempt counter
    attempts: Arc<AtomicU32>,
    cancel: CancellationToken,
}

impl<M> Drop for Shared<M> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<M> ConnectionManager<M>
where
    M: Debug + Clone + Send + Sync + 'static,
{
    /// Create a WebSocket connection manager and start connecting to `endpoint`.
    ///
    /// The `parser` is used to deserialize incoming WebSocket messages.
    pub fn new<P>(endpoint: &str, config: Config, parser: P) -> Result<Self>
    where
        P: MessageParser<M>,
    {
        let target = Url::parse(endpoint)?;
        Self::with_connector(target, config, parser, TungsteniteConnector, ())
    }

    /// Create a connection manager over an arbitrary [`Connector`], with lifecycle callbacks.
    ///
    /// Must be called from within a Tokio runtime; the driver runs as a task on it.
    pub fn with_connector<P, C, H>(
        target: Url,
        config: Config,
        parser: P,
        connector: C,
        handler: H,
    ) -> Result<Self>
    where
        P: MessageParser<M>,
        C: Connector,
        H: Handler,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::validation(format!("connection manager requires a Tokio runtime: {e}"))
        })?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, _) = watch::channel(Status::Disconnected);
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let driver = Driver {
            target: target.clone(),
            connect_timeout: config.connect_timeout,
            machine: StateMachine::new(&config.reconnect),
            backoff: config.reconnect.strategy.into_backoff(),
            parser,
            connector: Arc::new(connector),
            handler,
            transport: None,
            connecting: None,
            timer: None,
            last_error: None,
            backlog: VecDeque::new(),
            state_tx: state_tx.clone(),
            broadcast_tx: broadcast_tx.clone(),
            command_rx,
            attempts: Arc::clone(&attempts),
            cancel: cancel.clone(),
        };

        runtime.spawn(driver.run());

        Ok(Self {
            shared: Arc::new(Shared {
                target,
                state_tx,
                command_tx,
                broadcast_tx,
                attempts,
                cancel,
            }),
        })
    }

    /// Handle for callbacks and other long-lived holders that must not keep the connection alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakConnectionManager<M> {
        WeakConnectionManager {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// The endpoint this manager connects to.
    #[must_use]
    pub fn target(&self) -> &Url {
        &self.shared.target
    }

    /// Send a JSON serialized request to the server.
    ///
    /// **The request is silently dropped unless the status is [`Status::Connected`].** No error is
    /// returned in that case; check [`ConnectionManager::status`] first if a drop is unacceptable.
    /// The only error is a serialization failure.
    pub fn send<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.send_text(json);
        Ok(())
    }

    /// Send a text payload as is. Silently dropped unless connected, like [`ConnectionManager::send`].
    pub fn send_text<S: Into<String>>(&self, text: S) {
        if !self.status().is_connected() {
            #[cfg(feature = "tracing")]
            tracing::debug!(url = %self.shared.target, "Dropping send while not connected");
            return;
        }

        // Only fails once the driver has stopped, which is the same silent drop.
        _ = self.shared.command_tx.send(Command::Send(text.into()));
    }

    /// Drop any pending timer and transport, reset the attempt counter and connect again.
    ///
    /// Available in every status, including [`Status::Failed`].
    pub fn force_reconnect(&self) {
        _ = self.shared.command_tx.send(Command::ForceReconnect);
    }

    /// Stop the connection for good.
    ///
    /// Idempotent and safe to call from any state, including from inside a [`Handler`] callback.
    /// Once this returns, no further status change is published and no further message is
    /// broadcast. The final status is [`Status::Disconnected`].
    pub fn teardown(&self) {
        self.shared.cancel.cancel();
        self.shared.state_tx.send_if_modified(|status| {
            *status = Status::Disconnected;
            false
        });
    }

    /// Check whether [`ConnectionManager::teardown`] has been called.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Get the current connection status.
    #[must_use]
    pub fn status(&self) -> Status {
        *self.shared.state_tx.borrow()
    }

    /// Consecutive reconnect attempts since creation or the last successful open.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.shared.attempts.load(Ordering::Acquire)
    }

    /// Subscribe to connection status changes.
    ///
    /// The receiver holds the latest value; quick successive transitions may be coalesced.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<Status> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to incoming messages.
    ///
    /// Each call returns a new independent receiver. Multiple subscribers can
    /// receive messages concurrently without blocking each other.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Inbound<M>> {
        self.shared.broadcast_tx.subscribe()
    }

    /// Stream of incoming messages that ends on teardown.
    ///
    /// Yields [`WsError::Lagged`] if this consumer fell behind by more than the channel capacity.
    pub fn messages(&self) -> impl Stream<Item = Result<Inbound<M>>> + use<M> {
        let mut rx = self.subscribe();
        let cancel = self.shared.cancel.clone();

        try_stream! {
            loop {
                let received = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    received = rx.recv() => received,
                };

                match received {
                    Ok(message) => yield message,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Message stream lagged, missed {n} messages");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

/// What woke the driver up.
enum Step<T> {
    Teardown,
    Command(Command),
    Opened(Result<T>),
    Transport(TransportEvent),
    TimerFired,
}

/// Background task that owns the state machine, the transport and the reconnect timer.
struct Driver<M, P, C: Connector, H> {
    target: Url,
    connect_timeout: Option<Duration>,
    machine: StateMachine,
    backoff: Box<dyn Backoff + Send>,
    parser: P,
    connector: Arc<C>,
    handler: H,
    /// Live transport once open
    transport: Option<C::Transport>,
    /// In-flight connect attempt
    connecting: Option<BoxFuture<'static, Result<C::Transport>>>,
    /// The single reconnect timer
    timer: Option<Pin<Box<Sleep>>>,
    /// Error to hand to the next `on_error`
    last_error: Option<Error>,
    /// Commands received while a write was in flight
    backlog: VecDeque<Command>,
    state_tx: watch::Sender<Status>,
    broadcast_tx: broadcast::Sender<Inbound<M>>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    attempts: Arc<AtomicU32>,
    cancel: CancellationToken,
}

impl<M, P, C, H> Driver<M, P, C, H>
where
    M: Debug + Clone + Send + Sync + 'static,
    P: MessageParser<M>,
    C: Connector,
    H: Handler,
{
    async fn run(mut self) {
        let effects = self.machine.start();
        self.apply(effects);

        loop {
            let step = if self.cancel.is_cancelled() {
                Step::Teardown
            } else if let Some(command) = self.backlog.pop_front() {
                Step::Command(command)
            } else {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => Step::Teardown,
                    Some(command) = self.command_rx.recv() => Step::Command(command),
                    event = next_event(&mut self.transport) => Step::Transport(event),
                    result = pending_connect(&mut self.connecting) => Step::Opened(result),
                    () = expired(&mut self.timer) => Step::TimerFired,
                }
            };

            match step {
                Step::Teardown => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(url = %self.target, "Tearing down connection");
                    self.dispatch(Event::Teardown);
                    break;
                }
                Step::Command(Command::Send(text)) => self.send(text).await,
                Step::Command(Command::ForceReconnect) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(url = %self.target, "Forcing reconnect");
                    self.backoff.reset();
                    self.dispatch(Event::ForceReconnect);
                }
                Step::Opened(Ok(transport)) => {
                    self.connecting = None;
                    self.transport = Some(transport);
                    #[cfg(feature = "tracing")]
                    tracing::info!(url = %self.target, "WebSocket connected");
                    self.backoff.reset();
                    self.dispatch(Event::OpenSucceeded);
                }
                Step::Opened(Err(e)) => {
                    self.connecting = None;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(url = %self.target, error = %e, "Unable to connect");
                    self.last_error = Some(e);
                    self.dispatch(Event::OpenFailed);
                }
                Step::Transport(TransportEvent::Text(text)) => self.deliver(text),
                Step::Transport(TransportEvent::Binary(bytes)) => self.deliver_binary(bytes),
                Step::Transport(TransportEvent::Error(e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(url = %self.target, error = %e, "WebSocket error");
                    self.last_error = Some(e);
                    self.dispatch(Event::TransportError);
                }
                Step::Transport(TransportEvent::Closed) => {
                    self.transport = None;
                    #[cfg(feature = "tracing")]
                    tracing::info!(url = %self.target, "WebSocket closed");
                    self.dispatch(Event::TransportClosed);
                }
                Step::TimerFired => {
                    self.timer = None;
                    self.dispatch(Event::TimerFired);
                }
            }
        }

        // Publish the final value without notifying anyone.
        self.state_tx.send_if_modified(|status| {
            *status = Status::Disconnected;
            false
        });
    }

    fn dispatch(&mut self, event: Event) {
        let effects = self.machine.handle(event);
        self.attempts.store(self.machine.attempt(), Ordering::Release);
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                // Teardown from inside a callback leaves the remaining effects of the transition.
                Effect::Open | Effect::ArmTimer { .. } if self.cancel.is_cancelled() => {}
                Effect::Open => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        url = %self.target,
                        attempt = self.machine.attempt(),
                        "Connecting"
                    );
                    self.connecting = Some(self.open());
                }
                Effect::CloseTransport => {
                    // Dropping an in-flight connect aborts the handshake.
                    self.connecting = None;
                    if let Some(mut transport) = self.transport.take() {
                        tokio::spawn(async move {
                            _ = timeout(CLOSE_TIMEOUT, transport.close()).await;
                        });
                    }
                }
                Effect::ArmTimer { attempt } => {
                    let delay = self.backoff.next_backoff().unwrap_or_default();
                    #[cfg(feature = "tracing")]
                    tracing::debug!(url = %self.target, attempt, ?delay, "Scheduling reconnect");
                    #[cfg(not(feature = "tracing"))]
                    let _ = attempt;
                    self.timer = Some(Box::pin(sleep(delay)));
                }
                Effect::CancelTimer => self.timer = None,
                Effect::EmitStatus(status) => self.emit_status(status),
                Effect::NotifyOpen => {
                    if !self.cancel.is_cancelled() {
                        self.handler.on_open();
                    }
                }
                Effect::NotifyClose => {
                    if !self.cancel.is_cancelled() {
                        self.handler.on_close();
                    }
                }
                Effect::NotifyError => {
                    if let Some(error) = self.last_error.take()
                        && !self.cancel.is_cancelled()
                    {
                        self.handler.on_error(&error);
                    }
                }
            }
        }
    }

    fn open(&self) -> BoxFuture<'static, Result<C::Transport>> {
        let connector = Arc::clone(&self.connector);
        let target = self.target.clone();
        let connect_timeout = self.connect_timeout;

        Box::pin(async move {
            match connect_timeout {
                Some(limit) => timeout(limit, connector.connect(&target))
                    .await
                    .map_err(|_elapsed| Error::from(WsError::Timeout(limit)))?,
                None => connector.connect(&target).await,
            }
        })
    }

    fn emit_status(&self, status: Status) {
        let cancel = &self.cancel;
        let published = self.state_tx.send_if_modified(|current| {
            if cancel.is_cancelled() {
                return false;
            }
            *current = status;
            true
        });

        if !published {
            return;
        }

        #[cfg(feature = "tracing")]
        if status == Status::Failed {
            tracing::warn!(
                url = %self.target,
                attempts = self.machine.attempt(),
                "Connection failed"
            );
        } else {
            tracing::debug!(url = %self.target, %status, "Connection status changed");
        }

        self.handler.on_status(status);
    }

    async fn send(&mut self, text: String) {
        if !self.machine.status().is_connected() {
            #[cfg(feature = "tracing")]
            tracing::debug!(url = %self.target, "Dropping send while not connected");
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        // A peer that stops reading stalls the write; teardown and force reconnect must still get
        // through.
        let mut write = transport.send(text);
        let result = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                Some(command) = self.command_rx.recv() => match command {
                    Command::Send(text) => self.backlog.push_back(Command::Send(text)),
                    Command::ForceReconnect => {
                        // Queued writes were meant for the transport being replaced.
                        self.backlog.clear();
                        self.backlog.push_back(Command::ForceReconnect);
                        return;
                    }
                },
                result = &mut write => break result,
            }
        };
        drop(write);

        if let Err(e) = result {
            #[cfg(feature = "tracing")]
            tracing::warn!(url = %self.target, error = %e, "Failed to send, closing connection");
            self.last_error = Some(e);
            self.dispatch(Event::TransportError);
            self.transport = None;
            self.dispatch(Event::TransportClosed);
        }
    }

    fn deliver_binary(&self, bytes: Vec<u8>) {
        match String::from_utf8(bytes) {
            Ok(text) => self.deliver(text),
            Err(e) => {
                if self.cancel.is_cancelled() {
                    return;
                }
                #[cfg(feature = "tracing")]
                tracing::debug!(len = e.as_bytes().len(), "Forwarding non UTF-8 binary message");
                _ = self.broadcast_tx.send(Inbound::Binary(e.into_bytes()));
            }
        }
    }

    fn deliver(&self, text: String) {
        if self.cancel.is_cancelled() {
            return;
        }

        match self.parser.parse(&text) {
            Ok(messages) if !messages.is_empty() => {
                for message in messages {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(?message, "Parsed WebSocket message");
                    _ = self.broadcast_tx.send(Inbound::Decoded(message));
                }
            }
            result => {
                #[cfg(feature = "tracing")]
                if let Err(e) = &result {
                    tracing::debug!(%text, error = %e, "Forwarding undecodable WebSocket message");
                }
                #[cfg(not(feature = "tracing"))]
                let _ = &result;
                _ = self.broadcast_tx.send(Inbound::Raw(text));
            }
        }
    }
}

async fn next_event<T: Transport>(transport: &mut Option<T>) -> TransportEvent {
    match transport {
        Some(transport) => transport.next_event().await,
        None => pending().await,
    }
}

async fn pending_connect<T>(connecting: &mut Option<BoxFuture<'static, Result<T>>>) -> Result<T> {
    match connecting {
        Some(connect) => connect.await,
        None => pending().await,
    }
}

async fn expired(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(delay) => delay.as_mut().await,
        None => pending().await,
    }
}
