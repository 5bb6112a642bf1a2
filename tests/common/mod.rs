#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper in this module"
)]

use std::collections::VecDeque;
use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ticker_stream_client::Result;
use ticker_stream_client::error::Error;
use ticker_stream_client::types::Url;
use ticker_stream_client::ws::{Connector, Handler, Status, Transport, TransportEvent, WsError};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};

pub const TICKER: &str = r#"{"s":"BTCUSDT","c":"50000.00","p":"100","P":"0.2"}"#;

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Fail,
    /// Never completes
    Hang,
}

struct Plan {
    queued: VecDeque<Outcome>,
    fallback: Outcome,
    attempts: Vec<Instant>,
}

/// In-memory connector. Every accepted connection hands a [`Remote`] to the test.
#[derive(Clone)]
pub struct FakeConnector {
    plan: Arc<Mutex<Plan>>,
    remotes_tx: mpsc::UnboundedSender<Remote>,
}

impl FakeConnector {
    pub fn new(fallback: Outcome) -> (Self, mpsc::UnboundedReceiver<Remote>) {
        let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
        let connector = Self {
            plan: Arc::new(Mutex::new(Plan {
                queued: VecDeque::new(),
                fallback,
                attempts: Vec::new(),
            })),
            remotes_tx,
        };
        (connector, remotes_rx)
    }

    /// Queue outcomes used before falling back.
    pub fn then(&self, outcome: Outcome) -> &Self {
        self.plan.lock().unwrap().queued.push_back(outcome);
        self
    }

    pub fn set_fallback(&self, outcome: Outcome) {
        self.plan.lock().unwrap().fallback = outcome;
    }

    pub fn connect_count(&self) -> usize {
        self.plan.lock().unwrap().attempts.len()
    }

    /// Time elapsed between consecutive connect attempts.
    pub fn gaps(&self) -> Vec<Duration> {
        let plan = self.plan.lock().unwrap();
        plan.attempts
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&self, _target: &Url) -> Result<Self::Transport> {
        let outcome = {
            let mut plan = self.plan.lock().unwrap();
            plan.attempts.push(Instant::now());
            plan.queued.pop_front().unwrap_or(plan.fallback)
        };

        match outcome {
            Outcome::Accept => {
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                let (sent_tx, sent_rx) = mpsc::unbounded_channel();
                let closed = Arc::new(AtomicBool::new(false));
                let stalled = Arc::new(AtomicBool::new(false));

                _ = self.remotes_tx.send(Remote {
                    events_tx,
                    sent_rx,
                    closed: Arc::clone(&closed),
                    stalled: Arc::clone(&stalled),
                });

                Ok(FakeTransport {
                    events_rx,
                    sent_tx,
                    closed,
                    stalled,
                })
            }
            Outcome::Fail => Err(WsError::Transport("connection refused".to_owned()).into()),
            Outcome::Hang => pending().await,
        }
    }
}

pub struct FakeTransport {
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    sent_tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
    /// Writes never complete, like a peer that stopped reading
    stalled: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            return pending().await;
        }
        self.sent_tx
            .send(text)
            .map_err(|_e| Error::from(WsError::ConnectionClosed))
    }

    async fn next_event(&mut self) -> TransportEvent {
        self.events_rx.recv().await.unwrap_or(TransportEvent::Closed)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Test side of an accepted fake connection.
pub struct Remote {
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    sent_rx: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl Remote {
    pub fn push(&self, text: &str) {
        _ = self.events_tx.send(TransportEvent::Text(text.to_owned()));
    }

    pub fn push_binary(&self, bytes: &[u8]) {
        _ = self.events_tx.send(TransportEvent::Binary(bytes.to_vec()));
    }

    /// Stop reading, so every later write from the client hangs.
    pub fn stall_writes(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn error(&self, reason: &str) {
        _ = self.events_tx.send(TransportEvent::Error(
            WsError::Transport(reason.to_owned()).into(),
        ));
    }

    pub fn close(&self) {
        _ = self.events_tx.send(TransportEvent::Closed);
    }

    /// Whether the client closed this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn recv_sent(&mut self) -> Option<String> {
        timeout(Duration::from_secs(1), self.sent_rx.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_recv_sent(&mut self) -> Option<String> {
        self.sent_rx.try_recv().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Open,
    Close,
    Error(String),
    Status(Status),
}

/// Handler that records every callback in order.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Status(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Recorded) -> usize {
        self.events().iter().filter(|event| *event == wanted).count()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
    }
}

impl Handler for Recorder {
    fn on_open(&self) {
        self.push(Recorded::Open);
    }

    fn on_close(&self) {
        self.push(Recorded::Close);
    }

    fn on_error(&self, error: &Error) {
        self.push(Recorded::Error(error.to_string()));
    }

    fn on_status(&self, status: Status) {
        self.push(Recorded::Status(status));
    }
}

pub fn target() -> Url {
    Url::parse("wss://stream.example.com/ws/btcusdt@ticker").unwrap()
}

/// Let every ready task run without reaching the next reconnect timer.
pub async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

pub async fn next_remote(remotes: &mut mpsc::UnboundedReceiver<Remote>) -> Remote {
    timeout(Duration::from_secs(60), remotes.recv())
        .await
        .expect("no connection was accepted in time")
        .expect("connector dropped")
}
