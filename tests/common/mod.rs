#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for tether client integration tests.
//!
//! Provides a channel-driven [`MockTransport`], the [`MockRemote`] handle a
//! test uses to play the server side of it, and a [`MockConnector`] whose
//! connection attempts follow a scripted [`Plan`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tether_client::{CloseInfo, ConnectionEvent, Connector, LinkError, Transport, TransportKind};

// ── MockTransport ───────────────────────────────────────────────────

/// What the scripted server side does next.
#[derive(Debug)]
enum Script {
    Message(String),
    Error(String),
    Close(CloseInfo),
}

/// State shared between a [`MockTransport`] and its [`MockRemote`].
#[derive(Debug, Default)]
struct Shared {
    sent: StdMutex<Vec<String>>,
    closed_with: StdMutex<Option<CloseInfo>>,
}

/// A transport whose inbound side is driven by a [`MockRemote`].
///
/// Every payload the manager sends is recorded. The live counter is
/// decremented exactly once, when the transport closes by either side or is
/// dropped while still open.
pub struct MockTransport {
    script: mpsc::UnboundedReceiver<Script>,
    shared: Arc<Shared>,
    close_info: Option<CloseInfo>,
    live: Arc<AtomicUsize>,
}

impl MockTransport {
    fn finish(&mut self, info: CloseInfo) {
        if self.close_info.is_none() {
            self.close_info = Some(info);
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.finish(CloseInfo::abnormal("dropped"));
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), LinkError> {
        if self.close_info.is_some() {
            return Err(LinkError::TransportClosed);
        }
        self.shared.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, LinkError>> {
        if self.close_info.is_some() {
            return None;
        }
        match self.script.recv().await {
            Some(Script::Message(text)) => Some(Ok(text)),
            Some(Script::Error(detail)) => Some(Err(LinkError::TransportReceive(detail))),
            Some(Script::Close(info)) => {
                self.finish(info);
                None
            }
            // Remote handle dropped: stay open until closed locally.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self, info: CloseInfo) -> Result<(), LinkError> {
        *self.shared.closed_with.lock().unwrap() = Some(info.clone());
        self.finish(info);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.close_info.is_none()
    }

    fn close_info(&self) -> CloseInfo {
        self.close_info
            .clone()
            .unwrap_or_else(|| CloseInfo::abnormal(""))
    }
}

/// The server side of one accepted [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockRemote {
    script: mpsc::UnboundedSender<Script>,
    shared: Arc<Shared>,
    pub kind: TransportKind,
    pub target: String,
}

impl MockRemote {
    /// Deliver one inbound payload.
    pub fn message(&self, text: &str) {
        let _ = self.script.send(Script::Message(text.to_string()));
    }

    /// Make the next `recv` fail with a receive error.
    pub fn error(&self, detail: &str) {
        let _ = self.script.send(Script::Error(detail.to_string()));
    }

    /// Close the connection from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.script.send(Script::Close(CloseInfo::new(code, reason)));
    }

    /// Payloads the manager has sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.shared.sent.lock().unwrap().clone()
    }

    /// The close the manager requested, if any.
    pub fn closed_with(&self) -> Option<CloseInfo> {
        self.shared.closed_with.lock().unwrap().clone()
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// How the next connection attempt behaves.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Open a [`MockTransport`] and hand its [`MockRemote`] to the test.
    Accept,
    /// Fail with a connection-refused I/O error.
    Refuse(&'static str),
    /// Fail with a configuration error, as for an unusable target.
    Reject(&'static str),
    /// Never complete.
    Hang,
}

#[derive(Debug)]
struct ConnectorState {
    plans: StdMutex<VecDeque<Plan>>,
    opens: StdMutex<Vec<(TransportKind, String)>>,
    remotes: mpsc::UnboundedSender<MockRemote>,
    live: Arc<AtomicUsize>,
    max_live: AtomicUsize,
}

/// A [`Connector`] that follows queued [`Plan`]s, accepting when the queue is empty.
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl MockConnector {
    /// Create a connector plus the stream of remotes for accepted attempts.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(ConnectorState {
                plans: StdMutex::new(VecDeque::new()),
                opens: StdMutex::new(Vec::new()),
                remotes: tx,
                live: Arc::new(AtomicUsize::new(0)),
                max_live: AtomicUsize::new(0),
            }),
        };
        (connector, rx)
    }

    /// Queue plans for the next attempts.
    pub fn plan(&self, plans: impl IntoIterator<Item = Plan>) {
        self.state.plans.lock().unwrap().extend(plans);
    }

    /// Every attempt made so far, in order.
    pub fn opens(&self) -> Vec<(TransportKind, String)> {
        self.state.opens.lock().unwrap().clone()
    }

    /// Number of attempts made so far.
    pub fn open_count(&self) -> usize {
        self.state.opens.lock().unwrap().len()
    }

    /// Transports currently open.
    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open transports seen.
    pub fn max_live(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(
        &self,
        kind: TransportKind,
        target: &str,
    ) -> Result<Box<dyn Transport>, LinkError> {
        self.state
            .opens
            .lock()
            .unwrap()
            .push((kind, target.to_string()));
        let plan = self
            .state
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Plan::Accept);

        match plan {
            Plan::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                let shared = Arc::new(Shared::default());
                let now_live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
                self.state.max_live.fetch_max(now_live, Ordering::SeqCst);

                let _ = self.state.remotes.send(MockRemote {
                    script: tx,
                    shared: Arc::clone(&shared),
                    kind,
                    target: target.to_string(),
                });
                Ok(Box::new(MockTransport {
                    script: rx,
                    shared,
                    close_info: None,
                    live: Arc::clone(&self.state.live),
                }))
            }
            Plan::Refuse(reason) => Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                reason,
            ))),
            Plan::Reject(reason) => Err(LinkError::Configuration(reason.to_string())),
            Plan::Hang => std::future::pending().await,
        }
    }
}

// ── Event helpers ───────────────────────────────────────────────────

/// Wait for the next event. With a paused clock, timers fire while waiting.
pub async fn next_event(events: &mut mpsc::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(600), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Let spawned tasks run without letting any reconnect timer fire.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Collect every event that is already queued.
pub fn drain(events: &mut mpsc::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Wait for the next accepted remote.
pub async fn next_remote(remotes: &mut mpsc::UnboundedReceiver<MockRemote>) -> MockRemote {
    tokio::time::timeout(Duration::from_secs(600), remotes.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Initialise test logging once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
