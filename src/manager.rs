//! Connection lifecycle manager.
//!
//! [`ConnectionManager`] owns at most one live transport, drives it from a
//! spawned session task, and reconnects after unintended closes using the
//! [`ReconnectPolicy`]. Everything it observes is reported through a
//! [`ConnectionObserver`]; none of its lifecycle methods fail.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() {
//! use tether_client::{ConnectionEvent, ConnectionManager, ManagerConfig, Settings};
//!
//! let settings = Settings::new("wss://example.org/feed");
//! let (manager, mut events) = ConnectionManager::with_event_channel(settings, ManagerConfig::default());
//!
//! manager.connect();
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ConnectionEvent::Opened => {
//!             let _ = manager.send("subscribe:prices");
//!         }
//!         ConnectionEvent::MessageReceived { text } => println!("{text}"),
//!         _ => {}
//!     }
//! }
//! # }
//! ```
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──connect()──▶ Connecting ──opened──▶ Open
//!     ▲                    │                    │
//!     │                    └──────closed────────┤
//!  disconnect()                                 ▼
//!     └──────────────────────────────────────  Closed ──timer──▶ Connecting
//! ```
//!
//! A `connect()` while a session is `Connecting` or `Open` supersedes it: the
//! old session is told to close with normal closure, and the new session does
//! not open its transport until the old one has finished closing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::LinkError;
use crate::event::{ChannelObserver, ConnectionEvent, ConnectionObserver};
use crate::reconnect::{PendingReconnect, ReconnectPolicy, ReconnectState};
use crate::selector::{classify, TransportKind};
use crate::settings::SettingsSource;
use crate::transport::{CloseInfo, Connector, Transport};

#[cfg(feature = "transport-websocket")]
use crate::transports::NativeConnector;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default bound on a single connection attempt.
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a graceful close handshake.
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Tuning for a [`ConnectionManager`].
///
/// User-facing settings (target, auto-reconnect, base delay) live in
/// [`Settings`](crate::Settings); this holds the knobs the embedding
/// application fixes at construction time.
///
/// ```
/// use std::time::Duration;
/// use tether_client::ManagerConfig;
///
/// let config = ManagerConfig::default()
///     .with_open_timeout(Duration::from_secs(5))
///     .with_event_channel_capacity(0);
/// assert_eq!(config.event_channel_capacity, 1);
/// ```
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long one connection attempt may take before it counts as failed.
    ///
    /// Defaults to **10 seconds**.
    pub open_timeout: Duration,
    /// How long a graceful close may take before the transport is dropped.
    ///
    /// Defaults to **1 second**.
    pub close_timeout: Duration,
    /// Capacity of the channel created by
    /// [`ConnectionManager::with_event_channel`]. Values below 1 are clamped to 1.
    ///
    /// Defaults to **256**.
    pub event_channel_capacity: usize,
    /// Jitter and backoff parameters for automatic reconnects.
    pub reconnect_policy: ReconnectPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Set the per-attempt open timeout.
    #[must_use]
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the graceful close timeout.
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the event channel capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// Never connected, or explicitly disconnected.
    Idle,
    /// A transport is being opened.
    Connecting,
    /// A transport is open.
    Open,
    /// The last transport closed on its own. A reconnect may be pending.
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}

/// The manager's handle on a running session task.
struct Session {
    id: u64,
    kind: TransportKind,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: oneshot::Sender<CloseInfo>,
    task: JoinHandle<()>,
}

/// Everything guarded by the manager lock.
struct Core {
    state: LinkState,
    reconnect: ReconnectState,
    session: Option<Session>,
    /// Task of the most recently retired session, awaited by the next one.
    retiring: Option<JoinHandle<()>>,
    next_token: u64,
}

impl Core {
    fn is_current(&self, id: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id)
    }

    fn next_token(&mut self) -> u64 {
        self.next_token = self.next_token.wrapping_add(1);
        self.next_token
    }

    /// Detach the current session and ask it to close with `info`.
    fn retire_session(&mut self, info: CloseInfo) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        debug!(session = session.id, code = info.code, "retiring session");
        if session.shutdown.send(info).is_err() {
            debug!(session = session.id, "session already finished");
        }
        self.retiring = Some(session.task);
        true
    }
}

struct Inner {
    settings: Arc<dyn SettingsSource>,
    observer: Arc<dyn ConnectionObserver>,
    connector: Arc<dyn Connector>,
    config: ManagerConfig,
    core: Mutex<Core>,
}

// ── Manager handle ──────────────────────────────────────────────────

/// Owns one logical connection and keeps it alive.
///
/// All methods are synchronous and return immediately. [`connect`](Self::connect)
/// and automatic reconnects spawn work on the current Tokio runtime, so they
/// must be called from within one.
///
/// Dropping the manager cancels any pending reconnect and closes the live
/// transport in the background.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager that opens real WebSocket / Socket.IO transports.
    #[cfg(feature = "transport-websocket")]
    pub fn new(settings: impl SettingsSource, observer: impl ConnectionObserver) -> Self {
        Self::with_parts(settings, observer, NativeConnector, ManagerConfig::default())
    }

    /// Create a manager with real transports whose events arrive on a channel.
    #[cfg(feature = "transport-websocket")]
    #[must_use = "the event receiver must be used to receive events"]
    pub fn with_event_channel(
        settings: impl SettingsSource,
        config: ManagerConfig,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        Self::with_connector_and_channel(settings, NativeConnector, config)
    }

    /// Create a manager with a custom connector whose events arrive on a channel.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn with_connector_and_channel(
        settings: impl SettingsSource,
        connector: impl Connector,
        config: ManagerConfig,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (observer, events) = ChannelObserver::channel(config.event_channel_capacity);
        (Self::with_parts(settings, observer, connector, config), events)
    }

    /// Create a manager from explicit parts.
    pub fn with_parts(
        settings: impl SettingsSource,
        observer: impl ConnectionObserver,
        connector: impl Connector,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: Arc::new(settings),
                observer: Arc::new(observer),
                connector: Arc::new(connector),
                config,
                core: Mutex::new(Core {
                    state: LinkState::Idle,
                    reconnect: ReconnectState::default(),
                    session: None,
                    retiring: None,
                    next_token: 0,
                }),
            }),
        }
    }

    /// Start a connection attempt to the configured target.
    ///
    /// Resets the reconnect state and clears any earlier
    /// [`disconnect`](Self::disconnect). With no target configured this only
    /// emits a warning. A session that is still connecting or open is
    /// superseded.
    pub fn connect(&self) {
        let target = self.inner.settings.server_url().trim().to_string();
        if target.is_empty() {
            warn!("connect requested without a server URL");
            self.inner.observer.on_warning("no server URL configured");
            return;
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("connect called outside a Tokio runtime: {e}");
                self.inner
                    .observer
                    .on_error(&format!("no async runtime available: {e}"));
                return;
            }
        };

        let kind = classify(&target);
        let mut core = self.inner.core.lock();
        core.reconnect.reset();
        if core.retire_session(CloseInfo::normal("superseded by a new connection")) {
            info!("superseding the active connection");
        }
        self.inner.start_session(&mut core, &runtime, target, kind);
    }

    /// Close the connection and stop reconnecting until the next
    /// [`connect`](Self::connect).
    ///
    /// Safe to call at any time. When there is nothing to close, no events are
    /// emitted.
    pub fn disconnect(&self) {
        let mut core = self.inner.core.lock();
        core.reconnect.manual_close_requested = true;
        if core.reconnect.cancel_pending() {
            debug!("pending reconnect cancelled");
        }
        if core.retire_session(CloseInfo::normal("client disconnect")) {
            info!("disconnect requested");
        }
        core.state = LinkState::Idle;
    }

    /// Send one text payload over the open transport.
    ///
    /// The payload is handed over verbatim, at most once. Nothing is queued
    /// for later delivery.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::SendRejected`] (and emits a warning) when no
    /// transport is open. The payload is dropped.
    pub fn send(&self, text: impl Into<String>) -> Result<(), LinkError> {
        let text = text.into();
        let outbound = {
            let core = self.inner.core.lock();
            match (&core.session, core.state) {
                (Some(session), LinkState::Open) => Some(session.outbound.clone()),
                _ => None,
            }
        };

        let delivered = outbound.is_some_and(|tx| tx.send(text.clone()).is_ok());
        if !delivered {
            debug!("send rejected, connection is not open");
            self.inner
                .observer
                .on_warning("cannot send: connection is not open");
            return Err(LinkError::SendRejected);
        }

        self.inner.observer.on_transmit(&text);
        Ok(())
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while a transport is open.
    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// The current lifecycle state.
    pub fn state(&self) -> LinkState {
        self.inner.core.lock().state
    }

    /// The kind of the current transport, if a session is active.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.inner.core.lock().session.as_ref().map(|s| s.kind)
    }

    /// Number of automatic reconnects scheduled since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.core.lock().reconnect.attempt_count
    }

    /// Delay of the pending reconnect timer, if one is scheduled.
    pub fn pending_reconnect(&self) -> Option<Duration> {
        self.inner
            .core
            .lock()
            .reconnect
            .pending
            .as_ref()
            .map(|p| p.delay)
    }

    /// Returns `true` between [`disconnect`](Self::disconnect) and the next
    /// [`connect`](Self::connect).
    pub fn is_manually_closed(&self) -> bool {
        self.inner.core.lock().reconnect.manual_close_requested
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("ConnectionManager")
            .field("state", &core.state)
            .field("session", &core.session.as_ref().map(|s| s.id))
            .field("attempts", &core.reconnect.attempt_count)
            .field("reconnect_pending", &core.reconnect.pending.is_some())
            .finish()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // The session task closes its transport when the shutdown sender is
        // dropped; only the timer needs an explicit abort.
        let mut core = self.inner.core.lock();
        core.reconnect.manual_close_requested = true;
        core.reconnect.cancel_pending();
        core.session = None;
    }
}

// ── Session driving ─────────────────────────────────────────────────

impl Inner {
    fn is_current(&self, id: u64) -> bool {
        self.core.lock().is_current(id)
    }

    /// Spawn a session task for `target` and make it current.
    fn start_session(
        self: &Arc<Self>,
        core: &mut Core,
        runtime: &Handle,
        target: String,
        kind: TransportKind,
    ) {
        let id = core.next_token();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let predecessor = core.retiring.take();

        debug!(session = id, target = %target, %kind, "starting session");
        let task = runtime.spawn(run_session(
            Arc::clone(self),
            id,
            kind,
            target,
            predecessor,
            outbound_rx,
            shutdown_rx,
        ));

        core.session = Some(Session {
            id,
            kind,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            task,
        });
        core.state = LinkState::Connecting;
    }

    /// Record a successful open. Returns `false` if the session was superseded.
    fn handle_opened(&self, id: u64) -> bool {
        {
            let mut core = self.core.lock();
            if !core.is_current(id) {
                return false;
            }
            core.state = LinkState::Open;
            core.reconnect.attempt_count = 0;
        }
        self.observer.on_open();
        true
    }

    /// Record a closed transport and schedule a reconnect if one is due.
    ///
    /// `retry` is `false` for failures that a reconnect cannot fix.
    fn handle_closed(self: &Arc<Self>, id: u64, info: CloseInfo, retry: bool) {
        // Settings are resolved before locking; a source may query the manager.
        let retry = retry && self.settings.auto_reconnect();
        let base = self.settings.reconnect_delay();

        let scheduled = {
            let mut core = self.core.lock();
            if core.is_current(id) {
                core.session = None;
                core.state = LinkState::Closed;
                if retry && !core.reconnect.manual_close_requested {
                    self.schedule_reconnect(&mut core, base)
                } else {
                    None
                }
            } else {
                None
            }
        };

        self.observer.on_close(&info);
        if let Some((token, attempt, delay)) = scheduled {
            // `on_close` may have cancelled or replaced the timer.
            let still_pending = matches!(
                &self.core.lock().reconnect.pending,
                Some(p) if p.token == token
            );
            if still_pending {
                self.observer.on_reconnect_scheduled(attempt, delay);
            }
        }
    }

    /// Replace any pending timer with one that fires after `base` plus
    /// backoff and jitter. Returns the timer token, attempt and delay.
    fn schedule_reconnect(
        self: &Arc<Self>,
        core: &mut Core,
        base: Duration,
    ) -> Option<(u64, u32, Duration)> {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("cannot schedule reconnect outside a Tokio runtime: {e}");
                return None;
            }
        };

        let attempt = core.reconnect.attempt_count;
        let delay = self
            .config
            .reconnect_policy
            .delay(base, attempt, &mut rand::thread_rng());
        core.reconnect.attempt_count = attempt.saturating_add(1);
        core.reconnect.cancel_pending();

        let token = core.next_token();
        let inner = Arc::clone(self);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_reconnect(token);
        });
        core.reconnect.pending = Some(PendingReconnect {
            token,
            delay,
            handle,
        });

        info!(attempt, ?delay, "reconnect scheduled");
        Some((token, attempt, delay))
    }

    /// Timer callback: start a new session unless the timer went stale.
    fn fire_reconnect(self: &Arc<Self>, token: u64) {
        let target = self.settings.server_url().trim().to_string();
        {
            let mut core = self.core.lock();
            if !matches!(&core.reconnect.pending, Some(p) if p.token == token) {
                return;
            }
            // Dropping our own handle detaches it; the task is already running.
            core.reconnect.pending = None;
            if core.reconnect.manual_close_requested || core.session.is_some() {
                return;
            }
            if !target.is_empty() {
                let runtime = match Handle::try_current() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("reconnect fired outside a Tokio runtime: {e}");
                        return;
                    }
                };
                let kind = classify(&target);
                info!(target = %target, attempt = core.reconnect.attempt_count, "reconnecting");
                self.start_session(&mut core, &runtime, target, kind);
                return;
            }
        }

        warn!("reconnect skipped, no server URL configured");
        self.observer
            .on_warning("no server URL configured; reconnect skipped");
    }

    /// Close `transport`, bounded by the configured close timeout.
    async fn close_transport(&self, id: u64, transport: &mut dyn Transport, info: CloseInfo) {
        match tokio::time::timeout(self.config.close_timeout, transport.close(info)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session = id, "close handshake failed: {e}"),
            Err(_) => warn!(session = id, "close handshake timed out"),
        }
    }
}

/// One connection attempt, from open to close.
///
/// Only the current session may change manager state or emit data and error
/// events. A superseded session still reports its own final close.
async fn run_session(
    inner: Arc<Inner>,
    id: u64,
    kind: TransportKind,
    target: String,
    predecessor: Option<JoinHandle<()>>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<CloseInfo>,
) {
    if let Some(previous) = predecessor {
        if let Err(e) = previous.await {
            debug!(session = id, "previous session ended abnormally: {e}");
        }
    }
    if !inner.is_current(id) {
        debug!(session = id, "superseded before opening");
        return;
    }

    inner.observer.on_connecting(&target, kind);
    let opening = tokio::time::timeout(inner.config.open_timeout, inner.connector.open(kind, &target));
    let opened = tokio::select! {
        result = opening => result.unwrap_or_else(|_| Err(LinkError::Timeout)),
        close = &mut shutdown_rx => {
            debug!(session = id, "connection attempt abandoned");
            let info = close.unwrap_or_else(|_| CloseInfo::normal("connection manager dropped"));
            inner.observer.on_close(&info);
            return;
        }
    };

    let mut transport = match opened {
        Ok(transport) => transport,
        Err(e) => {
            warn!(session = id, target = %target, %kind, "failed to open transport: {e}");
            if inner.is_current(id) {
                inner.observer.on_error(&e.to_string());
            }
            let retry = e.is_transport();
            if !retry {
                warn!(session = id, "target is unusable, not reconnecting");
            }
            inner.handle_closed(id, CloseInfo::abnormal(e.to_string()), retry);
            return;
        }
    };

    if !inner.handle_opened(id) {
        let info = shutdown_rx
            .try_recv()
            .unwrap_or_else(|_| CloseInfo::normal("superseded by a new connection"));
        inner.close_transport(id, transport.as_mut(), info.clone()).await;
        inner.observer.on_close(&info);
        return;
    }
    info!(session = id, target = %target, %kind, "connection open");

    loop {
        tokio::select! {
            Some(text) = outbound_rx.recv() => {
                if let Err(e) = transport.send(text).await {
                    warn!(session = id, "transport send error: {e}");
                    if inner.is_current(id) {
                        inner.observer.on_error(&e.to_string());
                    }
                }
            }

            close = &mut shutdown_rx => {
                let info = close.unwrap_or_else(|_| CloseInfo::normal("connection manager dropped"));
                debug!(session = id, code = info.code, "closing transport");
                inner.close_transport(id, transport.as_mut(), info.clone()).await;
                inner.handle_closed(id, info, true);
                break;
            }

            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => {
                    if inner.is_current(id) {
                        inner.observer.on_message(&text);
                    }
                }
                Some(Err(e)) => {
                    warn!(session = id, "transport receive error: {e}");
                    if inner.is_current(id) {
                        inner.observer.on_error(&e.to_string());
                    }
                }
                None => {
                    let info = transport.close_info();
                    info!(session = id, code = info.code, reason = %info.reason, "transport closed");
                    inner.handle_closed(id, info, true);
                    break;
                }
            }
        }
    }

    debug!(session = id, "session exited");
}
