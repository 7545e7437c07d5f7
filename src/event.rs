//! Observer contract between the connection manager and its embedding application.
//!
//! The manager reports everything through a [`ConnectionObserver`]. Callers
//! that prefer a stream of values can use [`ChannelObserver`], which turns each
//! callback into a [`ConnectionEvent`] on a bounded Tokio channel.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::selector::TransportKind;
use crate::transport::CloseInfo;

/// A notification emitted by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt started.
    Connecting {
        /// The target being dialled.
        target: String,
        /// The transport chosen for it.
        kind: TransportKind,
    },
    /// The transport is open and can carry traffic.
    Opened,
    /// The transport closed.
    Closed {
        /// Numeric close status.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// An inbound payload, exactly as the transport delivered it.
    MessageReceived {
        /// Payload text.
        text: String,
    },
    /// A transport failure. Does not by itself change connection state.
    ErrorOccurred {
        /// Human-readable description.
        detail: String,
    },
    /// A non-fatal problem, such as a rejected send or a missing target.
    Warning {
        /// Human-readable description.
        detail: String,
    },
    /// An outbound payload was handed to the transport.
    Transmitted {
        /// Payload text.
        text: String,
    },
    /// An automatic reconnect was scheduled.
    ReconnectScheduled {
        /// Attempt counter value used to compute the delay.
        attempt: u32,
        /// Delay until the reconnect fires.
        delay: Duration,
    },
}

/// Callbacks through which the manager reports lifecycle and data events.
///
/// Callbacks are invoked synchronously from the manager's methods and from
/// its session task, never while internal locks are held, so implementations
/// may call back into the manager. They must not block.
///
/// Only the four core callbacks are required; the rest default to no-ops.
pub trait ConnectionObserver: Send + Sync + 'static {
    /// The transport opened.
    fn on_open(&self);

    /// The transport closed.
    fn on_close(&self, info: &CloseInfo);

    /// A payload arrived.
    fn on_message(&self, text: &str);

    /// A transport error occurred.
    fn on_error(&self, detail: &str);

    /// A non-fatal problem worth showing to the user.
    fn on_warning(&self, _detail: &str) {}

    /// A payload was sent.
    fn on_transmit(&self, _text: &str) {}

    /// A connection attempt started.
    fn on_connecting(&self, _target: &str, _kind: TransportKind) {}

    /// An automatic reconnect was scheduled.
    fn on_reconnect_scheduled(&self, _attempt: u32, _delay: Duration) {}
}

/// An observer that forwards every callback as a [`ConnectionEvent`].
///
/// Events are sent with `try_send`: when the consumer cannot keep up, the
/// event is dropped with a warning rather than stalling the session task.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<ConnectionEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiver its events arrive on.
    ///
    /// A `capacity` of zero is clamped to one.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    fn emit(&self, event: ConnectionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}

impl ConnectionObserver for ChannelObserver {
    fn on_open(&self) {
        self.emit(ConnectionEvent::Opened);
    }

    fn on_close(&self, info: &CloseInfo) {
        self.emit(ConnectionEvent::Closed {
            code: info.code,
            reason: info.reason.clone(),
        });
    }

    fn on_message(&self, text: &str) {
        self.emit(ConnectionEvent::MessageReceived { text: text.into() });
    }

    fn on_error(&self, detail: &str) {
        self.emit(ConnectionEvent::ErrorOccurred {
            detail: detail.into(),
        });
    }

    fn on_warning(&self, detail: &str) {
        self.emit(ConnectionEvent::Warning {
            detail: detail.into(),
        });
    }

    fn on_transmit(&self, text: &str) {
        self.emit(ConnectionEvent::Transmitted { text: text.into() });
    }

    fn on_connecting(&self, target: &str, kind: TransportKind) {
        self.emit(ConnectionEvent::Connecting {
            target: target.into(),
            kind,
        });
    }

    fn on_reconnect_scheduled(&self, attempt: u32, delay: Duration) {
        self.emit(ConnectionEvent::ReconnectScheduled { attempt, delay });
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn callbacks_become_events_in_order() {
        let (observer, mut rx) = ChannelObserver::channel(16);

        observer.on_connecting("ws://host", TransportKind::LineSocket);
        observer.on_open();
        observer.on_message("temp:21");
        observer.on_transmit("ping");
        observer.on_error("reset by peer");
        observer.on_close(&CloseInfo::abnormal("reset by peer"));
        observer.on_reconnect_scheduled(0, Duration::from_millis(1600));
        observer.on_warning("not connected");

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert_eq!(
            events,
            vec![
                ConnectionEvent::Connecting {
                    target: "ws://host".into(),
                    kind: TransportKind::LineSocket,
                },
                ConnectionEvent::Opened,
                ConnectionEvent::MessageReceived {
                    text: "temp:21".into()
                },
                ConnectionEvent::Transmitted {
                    text: "ping".into()
                },
                ConnectionEvent::ErrorOccurred {
                    detail: "reset by peer".into()
                },
                ConnectionEvent::Closed {
                    code: 1006,
                    reason: "reset by peer".into()
                },
                ConnectionEvent::ReconnectScheduled {
                    attempt: 0,
                    delay: Duration::from_millis(1600)
                },
                ConnectionEvent::Warning {
                    detail: "not connected".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (observer, mut rx) = ChannelObserver::channel(1);
        observer.on_open();
        observer.on_message("dropped");

        assert_eq!(rx.recv().await.unwrap(), ConnectionEvent::Opened);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let (observer, mut rx) = ChannelObserver::channel(0);
        observer.on_open();
        assert_eq!(rx.recv().await.unwrap(), ConnectionEvent::Opened);
    }

    #[test]
    fn closed_receiver_is_tolerated() {
        let (observer, rx) = ChannelObserver::channel(4);
        drop(rx);
        observer.on_open();
    }
}
