//! Transport abstraction shared by both wire protocols.
//!
//! A [`Transport`] is a live, already-open bidirectional text channel. The
//! manager only ever sees four kinds of notification from it, whatever the
//! underlying protocol calls them:
//!
//! | Notification | How it is expressed                                   |
//! |--------------|-------------------------------------------------------|
//! | opened       | [`Connector::open`] returns `Ok`                      |
//! | message      | [`recv`](Transport::recv) yields `Some(Ok(text))`     |
//! | error        | [`recv`](Transport::recv) yields `Some(Err(e))`       |
//! | closed       | [`recv`](Transport::recv) yields `None`, then [`close_info`](Transport::close_info) |
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use tether_client::error::LinkError;
//! use tether_client::transport::{CloseInfo, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), LinkError> {
//!         unimplemented!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, LinkError>> {
//!         unimplemented!()
//!     }
//!
//!     async fn close(&mut self, info: CloseInfo) -> Result<(), LinkError> {
//!         unimplemented!()
//!     }
//!
//!     fn is_open(&self) -> bool {
//!         unimplemented!()
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::close_code::CloseCode;
use crate::error::LinkError;
use crate::selector::TransportKind;

/// Code and reason describing how a connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInfo {
    /// Numeric close status.
    pub code: u16,
    /// Free-form reason text, possibly empty.
    pub reason: String,
}

impl CloseInfo {
    /// Create a close description from any code and reason.
    pub fn new(code: impl Into<CloseCode>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into().as_u16(),
            reason: reason.into(),
        }
    }

    /// Normal closure (1000).
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::Normal, reason)
    }

    /// Abnormal closure (1006): the link dropped without a close handshake.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::Abnormal, reason)
    }

    /// The close code as a typed value.
    pub fn close_code(&self) -> CloseCode {
        CloseCode::from(self.code)
    }
}

/// A bidirectional text transport.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the session task
/// polls it inside `tokio::select!` alongside outbound traffic. Dropping an
/// unfinished `recv` future must not lose an inbound message.
///
/// # Closure
///
/// After `recv` has returned an error for a fatal condition, the next call
/// must return `None` so the manager sees the closed notification. Once `None`
/// has been returned, [`close_info`](Transport::close_info) describes why.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text payload.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::TransportClosed`] if the transport is no longer
    /// open, or [`LinkError::TransportSend`] if the write failed.
    async fn send(&mut self, message: String) -> Result<(), LinkError>;

    /// Receive the next inbound text payload.
    async fn recv(&mut self) -> Option<Result<String, LinkError>>;

    /// Close the connection with the given code and reason.
    ///
    /// Closing an already closed transport is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Resources are released
    /// regardless.
    async fn close(&mut self, info: CloseInfo) -> Result<(), LinkError>;

    /// Returns `true` while the transport can carry traffic.
    fn is_open(&self) -> bool;

    /// Describes how the connection ended. Only meaningful after
    /// [`recv`](Transport::recv) returned `None`.
    fn close_info(&self) -> CloseInfo {
        CloseInfo::abnormal("")
    }
}

/// Opens transports of a given kind.
///
/// The manager owns one connector for its whole lifetime and calls it once per
/// connection attempt. Tests substitute scripted connectors here.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport to `target` using the wire protocol named by `kind`.
    ///
    /// Returning `Ok` is the opened notification: the transport must be ready
    /// to carry application traffic.
    ///
    /// # Errors
    ///
    /// Any construction or handshake failure. The manager reports it and then
    /// treats the attempt as an abnormal close.
    async fn open(&self, kind: TransportKind, target: &str)
        -> Result<Box<dyn Transport>, LinkError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn close_info_constructors() {
        let info = CloseInfo::normal("bye");
        assert_eq!(info.code, 1000);
        assert_eq!(info.reason, "bye");
        assert_eq!(info.close_code(), CloseCode::Normal);

        let info = CloseInfo::abnormal("reset");
        assert_eq!(info.code, 1006);

        let info = CloseInfo::new(4002u16, "custom");
        assert_eq!(info.close_code(), CloseCode::Other(4002));
    }

    #[test]
    fn transport_is_object_safe() {
        fn assert_object_safe(_: Option<Box<dyn Transport>>) {}
        assert_object_safe(None);
    }
}
