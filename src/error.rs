//! Error types for the tether client.

use thiserror::Error;

/// Errors that can occur while opening, driving or probing a connection.
///
/// The [`ConnectionManager`](crate::ConnectionManager) never returns these from
/// its lifecycle methods; they are rendered into observer notifications. Only
/// [`send`](crate::ConnectionManager::send) hands one back, as a rejection
/// indicator.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The connection target is missing or cannot be used.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection is already closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// The peer violated the wire protocol of the active transport.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A message was offered while no transport was open. The message is dropped.
    #[error("send rejected: connection is not open")]
    SendRejected,

    /// The auxiliary metadata probe failed.
    #[error("metadata probe failed: {0}")]
    Probe(String),

    /// Failed to serialize or deserialize a wire payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Returns `true` for failures that belong to the transport layer and
    /// therefore lead into reconnect scheduling.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::TransportSend(_)
                | Self::TransportReceive(_)
                | Self::TransportClosed
                | Self::Protocol(_)
                | Self::Timeout
                | Self::Io(_)
        )
    }
}

/// A specialized [`Result`] type for tether client operations.
pub type Result<T> = std::result::Result<T, LinkError>;
