//! Concrete [`Transport`](crate::Transport) implementations over `tokio-tungstenite`.
//!
//! | Kind                                                      | Transport                |
//! |-----------------------------------------------------------|--------------------------|
//! | [`LineSocket`](crate::selector::TransportKind::LineSocket)   | [`LineSocketTransport`]  |
//! | [`EventSocket`](crate::selector::TransportKind::EventSocket) | [`EventSocketTransport`] |
//!
//! [`NativeConnector`] picks between them and is what
//! [`ConnectionManager::new`](crate::ConnectionManager::new) uses.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), tether_client::LinkError> {
//! use tether_client::transport::{CloseInfo, Transport};
//! use tether_client::transports::LineSocketTransport;
//!
//! let mut ws = LineSocketTransport::connect("ws://localhost:8080/feed").await?;
//! ws.send("status:ready".to_string()).await?;
//!
//! if let Some(Ok(msg)) = ws.recv().await {
//!     println!("server said: {msg}");
//! }
//!
//! ws.close(CloseInfo::normal("done")).await?;
//! # Ok(())
//! # }
//! ```

pub mod event_socket;
pub mod line_socket;

pub use event_socket::EventSocketTransport;
pub use line_socket::LineSocketTransport;

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::close_code::CloseCode;
use crate::error::LinkError;
use crate::selector::TransportKind;
use crate::transport::{CloseInfo, Connector, Transport};

/// Type alias for the underlying WebSocket stream of both transports.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens [`LineSocketTransport`]s and [`EventSocketTransport`]s over the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

#[async_trait]
impl Connector for NativeConnector {
    async fn open(
        &self,
        kind: TransportKind,
        target: &str,
    ) -> Result<Box<dyn Transport>, LinkError> {
        match kind {
            TransportKind::LineSocket => Ok(Box::new(LineSocketTransport::connect(target).await?)),
            TransportKind::EventSocket => {
                Ok(Box::new(EventSocketTransport::connect(target).await?))
            }
        }
    }
}

/// Perform the WebSocket handshake with `url`.
///
/// I/O errors keep their [`ErrorKind`](std::io::ErrorKind); every other
/// handshake failure becomes [`ErrorKind::Other`](std::io::ErrorKind::Other).
pub(crate) async fn dial(url: &str) -> Result<WsStream, LinkError> {
    let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
        let kind = match &e {
            tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
            _ => std::io::ErrorKind::Other,
        };
        LinkError::Io(std::io::Error::new(kind, e))
    })?;
    Ok(stream)
}

/// Build the close frame sent for `info`.
pub(crate) fn close_frame(info: &CloseInfo) -> CloseFrame {
    CloseFrame {
        code: WsCloseCode::from(info.code),
        reason: info.reason.clone().into(),
    }
}

/// Describe a received close frame. A frame without a body means "no status".
pub(crate) fn close_info_from_frame(frame: Option<&CloseFrame>) -> CloseInfo {
    match frame {
        Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.to_string()),
        None => CloseInfo::new(CloseCode::NoStatus, ""),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn close_frames_carry_code_and_reason() {
        let frame = close_frame(&CloseInfo::normal("client disconnect"));
        assert_eq!(u16::from(frame.code), 1000);
        assert_eq!(frame.reason.as_str(), "client disconnect");

        let info = close_info_from_frame(Some(&frame));
        assert_eq!(info, CloseInfo::normal("client disconnect"));
    }

    #[test]
    fn missing_close_frame_means_no_status() {
        assert_eq!(close_info_from_frame(None).code, 1005);
    }

    #[tokio::test]
    async fn native_connector_reports_unreachable_hosts() {
        let result = NativeConnector
            .open(TransportKind::LineSocket, "ws://127.0.0.1:1")
            .await;
        assert!(matches!(result, Err(LinkError::Io(_))));
    }

    #[tokio::test]
    async fn native_connector_rejects_malformed_targets() {
        let result = NativeConnector
            .open(TransportKind::LineSocket, "not-a-valid-url")
            .await;
        assert!(result.is_err());
    }
}
