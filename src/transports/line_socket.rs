//! Line-oriented WebSocket transport.
//!
//! Each WebSocket text frame is one payload. `ws://` and `wss://` are both
//! supported; TLS is handled by [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//! Binary frames are coerced to text so that nothing the server sends is
//! silently lost.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::{close_frame, close_info_from_frame, dial, WsStream};
use crate::error::LinkError;
use crate::transport::{CloseInfo, Transport};

/// A [`Transport`] over a plain WebSocket, one text payload per frame.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: it only awaits the stream's
/// `next()`, which never consumes a frame it does not return.
#[derive(Debug)]
pub struct LineSocketTransport {
    stream: WsStream,
    /// Set once the link is closed, by either side.
    close_info: Option<CloseInfo>,
}

impl LineSocketTransport {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Io`] if the URL is invalid or the handshake fails.
    pub async fn connect(url: &str) -> Result<Self, LinkError> {
        debug!(url = %url, "connecting line socket");
        let stream = dial(url).await?;
        info!(url = %url, "line socket connection established");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream.
    ///
    /// Useful when the caller needs custom TLS, proxy or header setup.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            close_info: None,
        }
    }

    /// Like [`connect`](Self::connect), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Timeout`] if the deadline elapses, or any error
    /// [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, LinkError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| LinkError::Timeout)?
    }

    /// Record the first close reason; later ones are ignored.
    fn mark_closed(&mut self, info: CloseInfo) {
        if self.close_info.is_none() {
            self.close_info = Some(info);
        }
    }
}

#[async_trait]
impl Transport for LineSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), LinkError> {
        if self.close_info.is_some() {
            return Err(LinkError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| LinkError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, LinkError>> {
        if self.close_info.is_some() {
            return None;
        }
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    self.mark_closed(CloseInfo::abnormal(e.to_string()));
                    return Some(Err(LinkError::TransportReceive(e.to_string())));
                }
                None => {
                    self.mark_closed(CloseInfo::abnormal("connection dropped"));
                    return None;
                }
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Binary(bytes) => {
                    warn!(len = bytes.len(), "coercing binary frame to text");
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Message::Close(frame) => {
                    debug!(?frame, "received WebSocket close frame");
                    self.mark_closed(close_info_from_frame(frame.as_ref()));
                    return None;
                }
                // tungstenite queues the pong reply itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Frame(_) => {
                    debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self, info: CloseInfo) -> Result<(), LinkError> {
        if self.close_info.is_some() {
            return Ok(());
        }
        let frame = close_frame(&info);
        self.close_info = Some(info);
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| LinkError::TransportSend(e.to_string()))
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

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[test]
    fn line_socket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<LineSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = LineSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Io(_)));
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        let result = LineSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            std::time::Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result.unwrap_err(), LinkError::Timeout));
    }

    // ── Mock-server helpers ─────────────────────────────────────────

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    // ── Mock-server tests ───────────────────────────────────────────

    #[tokio::test]
    async fn text_is_delivered_byte_for_byte() {
        let payloads = ["temp:21", "note: spaced  value ", "ünïcødé:✓", "no-colon"];
        let url = start_mock_server(move |mut ws| async move {
            for payload in payloads {
                ws.send(Message::Text(payload.into())).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = LineSocketTransport::connect(&url).await.unwrap();
        for expected in payloads {
            assert_eq!(transport.recv().await.unwrap().unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn binary_frames_are_coerced_to_text() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(b"raw:bytes".to_vec().into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = LineSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "raw:bytes");
    }

    #[tokio::test]
    async fn close_frame_code_and_reason_are_reported() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(Some(CloseFrame {
                code: WsCloseCode::Away,
                reason: "maintenance".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut transport = LineSocketTransport::connect(&url).await.unwrap();
        assert!(transport.recv().await.is_none());
        assert!(!transport.is_open());
        assert_eq!(transport.close_info(), CloseInfo::new(1001u16, "maintenance"));
        // Stays closed.
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = LineSocketTransport::connect(&url).await.unwrap();
        transport.send("ping:1".to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "ping:1");
    }

    #[tokio::test]
    async fn local_close_sends_code_and_blocks_sends() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Close(frame) = msg {
                    let _ = seen_tx.send(frame.map(|f| (u16::from(f.code), f.reason.to_string())));
                    break;
                }
            }
        })
        .await;

        let mut transport = LineSocketTransport::connect(&url).await.unwrap();
        transport
            .close(CloseInfo::normal("client disconnect"))
            .await
            .unwrap();
        // Second close is a no-op.
        transport.close(CloseInfo::normal("again")).await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, LinkError::TransportClosed));
        assert_eq!(transport.close_info().reason, "client disconnect");

        let seen = seen_rx.await.unwrap();
        assert_eq!(seen, Some((1000, "client disconnect".to_string())));
    }

    #[tokio::test]
    async fn dropped_connection_is_abnormal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            drop(ws);
        });

        let mut transport = LineSocketTransport::connect(&format!("ws://{addr}"))
            .await
            .unwrap();
        // Either a receive error or a bare end of stream, then closed.
        loop {
            match transport.recv().await {
                Some(Ok(msg)) => panic!("unexpected message {msg:?}"),
                Some(Err(_)) => continue,
                None => break,
            }
        }
        assert_eq!(transport.close_info().code, 1006);
    }
}
