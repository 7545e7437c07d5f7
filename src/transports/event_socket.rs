//! Socket.IO transport (Engine.IO v4 over WebSocket, default namespace only).
//!
//! Inbound application events arrive as many named events; this transport
//! folds them all into one text stream with
//! [`fold_event`](crate::protocol::fold_event). Outbound text is emitted as a
//! `message` event. Engine.IO heartbeats are answered here and never reach
//! the manager.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::{close_frame, close_info_from_frame, dial, WsStream};
use crate::close_code::CloseCode;
use crate::error::LinkError;
use crate::protocol::{
    fold_event, EnginePacket, Handshake, SocketPacket, DEFAULT_NAMESPACE, ENGINE_IO_VERSION,
};
use crate::transport::{CloseInfo, Transport};

/// Default Socket.IO endpoint path.
const SOCKET_IO_PATH: &str = "/socket.io/";

/// Build the Engine.IO WebSocket URL for an event-socket target.
///
/// `http` becomes `ws` and `https` becomes `wss`. A bare host gets the
/// default `/socket.io/` path and any other path without the hint gets it
/// appended. Existing query parameters are kept, except `EIO` and
/// `transport`, which are always set for the WebSocket transport.
///
/// ```
/// use tether_client::transports::event_socket::engine_url;
///
/// let url = engine_url("https://example.org")?;
/// assert_eq!(url.as_str(), "wss://example.org/socket.io/?EIO=4&transport=websocket");
/// # Ok::<(), tether_client::LinkError>(())
/// ```
///
/// # Errors
///
/// Returns [`LinkError::Configuration`] if the target is not a URL or uses a
/// scheme other than `http`, `https`, `ws` or `wss`.
pub fn engine_url(target: &str) -> Result<Url, LinkError> {
    let mut url = Url::parse(target.trim()).map_err(|e| {
        LinkError::Configuration(format!("invalid event-socket target {target:?}: {e}"))
    })?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LinkError::Configuration(format!(
                "unsupported event-socket scheme {other:?}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| LinkError::Configuration(format!("cannot switch {target:?} to {scheme}")))?;

    if !url.path().to_ascii_lowercase().contains("socket.io") {
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}{SOCKET_IO_PATH}"));
    }

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "EIO" && key != "transport")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair("EIO", ENGINE_IO_VERSION)
        .append_pair("transport", "websocket");

    Ok(url)
}

/// A [`Transport`] speaking Socket.IO over a WebSocket.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe. The liveness deadline is derived
/// from the last frame seen, so re-polling after cancellation does not extend
/// it.
#[derive(Debug)]
pub struct EventSocketTransport {
    stream: WsStream,
    handshake: Handshake,
    last_seen: Instant,
    close_info: Option<CloseInfo>,
}

impl EventSocketTransport {
    /// Connect to a Socket.IO server and join the default namespace.
    ///
    /// Returns once the server has acknowledged the namespace connection.
    ///
    /// # Errors
    ///
    /// [`LinkError::Configuration`] for an unusable target, [`LinkError::Io`]
    /// if the WebSocket handshake fails, [`LinkError::Protocol`] if the server
    /// refuses the namespace, and [`LinkError::TransportClosed`] if it hangs
    /// up during the handshake.
    pub async fn connect(target: &str) -> Result<Self, LinkError> {
        let url = engine_url(target)?;
        debug!(url = %url, "connecting event socket");
        let mut stream = dial(url.as_str()).await?;

        let handshake = loop {
            match read_engine(&mut stream).await? {
                EnginePacket::Open(handshake) => break handshake,
                other => debug!(?other, "ignoring packet before engine.io open"),
            }
        };
        debug!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "engine.io session opened");

        write_engine(&mut stream, EnginePacket::Message(SocketPacket::connect().encode())).await?;

        loop {
            match read_engine(&mut stream).await? {
                EnginePacket::Ping(data) => write_engine(&mut stream, EnginePacket::Pong(data)).await?,
                EnginePacket::Close => return Err(LinkError::TransportClosed),
                EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                    SocketPacket::Connect { namespace, .. } if namespace == DEFAULT_NAMESPACE => {
                        break;
                    }
                    SocketPacket::ConnectError { data, .. } => {
                        let detail = data.map(|d| d.to_string()).unwrap_or_default();
                        return Err(LinkError::Protocol(format!(
                            "namespace connection refused: {detail}"
                        )));
                    }
                    other => debug!(?other, "ignoring packet before namespace connect"),
                },
                _ => {}
            }
        }

        info!(url = %url, sid = %handshake.sid, "event socket connection established");
        Ok(Self {
            stream,
            handshake,
            last_seen: Instant::now(),
            close_info: None,
        })
    }

    /// Like [`connect`](Self::connect), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Timeout`] if the deadline elapses, or any error
    /// [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(target: &str, timeout: Duration) -> Result<Self, LinkError> {
        tokio::time::timeout(timeout, Self::connect(target))
            .await
            .map_err(|_| LinkError::Timeout)?
    }

    /// The Engine.IO session parameters negotiated at connect time.
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    fn mark_closed(&mut self, info: CloseInfo) {
        if self.close_info.is_none() {
            self.close_info = Some(info);
        }
    }

    /// Handle one decoded Engine.IO packet. `None` means "keep reading".
    async fn on_engine_packet(
        &mut self,
        packet: EnginePacket,
    ) -> Option<Option<Result<String, LinkError>>> {
        match packet {
            EnginePacket::Ping(data) => {
                if let Err(e) = write_engine(&mut self.stream, EnginePacket::Pong(data)).await {
                    self.mark_closed(CloseInfo::abnormal(e.to_string()));
                    return Some(Some(Err(e)));
                }
                None
            }
            EnginePacket::Message(body) => self.on_socket_packet(&body),
            EnginePacket::Close => {
                self.mark_closed(CloseInfo::normal("engine.io close"));
                Some(None)
            }
            EnginePacket::Open(_) | EnginePacket::Pong(_) | EnginePacket::Upgrade
            | EnginePacket::Noop => None,
        }
    }

    fn on_socket_packet(&mut self, body: &str) -> Option<Option<Result<String, LinkError>>> {
        let packet = match SocketPacket::decode(body) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("dropping malformed socket.io packet: {e}");
                return None;
            }
        };
        if packet.namespace() != DEFAULT_NAMESPACE {
            debug!(namespace = packet.namespace(), "ignoring packet for foreign namespace");
            return None;
        }

        match packet {
            SocketPacket::Event { data, .. } => match fold_event(&data) {
                Ok(text) => Some(Some(Ok(text))),
                Err(e) => {
                    warn!("dropping malformed socket.io event: {e}");
                    None
                }
            },
            SocketPacket::Disconnect { .. } => {
                self.mark_closed(CloseInfo::normal("server disconnect"));
                Some(None)
            }
            SocketPacket::ConnectError { data, .. } => {
                let detail = data.map(|d| d.to_string()).unwrap_or_default();
                self.mark_closed(CloseInfo::new(CloseCode::PolicyViolation, detail.clone()));
                Some(Some(Err(LinkError::Protocol(format!(
                    "namespace connection revoked: {detail}"
                )))))
            }
            SocketPacket::BinaryEvent { attachments, .. }
            | SocketPacket::BinaryAck { attachments, .. } => {
                warn!(attachments, "binary socket.io packets are not supported, skipping");
                None
            }
            SocketPacket::Connect { .. } | SocketPacket::Ack { .. } => None,
        }
    }
}

#[async_trait]
impl Transport for EventSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), LinkError> {
        if self.close_info.is_some() {
            return Err(LinkError::TransportClosed);
        }
        let packet = EnginePacket::Message(SocketPacket::message(&message).encode());
        write_engine(&mut self.stream, packet).await
    }

    async fn recv(&mut self) -> Option<Result<String, LinkError>> {
        if self.close_info.is_some() {
            return None;
        }
        loop {
            let deadline = self.last_seen + self.handshake.liveness_window();
            let frame = tokio::select! {
                frame = self.stream.next() => frame,
                () = tokio::time::sleep_until(deadline) => {
                    warn!(sid = %self.handshake.sid, "no heartbeat from server, closing");
                    self.mark_closed(CloseInfo::abnormal("heartbeat timeout"));
                    return Some(Err(LinkError::Timeout));
                }
            };

            let msg = match frame {
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
            self.last_seen = Instant::now();

            match msg {
                Message::Text(text) => {
                    let packet = match EnginePacket::decode(&text) {
                        Ok(packet) => packet,
                        Err(e) => {
                            warn!("dropping malformed engine.io packet: {e}");
                            continue;
                        }
                    };
                    if let Some(outcome) = self.on_engine_packet(packet).await {
                        return outcome;
                    }
                }
                Message::Binary(_) => {
                    warn!("binary attachments are not supported, skipping frame");
                }
                Message::Close(frame) => {
                    debug!(?frame, "received WebSocket close frame");
                    self.mark_closed(close_info_from_frame(frame.as_ref()));
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self, info: CloseInfo) -> Result<(), LinkError> {
        if self.close_info.is_some() {
            return Ok(());
        }
        let goodbye = EnginePacket::Message(SocketPacket::disconnect().encode());
        if let Err(e) = write_engine(&mut self.stream, goodbye).await {
            debug!("failed to send socket.io disconnect: {e}");
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

/// Read frames until one carries an Engine.IO packet.
async fn read_engine(stream: &mut WsStream) -> Result<EnginePacket, LinkError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return EnginePacket::decode(&text),
            Some(Ok(Message::Close(_))) | None => return Err(LinkError::TransportClosed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(LinkError::TransportReceive(e.to_string())),
        }
    }
}

async fn write_engine(stream: &mut WsStream, packet: EnginePacket) -> Result<(), LinkError> {
    let text = packet.encode()?;
    stream
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| LinkError::TransportSend(e.to_string()))
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

    type ServerWs = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    const OPEN: &str = r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

    #[test]
    fn engine_url_rewrites_scheme_and_path() {
        assert_eq!(
            engine_url("http://host:3000").unwrap().as_str(),
            "ws://host:3000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            engine_url("wss://host/app").unwrap().as_str(),
            "wss://host/app/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn engine_url_keeps_existing_hint_and_query() {
        assert_eq!(
            engine_url("https://host/socket.io/?token=abc&EIO=3").unwrap().as_str(),
            "wss://host/socket.io/?token=abc&EIO=4&transport=websocket"
        );
    }

    #[test]
    fn engine_url_rejects_unusable_targets() {
        assert!(matches!(
            engine_url("not a url"),
            Err(LinkError::Configuration(_))
        ));
        assert!(matches!(
            engine_url("ftp://host/"),
            Err(LinkError::Configuration(_))
        ));
    }

    /// Heartbeat window of 150 ms.
    const SHORT_HEARTBEAT_OPEN: &str = r#"0{"sid":"s2","upgrades":[],"pingInterval":100,"pingTimeout":50}"#;

    /// Accept one connection, complete the Socket.IO handshake, then run `handler`.
    async fn start_socket_io_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(ServerWs) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        start_socket_io_server_with(OPEN, handler).await
    }

    async fn start_socket_io_server_with<F, Fut>(open: &'static str, handler: F) -> String
    where
        F: FnOnce(ServerWs) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text(open.into())).await.unwrap();
            match ws.next().await {
                Some(Ok(Message::Text(text))) => assert_eq!(text.as_str(), "40"),
                other => panic!("expected namespace connect, got {other:?}"),
            }
            ws.send(Message::Text(r#"40{"sid":"n1"}"#.into()))
                .await
                .unwrap();
            handler(ws).await;
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn events_are_folded_into_text() {
        let url = start_socket_io_server(|mut ws| async move {
            for frame in [
                r#"42["message","temp:21"]"#,
                r#"42["status",{"up":true}]"#,
                r#"42["message","a","b"]"#,
                r#"42/other,["message","hidden"]"#,
                r#"42["message",7]"#,
            ] {
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = EventSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.handshake().sid, "s1");
        assert_eq!(transport.recv().await.unwrap().unwrap(), "temp:21");
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"event":"status","args":[{"up":true}]}"#
        );
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"event":"message","args":["a","b"]}"#
        );
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"event":"message","args":[7]}"#
        );
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn pings_are_answered_and_sends_become_message_events() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let url = start_socket_io_server(|mut ws| async move {
            ws.send(Message::Text("2".into())).await.unwrap();
            let mut seen = Vec::new();
            while seen.len() < 2 {
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    seen.push(text.to_string());
                }
            }
            let _ = seen_tx.send(seen);
            ws.send(Message::Text("41".into())).await.unwrap();
        })
        .await;

        let mut transport = EventSocketTransport::connect(&url).await.unwrap();
        transport.send("cmd:reset".to_string()).await.unwrap();

        // The ping is handled inside recv; the server then disconnects us.
        assert!(transport.recv().await.is_none());
        assert_eq!(transport.close_info(), CloseInfo::normal("server disconnect"));

        let mut seen = seen_rx.await.unwrap();
        seen.sort();
        assert_eq!(seen, vec!["3".to_string(), r#"42["message","cmd:reset"]"#.to_string()]);
    }

    #[tokio::test]
    async fn refused_namespace_fails_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text(OPEN.into())).await.unwrap();
            let _ = ws.next().await;
            ws.send(Message::Text(r#"44{"message":"unauthorized"}"#.into()))
                .await
                .unwrap();
            let _ = ws.next().await;
        });

        let err = EventSocketTransport::connect(&format!("http://{addr}"))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Protocol(ref m) if m.contains("unauthorized")));
    }

    #[tokio::test]
    async fn local_close_sends_disconnect_first() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let url = start_socket_io_server(|mut ws| async move {
            let mut seen = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(text) => seen.push(text.to_string()),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            let _ = seen_tx.send(seen);
        })
        .await;

        let mut transport = EventSocketTransport::connect(&url).await.unwrap();
        transport.close(CloseInfo::normal("bye")).await.unwrap();
        assert!(!transport.is_open());
        assert!(matches!(
            transport.send("late".into()).await,
            Err(LinkError::TransportClosed)
        ));
        assert_eq!(seen_rx.await.unwrap(), vec!["41".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_trips_heartbeat_deadline() {
        let url = start_socket_io_server_with(SHORT_HEARTBEAT_OPEN, |mut ws| async move {
            // Hold the socket open without sending anything.
            let _ = ws.next().await;
        })
        .await;

        let mut transport = EventSocketTransport::connect(&url).await.unwrap();
        assert_eq!(
            transport.handshake().liveness_window(),
            Duration::from_millis(150)
        );
        let started = Instant::now();

        assert!(matches!(transport.recv().await, Some(Err(LinkError::Timeout))));
        assert!(started.elapsed() <= Duration::from_millis(150));
        assert!(!transport.is_open());
        assert_eq!(transport.close_info(), CloseInfo::abnormal("heartbeat timeout"));
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn engine_close_packet_ends_stream() {
        let url = start_socket_io_server(|mut ws| async move {
            ws.send(Message::Text(r#"42["message","last"]"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text("1".into())).await.unwrap();
            let _ = ws.next().await;
        })
        .await;

        let mut transport = EventSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "last");
        assert!(transport.recv().await.is_none());
        assert!(!transport.is_open());
        assert_eq!(transport.close_info(), CloseInfo::normal("engine.io close"));
        assert!(matches!(
            transport.send("late".into()).await,
            Err(LinkError::TransportClosed)
        ));
    }
}
