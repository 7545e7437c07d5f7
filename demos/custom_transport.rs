//! # Custom Transport Example
//!
//! Shows how to plug your own [`Transport`] and [`Connector`] into a
//! [`ConnectionManager`] with a simple in-process loopback channel. This is
//! useful for:
//!
//! - **Testing**: exercise your message handling without a real server
//! - **Custom backends**: adapt any I/O layer (TCP, QUIC, serial lines)
//!
//! The fake server echoes every payload back, then drops the link once to show
//! the automatic reconnect.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tether_client::{
    CloseInfo, ConnectionManager, ConnectionObserver, Connector, LinkError, ManagerConfig,
    Settings, Transport, TransportKind,
};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: Define a channel-based "loopback" transport
// ─────────────────────────────────────────────────────────────────────

/// The client half of a loopback link.
pub struct LoopbackTransport {
    /// Payloads the manager sends go here (the server reads the other end).
    tx: mpsc::UnboundedSender<String>,
    /// Payloads the server sends arrive here.
    rx: mpsc::UnboundedReceiver<String>,
    closed: Option<CloseInfo>,
}

/// The "server side" of the loopback.
pub struct LoopbackServer {
    /// Read what the client sent.
    pub rx: mpsc::UnboundedReceiver<String>,
    /// Send payloads to the client.
    pub tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
            closed: None,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the Transport trait
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), LinkError> {
        self.tx
            .send(message)
            .map_err(|e| LinkError::TransportSend(e.to_string()))
    }

    /// `mpsc::UnboundedReceiver::recv` is cancel-safe, so this is too.
    /// A dropped server half ends the link.
    async fn recv(&mut self) -> Option<Result<String, LinkError>> {
        if self.closed.is_some() {
            return None;
        }
        let next = self.rx.recv().await;
        if next.is_none() {
            self.closed = Some(CloseInfo::abnormal("server went away"));
        }
        next.map(Ok)
    }

    async fn close(&mut self, info: CloseInfo) -> Result<(), LinkError> {
        self.closed = Some(info);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.closed.is_none()
    }

    fn close_info(&self) -> CloseInfo {
        self.closed
            .clone()
            .unwrap_or_else(|| CloseInfo::abnormal(""))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: A connector that starts an echo server per connection
// ─────────────────────────────────────────────────────────────────────

struct EchoConnector;

#[async_trait]
impl Connector for EchoConnector {
    async fn open(
        &self,
        kind: TransportKind,
        target: &str,
    ) -> Result<Box<dyn Transport>, LinkError> {
        tracing::info!("opening loopback {kind} for {target}");
        let (transport, mut server) = loopback_pair();
        tokio::spawn(async move {
            let _ = server.tx.send("motd:welcome to the loopback".into());
            while let Some(text) = server.rx.recv().await {
                if text == "drop" {
                    // Dropping the server half simulates a lost link.
                    return;
                }
                let _ = server.tx.send(format!("echo:{text}"));
            }
        });
        Ok(Box::new(transport))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 4: An observer that logs and counts opens
// ─────────────────────────────────────────────────────────────────────

struct Printer {
    opened: mpsc::UnboundedSender<()>,
}

impl ConnectionObserver for Printer {
    fn on_open(&self) {
        tracing::info!("open");
        let _ = self.opened.send(());
    }

    fn on_close(&self, info: &CloseInfo) {
        tracing::info!("closed [{}] {}", info.code, info.reason);
    }

    fn on_message(&self, text: &str) {
        tracing::info!("<- {text}");
    }

    fn on_error(&self, detail: &str) {
        tracing::error!("{detail}");
    }

    fn on_reconnect_scheduled(&self, attempt: u32, delay: Duration) {
        tracing::info!("reconnect #{} in {delay:?}", attempt + 1);
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 5: Wire together the manager and the fake server
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (opened_tx, mut opened_rx) = mpsc::unbounded_channel();
    let settings = Arc::new(
        Settings::new("ws://loopback.invalid/feed").with_reconnect_delay(Duration::from_millis(250)),
    );
    let manager = ConnectionManager::with_parts(
        settings,
        Printer { opened: opened_tx },
        EchoConnector,
        ManagerConfig::default(),
    );

    manager.connect();
    opened_rx.recv().await.ok_or("observer dropped")?;
    manager.send("hello")?;
    manager.send("drop")?;

    // The link drops; wait for the automatic reconnect.
    opened_rx.recv().await.ok_or("observer dropped")?;
    manager.send("hello again")?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.disconnect();
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!("Done. Custom transport works!");
    Ok(())
}
