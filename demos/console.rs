//! # Console Example
//!
//! An interactive line console on top of a self-healing connection:
//!
//! 1. Load settings from `TETHER_SETTINGS` (a JSON file) or `TETHER_URL`
//! 2. Probe the server's `/info` metadata (best effort)
//! 3. Connect and print every `key:value` frame the server sends
//! 4. Send each stdin line as one payload
//! 5. Reconnect automatically until `/quit` or Ctrl+C
//!
//! Console commands: `/connect`, `/disconnect`, `/url <target>`, `/quit`.
//!
//! ## Running
//!
//! ```sh
//! TETHER_URL=ws://localhost:8080/feed cargo run --example console
//!
//! # A Socket.IO server:
//! TETHER_URL=http://localhost:3000 RUST_LOG=tether_client=debug cargo run --example console
//! ```

use std::sync::Arc;
use std::time::Duration;

use tether_client::probe::MetadataProbe;
use tether_client::router::{Frame, MessageRouter};
use tether_client::{
    ConnectionEvent, ConnectionManager, ManagerConfig, Settings, SettingsSource, SettingsStore,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Target used when neither `TETHER_SETTINGS` nor `TETHER_URL` is set.
const DEFAULT_URL: &str = "ws://localhost:8080/feed";

fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    if let Ok(path) = std::env::var("TETHER_SETTINGS") {
        let json = std::fs::read_to_string(&path)?;
        return Ok(Settings::from_json(&json)?);
    }
    let url = std::env::var("TETHER_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    Ok(Settings::new(url))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let store = Arc::new(SettingsStore::new(load_settings()?));
    tracing::info!("Target: {}", store.server_url());

    // ── Metadata probe ──────────────────────────────────────────────
    let probe = MetadataProbe::new(Duration::from_secs(3))?;
    match probe.fetch(&store.server_url()).await {
        Ok(meta) => {
            for (key, value) in meta.iter() {
                tracing::info!("server {key}: {value}");
            }
        }
        Err(e) => tracing::warn!("No server metadata: {e}"),
    }

    // ── Routing ─────────────────────────────────────────────────────
    let router = MessageRouter::new()
        .on("motd", |value| println!("*** {value}"))
        .on("error", |value| eprintln!("server error: {value}"))
        .fallback(|frame| match frame {
            Frame::Pair { key, value } => println!("[{key}] {value}"),
            Frame::Raw(text) => println!("{text}"),
        });

    // ── Connect ─────────────────────────────────────────────────────
    let (manager, mut events) =
        ConnectionManager::with_event_channel(Arc::clone(&store), ManagerConfig::default());
    manager.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };
                match event {
                    ConnectionEvent::Connecting { target, kind } => {
                        tracing::info!("Connecting to {target} ({kind})");
                    }
                    ConnectionEvent::Opened => tracing::info!("Connected"),
                    ConnectionEvent::Closed { code, reason } => {
                        tracing::warn!("Closed [{code}] {reason}");
                    }
                    ConnectionEvent::MessageReceived { text } => {
                        router.dispatch(&text);
                    }
                    ConnectionEvent::ErrorOccurred { detail } => tracing::error!("{detail}"),
                    ConnectionEvent::Warning { detail } => tracing::warn!("{detail}"),
                    ConnectionEvent::ReconnectScheduled { attempt, delay } => {
                        tracing::info!("Reconnect #{} in {delay:?}", attempt + 1);
                    }
                    ConnectionEvent::Transmitted { text } => tracing::debug!("sent {text}"),
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("stdin closed, shutting down");
                    break;
                };
                match line.trim_end() {
                    "/quit" => break,
                    "/connect" => manager.connect(),
                    "/disconnect" => manager.disconnect(),
                    command if command.starts_with("/url ") => {
                        let target = command.trim_start_matches("/url ").trim();
                        store.set_server_url(target);
                        tracing::info!("Target set to {target}; takes effect on next connect");
                    }
                    text => {
                        // Rejections are reported as warnings on the event channel.
                        let _ = manager.send(text);
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    manager.disconnect();
    // Give the session a moment to finish its close handshake.
    tokio::time::sleep(Duration::from_millis(200)).await;
    tracing::info!("Goodbye!");
    Ok(())
}
