//! # Tether Client
//!
//! A self-healing client for one long-lived, bidirectional text connection.
//!
//! [`ConnectionManager`] keeps a single logical connection alive: it picks a
//! transport for the configured target, reports everything it sees through a
//! [`ConnectionObserver`], and reconnects with jittered linear backoff after
//! the server or network drops the link.
//!
//! ## Features
//!
//! - **Two wire transports** behind one [`Transport`] trait: plain WebSocket
//!   text frames ([`TransportKind::LineSocket`]) and Socket.IO v5 events over
//!   Engine.IO v4 ([`TransportKind::EventSocket`]), chosen by [`classify`]
//! - **Reconnect policy**: base delay + jitter + capped linear backoff, see
//!   [`ReconnectPolicy`]
//! - **Event-driven**: implement [`ConnectionObserver`] or receive
//!   [`ConnectionEvent`]s on a channel
//! - **Live settings**: the target and reconnect settings are re-read on every
//!   attempt through [`SettingsSource`]
//! - **Metadata probe** (feature `metadata-probe`): best-effort `GET /info`
//!   on the target host
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether_client::{ConnectionEvent, ConnectionManager, ManagerConfig, Settings};
//! use tether_client::router::MessageRouter;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = Settings::new("ws://localhost:8080/feed");
//!     let (manager, mut events) =
//!         ConnectionManager::with_event_channel(settings, ManagerConfig::default());
//!     let router = MessageRouter::new().on("temp", |v| println!("temperature: {v}"));
//!
//!     manager.connect();
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ConnectionEvent::Opened => println!("connected"),
//!             ConnectionEvent::MessageReceived { text } => {
//!                 router.dispatch(&text);
//!             }
//!             ConnectionEvent::ReconnectScheduled { attempt, delay } => {
//!                 println!("retry #{attempt} in {delay:?}");
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

pub mod close_code;
pub mod error;
pub mod event;
pub mod manager;
pub mod protocol;
pub mod reconnect;
pub mod router;
pub mod selector;
pub mod settings;
pub mod transport;

#[cfg(feature = "transport-websocket")]
pub mod transports;

#[cfg(feature = "metadata-probe")]
pub mod probe;

// Re-export primary types for ergonomic imports.
pub use close_code::CloseCode;
pub use error::LinkError;
pub use event::{ChannelObserver, ConnectionEvent, ConnectionObserver};
pub use manager::{ConnectionManager, LinkState, ManagerConfig};
pub use reconnect::ReconnectPolicy;
pub use selector::{classify, TransportKind};
pub use settings::{Settings, SettingsSource, SettingsStore};
pub use transport::{CloseInfo, Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{EventSocketTransport, LineSocketTransport, NativeConnector};

#[cfg(feature = "metadata-probe")]
pub use probe::{InstanceMetadata, MetadataProbe};
