//! Transport selection for a connection target.
//!
//! [`classify`] is a pure heuristic over the target string. It never consults
//! the network and never fails: anything it cannot recognise is treated as a
//! plain line-oriented WebSocket.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Path fragment that marks a Socket.IO endpoint.
const EVENT_SOCKET_HINT: &str = "socket.io";

/// Which wire protocol a target is spoken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Plain WebSocket carrying one text payload per frame.
    LineSocket,
    /// Socket.IO (Engine.IO v4 over WebSocket) carrying named events.
    EventSocket,
}

impl TransportKind {
    /// Short label used in logs and status displays.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LineSocket => "line-socket",
            Self::EventSocket => "event-socket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide which transport applies to `target`.
///
/// A target is an event socket when it mentions the `socket.io` path hint
/// anywhere (case-insensitive), or when it parses as an `http`/`https` URL.
/// Everything else, including strings that are not URLs at all, is a line
/// socket.
///
/// ```
/// use tether_client::selector::{classify, TransportKind};
///
/// assert_eq!(classify("ws://host/x"), TransportKind::LineSocket);
/// assert_eq!(classify("https://host"), TransportKind::EventSocket);
/// assert_eq!(classify("wss://host/socket.io/"), TransportKind::EventSocket);
/// ```
pub fn classify(target: &str) -> TransportKind {
    let target = target.trim();

    if target.to_ascii_lowercase().contains(EVENT_SOCKET_HINT) {
        return TransportKind::EventSocket;
    }

    match Url::parse(target) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => TransportKind::EventSocket,
        _ => TransportKind::LineSocket,
    }
}
