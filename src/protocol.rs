//! Engine.IO v4 / Socket.IO v5 packet codec used by the event-socket transport.
//!
//! Two layers are stacked inside each WebSocket text frame:
//!
//! - an Engine.IO packet: one type digit followed by its payload
//!   (`0` open, `1` close, `2` ping, `3` pong, `4` message, `5` upgrade, `6` noop);
//! - inside an Engine.IO message, a Socket.IO packet:
//!   `<type>[<attachments>-][<namespace>,][<ack id>][<json>]`.
//!
//! Only what a text-only client needs is decoded. Binary attachments are
//! recognised but never reassembled.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LinkError, Result};

/// Engine.IO protocol revision spoken by the event-socket transport.
pub const ENGINE_IO_VERSION: &str = "4";

/// The namespace every packet belongs to unless it names another.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Event name used for plain text payloads in both directions.
pub const MESSAGE_EVENT: &str = "message";

// ── Engine.IO ───────────────────────────────────────────────────────

/// Session parameters sent by the server in the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine.IO session id.
    pub sid: String,
    /// Transports the server would upgrade to. Unused over WebSocket.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval between server pings, in milliseconds.
    pub ping_interval: u64,
    /// Grace period after a missed ping, in milliseconds.
    pub ping_timeout: u64,
    /// Largest payload the server accepts, in bytes.
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// How long the link may stay silent before it is considered dead.
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// One Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Decode one Engine.IO packet from a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Protocol`] for an empty frame or an unknown type
    /// digit, and [`LinkError::Serialization`] for a malformed handshake.
    pub fn decode(text: &str) -> Result<Self> {
        let (kind, body) = split_type(text)
            .ok_or_else(|| LinkError::Protocol("empty engine.io packet".into()))?;
        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(body)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(body.to_string())),
            '3' => Ok(Self::Pong(body.to_string())),
            '4' => Ok(Self::Message(body.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(LinkError::Protocol(format!(
                "unknown engine.io packet type {other:?}"
            ))),
        }
    }

    /// Encode this packet as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Serialization`] if an open packet's handshake
    /// cannot be serialized.
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            Self::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        })
    }
}

// ── Socket.IO ───────────────────────────────────────────────────────

/// One Socket.IO packet, carried inside an [`EnginePacket::Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        data: Value,
    },
    Ack {
        namespace: String,
        id: u64,
        data: Value,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
    BinaryEvent {
        namespace: String,
        id: Option<u64>,
        attachments: u32,
        data: Value,
    },
    BinaryAck {
        namespace: String,
        id: u64,
        attachments: u32,
        data: Value,
    },
}

impl SocketPacket {
    /// A connect request for the default namespace.
    pub fn connect() -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.into(),
            data: None,
        }
    }

    /// A disconnect notice for the default namespace.
    pub fn disconnect() -> Self {
        Self::Disconnect {
            namespace: DEFAULT_NAMESPACE.into(),
        }
    }

    /// A `message` event carrying `text` on the default namespace.
    pub fn message(text: &str) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.into(),
            id: None,
            data: Value::Array(vec![
                Value::String(MESSAGE_EVENT.into()),
                Value::String(text.into()),
            ]),
        }
    }

    /// The namespace this packet is addressed to.
    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. }
            | Self::BinaryEvent { namespace, .. }
            | Self::BinaryAck { namespace, .. } => namespace,
        }
    }

    /// Decode a Socket.IO packet from the body of an Engine.IO message.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Protocol`] for structural problems and
    /// [`LinkError::Serialization`] for a malformed JSON payload.
    pub fn decode(text: &str) -> Result<Self> {
        let (kind, rest) = split_type(text)
            .ok_or_else(|| LinkError::Protocol("empty socket.io packet".into()))?;

        let (attachments, rest) = if matches!(kind, '5' | '6') {
            let (count, rest) = rest.split_once('-').ok_or_else(|| {
                LinkError::Protocol("binary packet without attachment count".into())
            })?;
            let count = count
                .parse::<u32>()
                .map_err(|e| LinkError::Protocol(format!("bad attachment count: {e}")))?;
            (count, rest)
        } else {
            (0, rest)
        };

        let (namespace, rest) = if rest.starts_with('/') {
            rest.split_once(',').unwrap_or((rest, ""))
        } else {
            (DEFAULT_NAMESPACE, rest)
        };
        let namespace = namespace.to_string();

        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (id, payload) = rest.split_at_checked(digits).unwrap_or((rest, ""));
        let id = if id.is_empty() {
            None
        } else {
            Some(
                id.parse::<u64>()
                    .map_err(|e| LinkError::Protocol(format!("bad ack id: {e}")))?,
            )
        };
        let data = if payload.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(payload)?)
        };

        let missing = |what: &str| LinkError::Protocol(format!("{what} packet without payload"));
        let missing_id = |what: &str| LinkError::Protocol(format!("{what} packet without ack id"));

        match kind {
            '0' => Ok(Self::Connect { namespace, data }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => Ok(Self::Event {
                namespace,
                id,
                data: data.ok_or_else(|| missing("event"))?,
            }),
            '3' => Ok(Self::Ack {
                namespace,
                id: id.ok_or_else(|| missing_id("ack"))?,
                data: data.ok_or_else(|| missing("ack"))?,
            }),
            '4' => Ok(Self::ConnectError { namespace, data }),
            '5' => Ok(Self::BinaryEvent {
                namespace,
                id,
                attachments,
                data: data.ok_or_else(|| missing("binary event"))?,
            }),
            '6' => Ok(Self::BinaryAck {
                namespace,
                id: id.ok_or_else(|| missing_id("binary ack"))?,
                attachments,
                data: data.ok_or_else(|| missing("binary ack"))?,
            }),
            other => Err(LinkError::Protocol(format!(
                "unknown socket.io packet type {other:?}"
            ))),
        }
    }

    /// Encode this packet as the body of an Engine.IO message.
    pub fn encode(&self) -> String {
        let (kind, attachments, id, data) = match self {
            Self::Connect { data, .. } => ('0', None, None, data.as_ref()),
            Self::Disconnect { .. } => ('1', None, None, None),
            Self::Event { id, data, .. } => ('2', None, *id, Some(data)),
            Self::Ack { id, data, .. } => ('3', None, Some(*id), Some(data)),
            Self::ConnectError { data, .. } => ('4', None, None, data.as_ref()),
            Self::BinaryEvent {
                id,
                attachments,
                data,
                ..
            } => ('5', Some(*attachments), *id, Some(data)),
            Self::BinaryAck {
                id,
                attachments,
                data,
                ..
            } => ('6', Some(*attachments), Some(*id), Some(data)),
        };

        let mut out = String::new();
        out.push(kind);
        if let Some(count) = attachments {
            let _ = write!(out, "{count}-");
        }
        let namespace = self.namespace();
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = id {
            let _ = write!(out, "{id}");
        }
        if let Some(data) = data {
            out.push_str(&data.to_string());
        }
        out
    }
}

// ── Event folding ───────────────────────────────────────────────────

/// Envelope used for every inbound event that is not a single-string `message`.
#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    event: &'a str,
    args: &'a [Value],
}

/// Fold a Socket.IO event payload (`["name", arg, ...]`) into one text message.
///
/// A `message` event with exactly one string argument yields that string
/// unchanged. Any other event yields `{"event":"<name>","args":[...]}`, with
/// object keys in sorted order so equal payloads always fold to equal text.
///
/// ```
/// use serde_json::json;
/// use tether_client::protocol::fold_event;
///
/// assert_eq!(fold_event(&json!(["message", "temp:21"]))?, "temp:21");
/// assert_eq!(
///     fold_event(&json!(["status", {"b": 1, "a": 2}]))?,
///     r#"{"event":"status","args":[{"a":2,"b":1}]}"#
/// );
/// # Ok::<(), tether_client::LinkError>(())
/// ```
///
/// # Errors
///
/// Returns [`LinkError::Protocol`] if the payload is not an array whose first
/// element is the event name.
pub fn fold_event(data: &Value) -> Result<String> {
    let items = data
        .as_array()
        .ok_or_else(|| LinkError::Protocol("event payload is not an array".into()))?;
    let (name, args) = items
        .split_first()
        .ok_or_else(|| LinkError::Protocol("event payload is empty".into()))?;
    let name = name
        .as_str()
        .ok_or_else(|| LinkError::Protocol("event name is not a string".into()))?;

    match args {
        [Value::String(text)] if name == MESSAGE_EVENT => Ok(text.clone()),
        _ => Ok(serde_json::to_string(&EventEnvelope { event: name, args })?),
    }
}

/// Split a packet into its leading type character and the remainder.
fn split_type(text: &str) -> Option<(char, &str)> {
    let mut chars = text.chars();
    let kind = chars.next()?;
    Some((kind, chars.as_str()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn engine_ping_keeps_probe_payload() {
        assert_eq!(
            EnginePacket::decode("2probe").unwrap(),
            EnginePacket::Ping("probe".into())
        );
        assert_eq!(EnginePacket::Pong("probe".into()).encode().unwrap(), "3probe");
    }

    #[test]
    fn socket_namespace_and_id_are_parsed() {
        let packet = SocketPacket::decode(r#"2/admin,13["kick","bob"]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/admin".into(),
                id: Some(13),
                data: json!(["kick", "bob"]),
            }
        );
    }

    #[test]
    fn message_event_wire_form() {
        assert_eq!(
            SocketPacket::message("a:b").encode(),
            r#"2["message","a:b"]"#
        );
    }

    #[test]
    fn fold_rejects_non_arrays() {
        assert!(fold_event(&json!({"event": "x"})).is_err());
        assert!(fold_event(&json!([])).is_err());
        assert!(fold_event(&json!([1, 2])).is_err());
    }
}
