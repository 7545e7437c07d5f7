#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests: Engine.IO / Socket.IO packets, event folding, settings
//! files and target classification.

use serde_json::json;
use tether_client::protocol::{fold_event, EnginePacket, Handshake, SocketPacket};
use tether_client::{classify, CloseCode, CloseInfo, LinkError, Settings, TransportKind};

// ═══════════════════════════════════════════════════════════════════
// Engine.IO
// ═══════════════════════════════════════════════════════════════════

#[test]
fn engine_open_packet_from_a_real_server() {
    let frame = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
    let EnginePacket::Open(handshake) = EnginePacket::decode(frame).unwrap() else {
        panic!("expected open packet");
    };
    assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
    assert_eq!(handshake.max_payload, Some(1_000_000));
    assert_eq!(handshake.liveness_window().as_millis(), 45_000);
}

#[test]
fn engine_open_without_optional_fields() {
    let handshake: Handshake =
        serde_json::from_str(r#"{"sid":"x","pingInterval":1,"pingTimeout":2}"#).unwrap();
    assert!(handshake.upgrades.is_empty());
    assert_eq!(handshake.max_payload, None);
}

#[test]
fn engine_open_with_bad_json_is_a_serialization_error() {
    let err = EnginePacket::decode("0{not json").unwrap_err();
    assert!(matches!(err, LinkError::Serialization(_)));
}

#[test]
fn engine_control_packets() {
    assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
    assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
    assert_eq!(
        EnginePacket::decode("3probe").unwrap(),
        EnginePacket::Pong("probe".into())
    );
    assert_eq!(EnginePacket::decode("5").unwrap(), EnginePacket::Upgrade);
    assert_eq!(EnginePacket::decode("6").unwrap(), EnginePacket::Noop);
    assert_eq!(EnginePacket::Pong(String::new()).encode().unwrap(), "3");
}

#[test]
fn engine_rejects_empty_and_unknown_frames() {
    assert!(matches!(
        EnginePacket::decode(""),
        Err(LinkError::Protocol(_))
    ));
    assert!(matches!(
        EnginePacket::decode("9"),
        Err(LinkError::Protocol(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════
// Socket.IO
// ═══════════════════════════════════════════════════════════════════

#[test]
fn outbound_message_event_wire_format() {
    let body = SocketPacket::message("cmd:\"quoted\"").encode();
    assert_eq!(body, r#"2["message","cmd:\"quoted\""]"#);
    assert_eq!(
        EnginePacket::Message(body).encode().unwrap(),
        r#"42["message","cmd:\"quoted\""]"#
    );
}

#[test]
fn connect_and_disconnect_wire_format() {
    assert_eq!(SocketPacket::connect().encode(), "0");
    assert_eq!(SocketPacket::disconnect().encode(), "1");
}

#[test]
fn connect_ack_carries_session_id() {
    let packet = SocketPacket::decode(r#"0{"sid":"oSO0OpakMV_3jnilAAAA"}"#).unwrap();
    assert_eq!(
        packet,
        SocketPacket::Connect {
            namespace: "/".into(),
            data: Some(json!({"sid": "oSO0OpakMV_3jnilAAAA"})),
        }
    );
}

#[test]
fn event_with_namespace_and_ack_id() {
    let packet = SocketPacket::decode(r#"2/admin,12["ban",{"user":"x"}]"#).unwrap();
    assert_eq!(packet.namespace(), "/admin");
    assert_eq!(
        packet,
        SocketPacket::Event {
            namespace: "/admin".into(),
            id: Some(12),
            data: json!(["ban", {"user": "x"}]),
        }
    );
    assert_eq!(packet.encode(), r#"2/admin,12["ban",{"user":"x"}]"#);
}

#[test]
fn ack_requires_an_id() {
    assert!(matches!(
        SocketPacket::decode(r#"3["ok"]"#),
        Err(LinkError::Protocol(_))
    ));
    assert_eq!(
        SocketPacket::decode(r#"37["ok"]"#).unwrap(),
        SocketPacket::Ack {
            namespace: "/".into(),
            id: 7,
            data: json!(["ok"]),
        }
    );
}

#[test]
fn binary_event_attachment_count() {
    let packet =
        SocketPacket::decode(r#"52-["upload",{"_placeholder":true,"num":0},{"_placeholder":true,"num":1}]"#)
            .unwrap();
    let SocketPacket::BinaryEvent { attachments, .. } = packet else {
        panic!("expected binary event");
    };
    assert_eq!(attachments, 2);

    assert!(matches!(
        SocketPacket::decode(r#"5["no-count"]"#),
        Err(LinkError::Protocol(_))
    ));
}

#[test]
fn connect_error_keeps_server_message() {
    let packet = SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap();
    assert_eq!(
        packet,
        SocketPacket::ConnectError {
            namespace: "/".into(),
            data: Some(json!({"message": "Not authorized"})),
        }
    );
}

#[test]
fn event_without_payload_is_rejected() {
    assert!(matches!(
        SocketPacket::decode("2"),
        Err(LinkError::Protocol(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════
// Event folding
// ═══════════════════════════════════════════════════════════════════

#[test]
fn plain_message_event_passes_through_verbatim() {
    for text in ["temp:21", "", "  padded  ", "a:b:c", "ünïcødé"] {
        assert_eq!(fold_event(&json!(["message", text])).unwrap(), text);
    }
}

#[test]
fn other_shapes_become_envelopes() {
    assert_eq!(
        fold_event(&json!(["message"])).unwrap(),
        r#"{"event":"message","args":[]}"#
    );
    assert_eq!(
        fold_event(&json!(["message", "a", "b"])).unwrap(),
        r#"{"event":"message","args":["a","b"]}"#
    );
    assert_eq!(
        fold_event(&json!(["message", 42])).unwrap(),
        r#"{"event":"message","args":[42]}"#
    );
    assert_eq!(
        fold_event(&json!(["tick", null, [1, 2]])).unwrap(),
        r#"{"event":"tick","args":[null,[1,2]]}"#
    );
}

#[test]
fn malformed_event_payloads_are_protocol_errors() {
    for bad in [json!({}), json!([]), json!([7, "x"]), json!("message")] {
        assert!(
            matches!(fold_event(&bad), Err(LinkError::Protocol(_))),
            "{bad}"
        );
    }
}

// ═══════════════════════════════════════════════════════════════════
// Settings files
// ═══════════════════════════════════════════════════════════════════

#[test]
fn settings_load_from_toml() {
    let settings: Settings = toml::from_str(
        r#"
        serverUrl = "wss://relay.example.org/feed"
        autoReconnect = false
        reconnectDelay = 90000
        "#,
    )
    .unwrap();
    assert_eq!(settings.server_url, "wss://relay.example.org/feed");
    assert!(!settings.auto_reconnect);
    // Stored as written, clamped when read.
    assert_eq!(settings.reconnect_delay().as_millis(), 60_000);
}

#[test]
fn partial_settings_fall_back_to_defaults() {
    let settings: Settings = toml::from_str(r#"serverUrl = "ws://x""#).unwrap();
    assert!(settings.auto_reconnect);
    assert_eq!(settings.reconnect_delay().as_millis(), 1500);

    let settings = Settings::from_json("{}").unwrap();
    assert_eq!(settings.server_url, "");
}

#[test]
fn settings_json_round_trip_keeps_key_names() {
    let json = Settings::new("ws://x").to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["serverUrl"], "ws://x");
    assert_eq!(value["autoReconnect"], true);
    assert_eq!(value["reconnectDelay"], 1500);
}

// ═══════════════════════════════════════════════════════════════════
// Classification and close codes
// ═══════════════════════════════════════════════════════════════════

#[test]
fn classification_table() {
    let cases = [
        ("ws://host/x", TransportKind::LineSocket),
        ("wss://host:443/feed", TransportKind::LineSocket),
        ("https://host", TransportKind::EventSocket),
        ("http://10.0.0.1:3000", TransportKind::EventSocket),
        ("wss://host/socket.io/", TransportKind::EventSocket),
        ("WS://HOST/Socket.IO", TransportKind::EventSocket),
        ("not a url", TransportKind::LineSocket),
        ("", TransportKind::LineSocket),
    ];
    for (target, expected) in cases {
        assert_eq!(classify(target), expected, "{target}");
        assert_eq!(classify(target), classify(target));
    }
}

#[test]
fn close_info_serializes_numeric_code() {
    let info = CloseInfo::new(CloseCode::GoingAway, "restart");
    assert_eq!(
        serde_json::to_value(&info).unwrap(),
        json!({"code": 1001, "reason": "restart"})
    );
    assert_eq!(info.close_code(), CloseCode::GoingAway);
    assert!(CloseInfo::normal("").close_code().is_clean());
    assert!(!CloseInfo::abnormal("").close_code().is_clean());
}
