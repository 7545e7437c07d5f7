#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_client::protocol::{fold_event, EnginePacket, SocketPacket};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Engine.IO layer, then the Socket.IO packet inside a message.
    if let Ok(EnginePacket::Message(body)) = EnginePacket::decode(text) {
        if let Ok(packet) = SocketPacket::decode(&body) {
            // Whatever decodes must encode again without panicking.
            let _ = packet.encode();
            if let SocketPacket::Event { data, .. } = &packet {
                let _ = fold_event(data);
            }
        }
    }

    // Socket.IO decoding on raw input as well.
    let _ = SocketPacket::decode(text);

    // Folding arbitrary JSON values.
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        let _ = fold_event(&value);
    }
});
