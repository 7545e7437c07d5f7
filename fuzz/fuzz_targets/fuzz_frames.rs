#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_client::router::Frame;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);

    // Parsing a frame and formatting it again must reproduce the input.
    let frame = Frame::parse(&text);
    assert_eq!(frame.to_string(), text);

    let _ = tether_client::classify(&text);
});
