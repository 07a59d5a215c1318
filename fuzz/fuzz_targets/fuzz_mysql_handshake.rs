#![no_main]

use credwire::protocol::mysql::{
    AuthMoreData, AuthSwitchRequest, ErrPacket, HandshakeResponse41, HandshakeV10, OkPacket, Packet,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Packet::from_frame(data);

    let Ok(packet) = Packet::new(0, data) else {
        return;
    };

    if let Ok(greeting) = HandshakeV10::unpack(&packet) {
        let _ = greeting.for_client().pack();
    }
    if let Ok(mut response) = HandshakeResponse41::unpack(&packet) {
        let _ = response.ssl_request();
        response.inject_credentials("svc", vec![0x5A; 32], "caching_sha2_password");
        let _ = response.pack();
    }
    let _ = OkPacket::unpack(&packet);
    let _ = ErrPacket::unpack(&packet);
    let _ = AuthSwitchRequest::unpack(&packet);
    let _ = AuthMoreData::unpack(&packet);
});
