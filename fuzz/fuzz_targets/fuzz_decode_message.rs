#![no_main]

use credwire::protocol::postgres::{check_length, decode_body, decode_startup};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = decode_startup(data);

    // Several messages may arrive in one segment.
    let mut rest = data;
    while rest.len() >= 5 {
        let tag = rest[0];
        let len = match check_length(i32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]])) {
            Ok(len) => len,
            Err(_) => break,
        };
        let Some(body) = rest.get(5..len + 1) else {
            break;
        };
        let _ = decode_body(tag, body);
        rest = &rest[len + 1..];
    }
});
