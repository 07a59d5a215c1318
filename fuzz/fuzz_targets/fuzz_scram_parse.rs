#![no_main]

use credwire::auth::scram::parse_server_first;
use credwire::auth::{ChannelBinding, ScramClient};
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;

#[derive(Debug)]
struct ScramInput {
    username: String,
    password: Vec<u8>,
    server_first: String,
    server_final: String,
}

impl<'a> Arbitrary<'a> for ScramInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            username: u.arbitrary()?,
            password: u.arbitrary()?,
            server_first: u.arbitrary()?,
            server_final: u.arbitrary()?,
        })
    }
}

fuzz_target!(|input: ScramInput| {
    let _ = parse_server_first(&input.server_first);

    let client = ScramClient::new(&input.username, &input.password, ChannelBinding::Unsupported);
    let _first = client.client_first();

    // Keep iteration counts from the fuzzer small enough to finish.
    if let Ok((_, _, iterations)) = parse_server_first(&input.server_first) {
        if iterations.parse::<u32>().map_or(true, |i| i > 4096) {
            return;
        }
    }
    if let Ok((_, state)) = client.client_final(&input.server_first) {
        let _ = client.verify_server_final(&input.server_final, &state);
    }
});
