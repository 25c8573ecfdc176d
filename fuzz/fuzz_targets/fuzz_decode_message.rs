#![no_main]

use libfuzzer_sys::fuzz_target;
use packdag::network::decode_message;

fuzz_target!(|data: &[u8]| {
    // A length-prefixed bincode frame carrying a pack, a pack request or a
    // response. Anything undecodable must come back as an error.
    let _ = decode_message(data);
});
