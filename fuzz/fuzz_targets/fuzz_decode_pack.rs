#![no_main]

use libfuzzer_sys::fuzz_target;
use packdag::pack::Pack;

fuzz_target!(|data: &[u8]| {
    // Packs arrive from peers as raw bytes. A successful decode must keep the
    // exact input as the pack's bytes, and signature checks must not panic.
    if let Ok(pack) = Pack::decode(data) {
        assert_eq!(pack.bytes(), data);
        let _ = pack.verify_signature(&[2u8; 33]);
        let _ = pack.display();
    }
});
