#![no_main]

use libfuzzer_sys::fuzz_target;

use libreseed::core::codec::{decode_limited, wire_bytes};
use libreseed::core::records::manifest::MinimalManifest;

// canonical(parse(canonical(R))) == canonical(R), byte for byte.
fuzz_target!(|data: &[u8]| {
    let Ok(record) = decode_limited::<MinimalManifest>(data, 8192) else {
        return;
    };
    let Ok(first) = wire_bytes(&record) else { return };
    let reparsed: MinimalManifest =
        decode_limited(&first, 16 * 1024).expect("canonical bytes must reparse");
    let second = wire_bytes(&reparsed).expect("reparse must re-encode");
    assert_eq!(first, second);
});
