#![no_main]

use libfuzzer_sys::fuzz_target;

use libreseed::core::codec::decode_limited;
use libreseed::core::records::announce::{Announce, SeederStatus};
use libreseed::core::records::index::NameIndex;
use libreseed::core::records::manifest::{FullManifest, MinimalManifest};

// Untrusted bytes off the DHT must never panic a validator.
fuzz_target!(|data: &[u8]| {
    if let Ok(record) = decode_limited::<MinimalManifest>(data, 8192) {
        let _ = record.validate();
    }
    if let Ok(record) = decode_limited::<FullManifest>(data, 8192) {
        let _ = record.validate_structure();
        let _ = record.compute_content_hash();
    }
    if let Ok(mut record) = decode_limited::<NameIndex>(data, 8192) {
        let _ = record.validate();
        let _ = record.retain_verified();
    }
    if let Ok(record) = decode_limited::<Announce>(data, 8192) {
        let _ = record.validate();
    }
    if let Ok(record) = decode_limited::<SeederStatus>(data, 8192) {
        let _ = record.validate();
    }
});
