// Copyright (c) 2026 LibreSeed
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Codec and signing laws: canonical idempotence, exclusion semantics, and
//! bit-flip sensitivity of signatures.

use proptest::prelude::*;

use libreseed::core::codec::{canonical_bytes, decode_limited, wire_bytes};
use libreseed::core::records::manifest::MinimalManifest;
use libreseed::core::security::keystore::{verify_detached, Keystore};
use libreseed::core::types::PROTOCOL;

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,62}[a-z0-9]"
}

fn version_strategy() -> impl Strategy<Value = String> {
    (0u32..100, 0u32..100, 0u32..100).prop_map(|(a, b, c)| format!("{a}.{b}.{c}"))
}

fn minimal_strategy() -> impl Strategy<Value = MinimalManifest> {
    (
        name_strategy(),
        version_strategy(),
        prop::array::uniform32(any::<u8>()),
        prop::array::uniform32(any::<u8>()),
        prop::collection::vec(any::<u8>(), 64),
        1u64..=u64::MAX / 2,
    )
        .prop_map(|(name, version, infohash, pubkey, sig, timestamp)| MinimalManifest {
            protocol: PROTOCOL.to_string(),
            name,
            version,
            infohash: hex::encode(infohash),
            pubkey: format!("ed25519:{}", hex::encode(pubkey)),
            signature: format!("ed25519:{}", hex::encode(&sig)),
            timestamp,
        })
}

proptest! {
    #[test]
    fn canonical_is_idempotent(record in minimal_strategy()) {
        let first = wire_bytes(&record).unwrap();
        let parsed: MinimalManifest = decode_limited(&first, 16 * 1024).unwrap();
        let second = wire_bytes(&parsed).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn signing_bytes_never_contain_the_signature(record in minimal_strategy()) {
        let bytes = canonical_bytes(&record, &["signature"]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        prop_assert!(!text.contains("\"signature\":"));
        // and the exclusion is the only difference in the field set
        let full = String::from_utf8(wire_bytes(&record).unwrap()).unwrap();
        prop_assert!(full.contains("\"signature\":"));
    }

    #[test]
    fn structural_validation_accepts_generated_records(record in minimal_strategy()) {
        prop_assert!(record.validate().is_ok());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_flipped_bit_breaks_verification(
        msg in prop::collection::vec(any::<u8>(), 1..256),
        flip_byte in any::<prop::sample::Index>(),
        flip_bit in 0u8..8,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        let handle = keystore.generate().unwrap();
        let sig = keystore.sign(&handle, &msg).unwrap();
        prop_assert!(verify_detached(&handle.public_key(), &msg, &sig));

        let mut tampered = msg.clone();
        let idx = flip_byte.index(tampered.len());
        tampered[idx] ^= 1 << flip_bit;
        prop_assert!(!verify_detached(&handle.public_key(), &tampered, &sig));
    }
}
