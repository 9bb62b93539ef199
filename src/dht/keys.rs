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
#![warn(missing_docs)]

//! Well-known DHT key derivation.
//!
//! key = SHA-256("libreseed:<schema>:" + identifier)

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ring::digest;
use std::fmt;

use crate::core::types::PubKey;

const MANIFEST_PREFIX: &str = "libreseed:manifest:";
const NAME_INDEX_PREFIX: &str = "libreseed:name-index:";
const ANNOUNCE_PREFIX: &str = "libreseed:announce:";
const SEEDER_PREFIX: &str = "libreseed:seeder:";

/// 32-byte DHT key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DhtKey([u8; 32]);

impl DhtKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering, as referenced from Announce records.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for DhtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DhtKey({})", hex::encode(self.0))
    }
}

fn derive(prefix: &str, identifier: &str) -> DhtKey {
    let mut buf = Vec::with_capacity(prefix.len() + identifier.len());
    buf.extend_from_slice(prefix.as_bytes());
    buf.extend_from_slice(identifier.as_bytes());
    let d = digest::digest(&digest::SHA256, &buf);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    DhtKey(out)
}

/// Key of the MinimalManifest for `name@version`.
pub fn manifest_key(name: &str, version: &str) -> DhtKey {
    derive(MANIFEST_PREFIX, &format!("{name}@{version}"))
}

/// Key of the NameIndex for `name`.
pub fn name_index_key(name: &str) -> DhtKey {
    derive(NAME_INDEX_PREFIX, name)
}

/// Key of a publisher's Announce, addressed by base64 pubkey.
pub fn announce_key(pubkey: &PubKey) -> DhtKey {
    derive(ANNOUNCE_PREFIX, &BASE64.encode(pubkey.as_bytes()))
}

/// Key of a seeder's SeederStatus, addressed by seeder ID.
pub fn seeder_key(seeder_id: &str) -> DhtKey {
    derive(SEEDER_PREFIX, seeder_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_schema_separated() {
        // The same identifier under different schemas must never collide.
        assert_ne!(manifest_key("pkg", "1.0.0"), name_index_key("pkg@1.0.0"));
        assert_ne!(name_index_key("pkg"), seeder_key("pkg"));
    }

    #[test]
    fn manifest_key_is_stable() {
        let a = manifest_key("pkg", "1.0.0");
        let b = manifest_key("pkg", "1.0.0");
        assert_eq!(a, b);
        assert_ne!(a, manifest_key("pkg", "1.0.1"));
    }
}
