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

//! MinimalManifest (the per-version DHT record) and FullManifest (the
//! in-tarball document). Field declaration order is the wire order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::codec::{canonical_bytes, CodecError};
use crate::core::records::{sha256, RecordError};
use crate::core::security::keystore::verify_detached;
use crate::core::types::{
    name_is_valid, version_is_valid, ContentHash, InfoHash, PubKey, SigBytes, PROTOCOL,
};

/// Authoritative per-version DHT record mapping `name@version` to an infohash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimalManifest {
    /// Protocol generation tag.
    pub protocol: String,
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// SHA-256 of the tarball bytes, 64 lowercase hex chars.
    pub infohash: String,
    /// Publisher public key, `ed25519:<hex>`.
    pub pubkey: String,
    /// Signature over the canonical bytes of all other fields.
    pub signature: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl MinimalManifest {
    /// Field presence, bounds, and wire-form checks.
    pub fn validate_structure(&self) -> Result<(), RecordError> {
        if !name_is_valid(&self.name) {
            return Err(RecordError::BadName);
        }
        if !version_is_valid(&self.version) {
            return Err(RecordError::BadVersion);
        }
        InfoHash::from_hex(&self.infohash).map_err(|_| RecordError::BadInfohash)?;
        PubKey::from_wire(&self.pubkey).map_err(|_| RecordError::BadPubkey)?;
        SigBytes::from_wire(&self.signature).map_err(|_| RecordError::BadSignatureEncoding)?;
        Ok(())
    }

    /// Protocol tag and timestamp checks.
    pub fn validate_semantics(&self) -> Result<(), RecordError> {
        if self.protocol != PROTOCOL {
            return Err(RecordError::BadProtocol);
        }
        if self.timestamp == 0 {
            return Err(RecordError::BadTimestamp);
        }
        Ok(())
    }

    /// Structural then semantic validation.
    pub fn validate(&self) -> Result<(), RecordError> {
        self.validate_structure()?;
        self.validate_semantics()
    }

    /// Canonical bytes signed by the publisher (signature field absent).
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CodecError> {
        canonical_bytes(self, &["signature"])
    }

    /// Verify the signature under the record's own pubkey.
    pub fn verify(&self) -> Result<(), RecordError> {
        let pk = PubKey::from_wire(&self.pubkey).map_err(|_| RecordError::BadPubkey)?;
        let sig =
            SigBytes::from_wire(&self.signature).map_err(|_| RecordError::BadSignatureEncoding)?;
        let msg = self.signing_bytes()?;
        if verify_detached(&pk, &msg, &sig) {
            Ok(())
        } else {
            Err(RecordError::SignatureInvalid)
        }
    }

    /// Parsed publisher key. Structural validation must have passed.
    pub fn pubkey(&self) -> Result<PubKey, RecordError> {
        PubKey::from_wire(&self.pubkey).map_err(|_| RecordError::BadPubkey)
    }

    /// Parsed infohash. Structural validation must have passed.
    pub fn infohash(&self) -> Result<InfoHash, RecordError> {
        InfoHash::from_hex(&self.infohash).map_err(|_| RecordError::BadInfohash)
    }
}

/// In-tarball manifest mapping every file path to its hash.
///
/// Embedded as `manifest.json` at the archive root; never published
/// standalone to the DHT.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullManifest {
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional author string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Relative POSIX path -> `sha256:<hex>`, sorted ascending by path.
    pub files: BTreeMap<String, String>,
    /// SHA-256 over the concatenated raw file hashes in path order.
    #[serde(rename = "contentHash")]
    pub content_hash: String,
    /// Publisher public key, `ed25519:<hex>`.
    #[serde(rename = "pubKey")]
    pub pub_key: String,
    /// Signature over the raw 32 contentHash bytes.
    pub signature: String,
}

/// Reserved archive entry name for the manifest itself.
pub const MANIFEST_ENTRY: &str = "manifest.json";

fn path_is_relative_posix(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains('\0') {
        return false;
    }
    path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

impl FullManifest {
    /// Field presence, bounds, and wire-form checks.
    pub fn validate_structure(&self) -> Result<(), RecordError> {
        if !name_is_valid(&self.name) {
            return Err(RecordError::BadName);
        }
        if !version_is_valid(&self.version) {
            return Err(RecordError::BadVersion);
        }
        for (path, hash) in &self.files {
            if !path_is_relative_posix(path) || path == MANIFEST_ENTRY {
                return Err(RecordError::BadPath);
            }
            ContentHash::from_wire(hash).map_err(|_| RecordError::BadHash)?;
        }
        ContentHash::from_wire(&self.content_hash).map_err(|_| RecordError::BadHash)?;
        PubKey::from_wire(&self.pub_key).map_err(|_| RecordError::BadPubkey)?;
        SigBytes::from_wire(&self.signature).map_err(|_| RecordError::BadSignatureEncoding)?;
        Ok(())
    }

    /// Recompute the content hash from the file map.
    ///
    /// Concatenates the raw 32-byte digests in ascending lexicographic path
    /// order (the map's iteration order) and hashes the concatenation.
    pub fn compute_content_hash(&self) -> Result<ContentHash, RecordError> {
        let mut concat = Vec::with_capacity(self.files.len() * 32);
        for hash in self.files.values() {
            let h = ContentHash::from_wire(hash).map_err(|_| RecordError::BadHash)?;
            concat.extend_from_slice(h.as_bytes());
        }
        Ok(ContentHash::from_bytes(sha256(&concat)))
    }

    /// Verify the signature over the raw contentHash bytes.
    pub fn verify(&self) -> Result<(), RecordError> {
        let pk = PubKey::from_wire(&self.pub_key).map_err(|_| RecordError::BadPubkey)?;
        let sig =
            SigBytes::from_wire(&self.signature).map_err(|_| RecordError::BadSignatureEncoding)?;
        let hash = ContentHash::from_wire(&self.content_hash).map_err(|_| RecordError::BadHash)?;
        if verify_detached(&pk, hash.as_bytes(), &sig) {
            Ok(())
        } else {
            Err(RecordError::SignatureInvalid)
        }
    }

    /// Parsed publisher key. Structural validation must have passed.
    pub fn pub_key(&self) -> Result<PubKey, RecordError> {
        PubKey::from_wire(&self.pub_key).map_err(|_| RecordError::BadPubkey)
    }
}
