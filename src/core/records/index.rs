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

//! NameIndex: the multi-publisher DHT record for one package name.
//!
//! The index is collaboratively built. Any publisher may append their own
//! entry, so the enclosing record carries no signature of its own; each
//! [`PublisherEntry`] self-verifies and is trusted exactly that far. The
//! publisher set behaves as a grow-only set keyed by pubkey: "updating" an
//! entry is replacement with a newer signed entry timestamp, and `firstSeen`
//! is pinned at first insertion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::codec::{canonical_bytes, CodecError};
use crate::core::records::RecordError;
use crate::core::security::keystore::verify_detached;
use crate::core::types::{name_is_valid, version_is_valid, PubKey, SigBytes, PROTOCOL};

/// Current NameIndex format version.
pub const INDEX_VERSION: u32 = 1;

/// One publisher's row in a NameIndex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherEntry {
    /// Publisher public key, `ed25519:<hex>`.
    pub pubkey: String,
    /// Latest version this publisher offers for the name.
    #[serde(rename = "latestVersion")]
    pub latest_version: String,
    /// Millisecond timestamp of this publisher's first insertion; immutable.
    #[serde(rename = "firstSeen")]
    pub first_seen: u64,
    /// Parent index timestamp at this publisher's most recent write.
    pub timestamp: u64,
    /// Signature over canonical bytes of (name, latestVersion, firstSeen, timestamp).
    pub signature: String,
}

/// Signed payload of a publisher entry. The package name is bound in so an
/// entry cannot be replayed into a different index.
#[derive(Serialize)]
struct EntrySigning<'a> {
    name: &'a str,
    #[serde(rename = "latestVersion")]
    latest_version: &'a str,
    #[serde(rename = "firstSeen")]
    first_seen: u64,
    timestamp: u64,
}

impl PublisherEntry {
    /// Field presence, bounds, and wire-form checks.
    pub fn validate_structure(&self) -> Result<(), RecordError> {
        PubKey::from_wire(&self.pubkey).map_err(|_| RecordError::BadPubkey)?;
        if !version_is_valid(&self.latest_version) {
            return Err(RecordError::BadVersion);
        }
        if self.first_seen == 0 || self.timestamp == 0 {
            return Err(RecordError::BadTimestamp);
        }
        SigBytes::from_wire(&self.signature).map_err(|_| RecordError::BadSignatureEncoding)?;
        Ok(())
    }

    /// Canonical bytes this entry signs, bound to the enclosing index name.
    pub fn signing_bytes(&self, name: &str) -> Result<Vec<u8>, CodecError> {
        canonical_bytes(
            &EntrySigning {
                name,
                latest_version: &self.latest_version,
                first_seen: self.first_seen,
                timestamp: self.timestamp,
            },
            &[],
        )
    }

    /// Verify the entry's signature under its own pubkey.
    pub fn verify(&self, name: &str) -> Result<(), RecordError> {
        let pk = PubKey::from_wire(&self.pubkey).map_err(|_| RecordError::BadPubkey)?;
        let sig =
            SigBytes::from_wire(&self.signature).map_err(|_| RecordError::BadSignatureEncoding)?;
        let msg = self.signing_bytes(name)?;
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
}

/// Multi-publisher DHT record listing every claimant of a package name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameIndex {
    /// Protocol generation tag.
    pub protocol: String,
    /// Index format version.
    #[serde(rename = "indexVersion")]
    pub index_version: u32,
    /// Package name.
    pub name: String,
    /// Self-signed publisher rows, pairwise-distinct pubkeys.
    pub publishers: Vec<PublisherEntry>,
    /// Millisecond timestamp of the most recent write.
    pub timestamp: u64,
}

impl NameIndex {
    /// Create a fresh index with a single publisher row.
    pub fn new(name: String, entry: PublisherEntry, timestamp: u64) -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            index_version: INDEX_VERSION,
            name,
            publishers: vec![entry],
            timestamp,
        }
    }

    /// Field presence, bounds, and wire-form checks, recursing into entries.
    pub fn validate_structure(&self) -> Result<(), RecordError> {
        if !name_is_valid(&self.name) {
            return Err(RecordError::BadName);
        }
        for entry in &self.publishers {
            entry.validate_structure()?;
        }
        Ok(())
    }

    /// Protocol tag, timestamp, non-empty publishers, distinct pubkeys.
    pub fn validate_semantics(&self) -> Result<(), RecordError> {
        if self.protocol != PROTOCOL {
            return Err(RecordError::BadProtocol);
        }
        if self.index_version != INDEX_VERSION {
            return Err(RecordError::UnsupportedVersion);
        }
        if self.timestamp == 0 {
            return Err(RecordError::BadTimestamp);
        }
        if self.publishers.is_empty() {
            return Err(RecordError::EmptyPublishers);
        }
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for entry in &self.publishers {
            if !seen.insert(entry.pubkey.as_str()) {
                return Err(RecordError::DuplicatePublisher);
            }
        }
        Ok(())
    }

    /// Structural then semantic validation.
    pub fn validate(&self) -> Result<(), RecordError> {
        self.validate_structure()?;
        self.validate_semantics()
    }

    /// Drop entries whose signatures do not verify.
    ///
    /// The enclosing index author is never trusted; only self-verifying rows
    /// survive a read. Returns the number of rows dropped.
    pub fn retain_verified(&mut self) -> usize {
        let name = self.name.clone();
        let before = self.publishers.len();
        self.publishers.retain(|e| e.verify(&name).is_ok());
        before - self.publishers.len()
    }

    /// Find the row for a pubkey, if present.
    pub fn entry_for(&self, pubkey: &str) -> Option<&PublisherEntry> {
        self.publishers.iter().find(|e| e.pubkey == pubkey)
    }
}
