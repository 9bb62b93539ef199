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

//! Announce (a publisher's table of contents) and SeederStatus (seeder
//! liveness and capacity).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::core::codec::{canonical_bytes, CodecError};
use crate::core::records::{sha256, RecordError};
use crate::core::security::keystore::verify_detached;
use crate::core::types::{name_is_valid, version_is_valid, PubKey, SigBytes, PROTOCOL};

/// Current Announce format version.
pub const ANNOUNCE_VERSION: u32 = 1;

/// One published version inside an [`Announce`] package entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Version string.
    pub version: String,
    /// Lowercase-hex DHT key of the corresponding MinimalManifest.
    #[serde(rename = "manifestKey")]
    pub manifest_key: String,
    /// Millisecond timestamp of the version's publication.
    pub timestamp: u64,
}

/// One package inside an [`Announce`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Package name.
    pub name: String,
    /// Highest published version by semver.
    #[serde(rename = "latestVersion")]
    pub latest_version: String,
    /// All published versions.
    pub versions: Vec<VersionEntry>,
}

/// Per-publisher signed DHT record enumerating all their packages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    /// Protocol generation tag.
    pub protocol: String,
    /// Announce format version.
    #[serde(rename = "announceVersion")]
    pub announce_version: u32,
    /// Publisher public key, `ed25519:<hex>`.
    pub pubkey: String,
    /// Millisecond timestamp of the most recent amendment.
    pub timestamp: u64,
    /// Published packages.
    pub packages: Vec<PackageEntry>,
    /// Signature over the canonical bytes of all other fields.
    pub signature: String,
}

impl Announce {
    /// Field presence, bounds, and wire-form checks.
    pub fn validate_structure(&self) -> Result<(), RecordError> {
        PubKey::from_wire(&self.pubkey).map_err(|_| RecordError::BadPubkey)?;
        SigBytes::from_wire(&self.signature).map_err(|_| RecordError::BadSignatureEncoding)?;
        for pkg in &self.packages {
            if !name_is_valid(&pkg.name) {
                return Err(RecordError::BadName);
            }
            if !version_is_valid(&pkg.latest_version) {
                return Err(RecordError::BadVersion);
            }
            if pkg.versions.is_empty() {
                return Err(RecordError::EmptyVersions);
            }
            for v in &pkg.versions {
                if !version_is_valid(&v.version) {
                    return Err(RecordError::BadVersion);
                }
                if v.manifest_key.len() != 64 || hex::decode(&v.manifest_key).is_err() {
                    return Err(RecordError::BadHash);
                }
                if v.timestamp == 0 {
                    return Err(RecordError::BadTimestamp);
                }
            }
        }
        Ok(())
    }

    /// Protocol tag, record version, and timestamp checks.
    pub fn validate_semantics(&self) -> Result<(), RecordError> {
        if self.protocol != PROTOCOL {
            return Err(RecordError::BadProtocol);
        }
        if self.announce_version != ANNOUNCE_VERSION {
            return Err(RecordError::UnsupportedVersion);
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
}

/// Upload/download rates reported by the seeding engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthStats {
    /// Bytes uploaded per second, averaged over the reporting window.
    #[serde(rename = "uploadBytesPerSec")]
    pub upload_bytes_per_sec: u64,
    /// Bytes downloaded per second, averaged over the reporting window.
    #[serde(rename = "downloadBytesPerSec")]
    pub download_bytes_per_sec: u64,
}

/// Derive the seeder ID for a public key: base64(SHA-256(pubkey bytes)).
pub fn seeder_id_for(pubkey: &PubKey) -> String {
    BASE64.encode(sha256(pubkey.as_bytes()))
}

/// Seeder liveness and capacity record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeederStatus {
    /// Protocol generation tag.
    pub protocol: String,
    /// base64(SHA-256(pubkey bytes)).
    #[serde(rename = "seederID")]
    pub seeder_id: String,
    /// Seeder public key, `ed25519:<hex>`.
    pub pubkey: String,
    /// Millisecond timestamp of this status snapshot.
    pub timestamp: u64,
    /// Currently seeded packages as `name@version`.
    #[serde(rename = "seededPackages")]
    pub seeded_packages: Vec<String>,
    /// Seconds since the seeder process started.
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: u64,
    /// Bytes of tarball data held on disk.
    #[serde(rename = "diskUsageBytes")]
    pub disk_usage_bytes: u64,
    /// Engine-reported transfer rates.
    #[serde(rename = "bandwidthStats")]
    pub bandwidth_stats: BandwidthStats,
    /// Signature over the canonical bytes of all other fields.
    pub signature: String,
}

fn package_ref_is_valid(s: &str) -> bool {
    match s.split_once('@') {
        Some((name, version)) => name_is_valid(name) && version_is_valid(version),
        None => false,
    }
}

impl SeederStatus {
    /// Field presence, bounds, and wire-form checks.
    pub fn validate_structure(&self) -> Result<(), RecordError> {
        let pk = PubKey::from_wire(&self.pubkey).map_err(|_| RecordError::BadPubkey)?;
        if self.seeder_id != seeder_id_for(&pk) {
            return Err(RecordError::BadSeederId);
        }
        for pkg in &self.seeded_packages {
            if !package_ref_is_valid(pkg) {
                return Err(RecordError::BadPackageRef);
            }
        }
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

    /// Canonical bytes signed by the seeder (signature field absent).
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

    /// Whether this seeder currently announces any version of `name`.
    pub fn seeds_name(&self, name: &str) -> bool {
        self.seeded_packages
            .iter()
            .any(|p| p.split_once('@').map(|(n, _)| n == name).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeder_id_is_base64_of_key_digest() {
        let pk = PubKey::from_bytes([9u8; 32]);
        let id = seeder_id_for(&pk);
        let raw = BASE64.decode(&id).unwrap();
        assert_eq!(raw.len(), 32);
        assert_eq!(raw, sha256(pk.as_bytes()));
    }

    #[test]
    fn package_refs_are_checked() {
        assert!(package_ref_is_valid("pkg@1.0.0"));
        assert!(!package_ref_is_valid("pkg"));
        assert!(!package_ref_is_valid("@1.0.0"));
        assert!(!package_ref_is_valid("pkg@not-a-version"));
    }

    #[test]
    fn announce_rejects_empty_version_list() {
        let a = Announce {
            protocol: PROTOCOL.to_string(),
            announce_version: ANNOUNCE_VERSION,
            pubkey: format!("ed25519:{}", "cd".repeat(32)),
            timestamp: 1,
            packages: vec![PackageEntry {
                name: "pkg".to_string(),
                latest_version: "1.0.0".to_string(),
                versions: vec![],
            }],
            signature: format!("ed25519:{}", "ef".repeat(64)),
        };
        assert_eq!(a.validate(), Err(RecordError::EmptyVersions));
    }
}
