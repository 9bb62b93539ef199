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

//! Shared protocol primitives: wire encodings, version rules, size caps,
//! and the layered node configuration.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Protocol generation tag carried by every DHT record.
pub const PROTOCOL: &str = "libreseed/v1";

/// Maximum package name length in bytes.
pub const MAX_NAME_BYTES: usize = 64;
/// Maximum version string length in bytes.
pub const MAX_VERSION_BYTES: usize = 32;
/// Exact infohash length in lowercase hex characters.
pub const INFOHASH_HEX_LEN: usize = 64;

const ED25519_PREFIX: &str = "ed25519:";
const SHA256_PREFIX: &str = "sha256:";

/// Wire-form decoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Missing or wrong ASCII prefix.
    #[error("bad prefix")]
    BadPrefix,
    /// Payload is not lowercase hex.
    #[error("bad hex")]
    BadHex,
    /// Decoded payload has the wrong length.
    #[error("bad length")]
    BadLength,
}

fn decode_lower_hex(s: &str, expected: usize) -> Result<Vec<u8>, WireError> {
    if s.len() != expected * 2 {
        return Err(WireError::BadLength);
    }
    if s.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(WireError::BadHex);
    }
    let bytes = hex::decode(s).map_err(|_| WireError::BadHex)?;
    Ok(bytes)
}

/// Ed25519 public key (32 bytes). Wire form is `ed25519:<lowercase hex>`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubKey([u8; 32]);

impl PubKey {
    /// Construct from raw bytes.
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Render the wire form.
    pub fn to_wire(&self) -> String {
        format!("{}{}", ED25519_PREFIX, hex::encode(self.0))
    }

    /// Parse the wire form.
    pub fn from_wire(s: &str) -> Result<Self, WireError> {
        let hex_part = s.strip_prefix(ED25519_PREFIX).ok_or(WireError::BadPrefix)?;
        let bytes = decode_lower_hex(hex_part, 32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Ed25519 signature (64 bytes). Wire form is `ed25519:<lowercase hex>`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SigBytes([u8; 64]);

impl SigBytes {
    /// Construct from raw bytes.
    pub fn from_bytes(b: [u8; 64]) -> Self {
        Self(b)
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Render the wire form.
    pub fn to_wire(&self) -> String {
        format!("{}{}", ED25519_PREFIX, hex::encode(self.0))
    }

    /// Parse the wire form.
    pub fn from_wire(s: &str) -> Result<Self, WireError> {
        let hex_part = s.strip_prefix(ED25519_PREFIX).ok_or(WireError::BadPrefix)?;
        let bytes = decode_lower_hex(hex_part, 64)?;
        let mut out = [0u8; 64];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Debug for SigBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigBytes({})", hex::encode(self.0))
    }
}

/// SHA-256 content hash (32 bytes). Wire form is `sha256:<lowercase hex>`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Construct from raw digest bytes.
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Render the wire form.
    pub fn to_wire(&self) -> String {
        format!("{}{}", SHA256_PREFIX, hex::encode(self.0))
    }

    /// Parse the wire form.
    pub fn from_wire(s: &str) -> Result<Self, WireError> {
        let hex_part = s.strip_prefix(SHA256_PREFIX).ok_or(WireError::BadPrefix)?;
        let bytes = decode_lower_hex(hex_part, 32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", hex::encode(self.0))
    }
}

/// Tarball infohash: SHA-256 of the whole file, rendered as 64 lowercase hex
/// characters without a prefix.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash([u8; 32]);

impl InfoHash {
    /// Construct from raw digest bytes.
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Render as 64 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 lowercase hex characters.
    pub fn from_hex(s: &str) -> Result<Self, WireError> {
        let bytes = decode_lower_hex(s, 32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v?\d+\.\d+\.\d+(-[A-Za-z0-9.-]+)?(\+[A-Za-z0-9.-]+)?$").expect("version regex")
});

/// Check a version string against the protocol shape and size cap.
pub fn version_is_valid(v: &str) -> bool {
    v.len() <= MAX_VERSION_BYTES && VERSION_RE.is_match(v)
}

/// Parse a protocol version string into an orderable [`semver::Version`].
/// The optional leading `v` is stripped before parsing.
pub fn parse_version(v: &str) -> Option<semver::Version> {
    if !version_is_valid(v) {
        return None;
    }
    semver::Version::parse(v.strip_prefix('v').unwrap_or(v)).ok()
}

/// Check a package name against the protocol bounds.
pub fn name_is_valid(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_BYTES
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Publisher selection policy for multi-publisher name resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicySelection {
    /// Earliest `firstSeen` wins; ties broken by lexicographic pubkey.
    #[default]
    FirstSeen,
    /// Highest semver `latestVersion` wins; ties broken by min `firstSeen`.
    LatestVersion,
    /// First publisher whose pubkey is in the trust list; falls back to first-seen.
    UserTrust,
    /// Most live seeders announcing the name; ties broken by first-seen.
    SeederCount,
}

/// Node configuration root.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Node settings.
    #[serde(default)]
    pub node: NodeSettings,
    /// Resolution policy settings.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Record TTLs.
    #[serde(default)]
    pub ttl: TtlConfig,
    /// Republish intervals.
    #[serde(default)]
    pub republish: RepublishConfig,
    /// Protocol limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// DHT store tunables.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Node settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Data directory (keys, registry state, replica cache).
    pub data_dir: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self { data_dir: "./data".to_string() }
    }
}

/// Resolution policy configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Active selection policy.
    #[serde(default)]
    pub selection: PolicySelection,
    /// Trusted publisher pubkeys (wire form) for `user-trust`.
    #[serde(default)]
    pub trust_list: Vec<String>,
    /// Known seeder IDs polled for `seeder-count`.
    #[serde(default)]
    pub seeder_ids: Vec<String>,
}

/// Record TTLs in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TtlConfig {
    /// MinimalManifest TTL.
    pub manifest_ms: u64,
    /// NameIndex TTL.
    pub name_index_ms: u64,
    /// Announce TTL.
    pub announce_ms: u64,
    /// SeederStatus TTL.
    pub seeder_status_ms: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            manifest_ms: 24 * 60 * 60 * 1000,
            name_index_ms: 24 * 60 * 60 * 1000,
            announce_ms: 24 * 60 * 60 * 1000,
            seeder_status_ms: 60 * 60 * 1000,
        }
    }
}

/// Republish intervals in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepublishConfig {
    /// Interval for MinimalManifest, NameIndex, and Announce refreshes.
    pub manifest_interval_ms: u64,
    /// Interval for SeederStatus refreshes.
    pub seeder_interval_ms: u64,
    /// Exponential backoff cap for failed republishes.
    pub backoff_cap_ms: u64,
}

impl Default for RepublishConfig {
    fn default() -> Self {
        Self {
            manifest_interval_ms: 15 * 60 * 1000,
            seeder_interval_ms: 5 * 60 * 1000,
            backoff_cap_ms: 60 * 60 * 1000,
        }
    }
}

/// Protocol limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Soft cap on NameIndex publisher entries.
    pub name_index_publishers: usize,
    /// Hard cap on a serialized DHT record.
    pub record_max_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { name_index_publishers: 300, record_max_bytes: 8 * 1024 }
    }
}

/// DHT store tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Per-attempt `get` timeout.
    pub get_timeout_ms: u64,
    /// `put` timeout.
    pub put_timeout_ms: u64,
    /// Parallel replica queries per `get`.
    pub replica_queries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { get_timeout_ms: 10_000, put_timeout_ms: 20_000, replica_queries: 3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkey_wire_roundtrip() {
        let pk = PubKey::from_bytes([7u8; 32]);
        let wire = pk.to_wire();
        assert!(wire.starts_with("ed25519:"));
        assert_eq!(PubKey::from_wire(&wire).unwrap(), pk);
    }

    #[test]
    fn pubkey_rejects_uppercase_and_bad_len() {
        let upper = format!("ed25519:{}", "AB".repeat(32));
        assert_eq!(PubKey::from_wire(&upper), Err(WireError::BadHex));
        let short = format!("ed25519:{}", "ab".repeat(31));
        assert_eq!(PubKey::from_wire(&short), Err(WireError::BadLength));
        assert_eq!(PubKey::from_wire("deadbeef"), Err(WireError::BadPrefix));
    }

    #[test]
    fn infohash_length_is_exact() {
        let h64 = "ab".repeat(32);
        assert!(InfoHash::from_hex(&h64).is_ok());
        assert!(InfoHash::from_hex(&h64[..63]).is_err());
        assert!(InfoHash::from_hex(&format!("{h64}a")).is_err());
    }

    #[test]
    fn version_shapes() {
        assert!(version_is_valid("1.0.0"));
        assert!(version_is_valid("v2.3.4-rc.1+build.5"));
        assert!(!version_is_valid("1.0"));
        assert!(!version_is_valid("1.0.0 "));
        // exactly 32 bytes is in, 33 is out
        assert!(version_is_valid(&format!("1.0.0-{}", "a".repeat(26))));
        assert!(!version_is_valid(&format!("1.0.0-{}", "a".repeat(27))));
        assert!(parse_version("v1.2.3").unwrap() < parse_version("1.10.0").unwrap());
    }
}
