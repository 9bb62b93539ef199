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

//! Typed DHT records with structural and semantic validators.
//!
//! Validators never perform I/O and never verify signatures; each record type
//! exposes a separate `verify` so callers can pre-filter malformed records
//! cheaply before paying for EC work.

/// Announce and SeederStatus records.
pub mod announce;
/// PublisherEntry and NameIndex records.
pub mod index;
/// MinimalManifest and FullManifest records.
pub mod manifest;

use ring::digest;
use thiserror::Error;

use crate::core::codec::CodecError;

/// Record validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// Name empty or over 64 bytes.
    #[error("bad name")]
    BadName,
    /// Version fails the shape check or exceeds 32 bytes.
    #[error("bad version")]
    BadVersion,
    /// Infohash is not exactly 64 lowercase hex characters.
    #[error("bad infohash")]
    BadInfohash,
    /// Public key fails the `ed25519:` wire form.
    #[error("bad pubkey")]
    BadPubkey,
    /// Signature fails the `ed25519:` wire form.
    #[error("bad signature encoding")]
    BadSignatureEncoding,
    /// Content hash fails the `sha256:` wire form.
    #[error("bad hash")]
    BadHash,
    /// File path is not a relative POSIX path inside the archive.
    #[error("bad file path")]
    BadPath,
    /// Protocol tag does not match this generation.
    #[error("protocol mismatch")]
    BadProtocol,
    /// Record version field is unsupported.
    #[error("unsupported record version")]
    UnsupportedVersion,
    /// Timestamp is zero or missing.
    #[error("bad timestamp")]
    BadTimestamp,
    /// Publisher list is empty.
    #[error("empty publishers")]
    EmptyPublishers,
    /// Two publisher entries share a pubkey.
    #[error("duplicate publisher")]
    DuplicatePublisher,
    /// Version list inside an announce package is empty.
    #[error("empty versions")]
    EmptyVersions,
    /// Seeder ID is not base64(SHA-256(pubkey)).
    #[error("bad seeder id")]
    BadSeederId,
    /// Seeded package reference is not `name@version`.
    #[error("bad package ref")]
    BadPackageRef,
    /// Signature does not verify under the record's pubkey.
    #[error("signature invalid")]
    SignatureInvalid,
    /// Canonical codec failure.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
}

/// SHA-256 digest helper shared by the record family.
pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    let d = digest::digest(&digest::SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}
