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
#![deny(missing_docs)]

//! Dual-manifest validation: the seven-step pipeline that binds a tarball to
//! its MinimalManifest before anything is seeded.
//!
//! The steps run in order and short-circuit; the first failure fixes the
//! rejection reason. The pipeline performs no network I/O and no DHT writes.
//!
//! 1. structural check of the MinimalManifest
//! 2. tarball SHA-256 equals the claimed infohash
//! 3. MinimalManifest signature verifies under its pubkey
//! 4. exactly one root-level `manifest.json` parses as a FullManifest
//! 5. minimal and full pubkeys match byte-for-byte
//! 6. recomputed contentHash equals the FullManifest's claim, and the
//!    archive's file entries equal the file map, hash for hash
//! 7. FullManifest signature verifies over the raw contentHash bytes

use std::collections::BTreeMap;
use std::path::Path;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::records::manifest::{FullManifest, MinimalManifest};
use crate::core::records::RecordError;
use crate::core::tarball::{self, TarballError};
use crate::core::types::{ContentHash, InfoHash, PubKey};

/// Rejection reasons, one set per pipeline step.
#[derive(Debug, Error)]
pub enum ValidateError {
    /// Step 1: the MinimalManifest fails structural or semantic validation.
    #[error("minimal manifest invalid: {0}")]
    MinimalInvalid(RecordError),
    /// Step 2: tarball bytes do not hash to the claimed infohash.
    #[error("infohash mismatch")]
    InfohashMismatch,
    /// Step 3: the MinimalManifest signature does not verify.
    #[error("minimal manifest signature invalid")]
    MinimalSignature,
    /// Step 4: no `manifest.json` at the archive root.
    #[error("full manifest missing")]
    FullManifestMissing,
    /// Step 4: more than one `manifest.json` entry.
    #[error("full manifest duplicated")]
    FullManifestDuplicated,
    /// Step 4: `manifest.json` is unparseable or structurally invalid.
    #[error("full manifest invalid")]
    FullManifestInvalid,
    /// Step 5: minimal and full manifests carry different pubkeys.
    #[error("pubkey mismatch between manifests")]
    PubkeyMismatch,
    /// Step 6: recomputed contentHash differs from the claim.
    #[error("content hash mismatch")]
    ContentHashMismatch,
    /// Step 6: the archive's file entries diverge from the manifest's file
    /// map (missing, extra, or wrongly-hashed entry).
    #[error("archive file set mismatch")]
    FileSetMismatch,
    /// Step 7: the FullManifest signature does not verify.
    #[error("full manifest signature invalid")]
    FullSignature,
    /// The tarball cannot be read.
    #[error("tarball io")]
    Io,
    /// The caller cancelled the pipeline. Not a failure.
    #[error("cancelled")]
    Cancelled,
}

/// Coarse classification used for quarantine and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectKind {
    /// Malformed record; never reached signing.
    Structural,
    /// A signature or key binding failed.
    Cryptographic,
    /// Content does not match its claimed hashes.
    Integrity,
    /// Local read failure.
    LocalIo,
    /// Cancelled by the caller.
    Cancelled,
}

impl ValidateError {
    /// Classify per the error taxonomy.
    pub fn kind(&self) -> RejectKind {
        match self {
            ValidateError::MinimalInvalid(_)
            | ValidateError::FullManifestInvalid
            | ValidateError::FullManifestDuplicated => RejectKind::Structural,
            ValidateError::MinimalSignature
            | ValidateError::PubkeyMismatch
            | ValidateError::FullSignature => RejectKind::Cryptographic,
            ValidateError::InfohashMismatch
            | ValidateError::FullManifestMissing
            | ValidateError::ContentHashMismatch
            | ValidateError::FileSetMismatch => RejectKind::Integrity,
            ValidateError::Io => RejectKind::LocalIo,
            ValidateError::Cancelled => RejectKind::Cancelled,
        }
    }
}

impl From<TarballError> for ValidateError {
    fn from(e: TarballError) -> Self {
        match e {
            TarballError::Io => ValidateError::Io,
            TarballError::BadArchive | TarballError::ManifestMalformed => {
                ValidateError::FullManifestInvalid
            }
            TarballError::ManifestMissing => ValidateError::FullManifestMissing,
            TarballError::ManifestDuplicated => ValidateError::FullManifestDuplicated,
            TarballError::Cancelled => ValidateError::Cancelled,
        }
    }
}

/// Output of a successful pipeline run.
#[derive(Clone, Debug)]
pub struct Validated {
    /// Verified tarball infohash.
    pub infohash: InfoHash,
    /// Publisher key both manifests agree on.
    pub pubkey: PubKey,
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
}

/// Run the seven-step pipeline over `(tarball, minimal)`.
pub async fn validate_package(
    tarball_path: &Path,
    minimal: &MinimalManifest,
    cancel: &CancellationToken,
) -> Result<Validated, ValidateError> {
    // 1. Structural check of the minimal record. No EC work yet.
    minimal.validate().map_err(ValidateError::MinimalInvalid)?;
    let claimed = minimal.infohash().map_err(ValidateError::MinimalInvalid)?;
    let minimal_pk = minimal.pubkey().map_err(ValidateError::MinimalInvalid)?;

    // 2. Whole-file hash. Rejects tarball substitution.
    let actual = tarball::hash_file(tarball_path, cancel).await?;
    if actual != claimed {
        return Err(ValidateError::InfohashMismatch);
    }

    // 3. Minimal signature. Rejects forged metadata.
    minimal.verify().map_err(|_| ValidateError::MinimalSignature)?;

    if cancel.is_cancelled() {
        return Err(ValidateError::Cancelled);
    }

    // 4. Extract and structurally validate the in-tarball manifest.
    let full = extract_validated(tarball_path).await?;

    // 5. Key binding between the two manifests, compared in constant time.
    // Rejects pairing publisher A's tarball with publisher B's record.
    let full_pk = full.pub_key().map_err(|_| ValidateError::FullManifestInvalid)?;
    let keys_equal: bool = minimal_pk
        .as_bytes()
        .ct_eq(full_pk.as_bytes())
        .into();
    if !keys_equal {
        return Err(ValidateError::PubkeyMismatch);
    }

    // 6. Recompute the content hash from the file map.
    let recomputed = full
        .compute_content_hash()
        .map_err(|_| ValidateError::FullManifestInvalid)?;
    let claimed_content = ContentHash::from_wire(&full.content_hash)
        .map_err(|_| ValidateError::FullManifestInvalid)?;
    if recomputed != claimed_content {
        return Err(ValidateError::ContentHashMismatch);
    }

    if cancel.is_cancelled() {
        return Err(ValidateError::Cancelled);
    }

    // The file map must describe the archive it ships in: same entry set,
    // same hashes. A self-consistent map over the wrong content stops here.
    let actual_files = hash_entries(tarball_path).await?;
    if actual_files.len() != full.files.len() {
        return Err(ValidateError::FileSetMismatch);
    }
    for (path, digest) in &actual_files {
        if full.files.get(path).map(String::as_str) != Some(digest.to_wire().as_str()) {
            return Err(ValidateError::FileSetMismatch);
        }
    }

    // 7. Full-manifest signature over the raw digest bytes.
    full.verify().map_err(|_| ValidateError::FullSignature)?;

    Ok(Validated {
        infohash: actual,
        pubkey: minimal_pk,
        name: minimal.name.clone(),
        version: minimal.version.clone(),
    })
}

async fn extract_validated(path: &Path) -> Result<FullManifest, ValidateError> {
    let owned = path.to_path_buf();
    let full = tokio::task::spawn_blocking(move || tarball::extract_full_manifest(&owned))
        .await
        .map_err(|_| ValidateError::Io)??;
    full.validate_structure().map_err(|_| ValidateError::FullManifestInvalid)?;
    Ok(full)
}

async fn hash_entries(path: &Path) -> Result<BTreeMap<String, ContentHash>, ValidateError> {
    let owned = path.to_path_buf();
    let hashes = tokio::task::spawn_blocking(move || tarball::entry_hashes(&owned))
        .await
        .map_err(|_| ValidateError::Io)??;
    Ok(hashes)
}
