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

//! Tarball access: chunked infohash computation and manifest extraction.
//!
//! Hashing reads the file in fixed-size chunks through the async runtime so
//! large tarballs do not stall the executor. Tar/gzip parsing is synchronous
//! and belongs on the blocking pool.

use flate2::read::GzDecoder;
use ring::digest;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::core::records::manifest::{FullManifest, MANIFEST_ENTRY};
use crate::core::types::{ContentHash, InfoHash};

/// Chunk size for infohash computation.
const HASH_CHUNK: usize = 64 * 1024;

/// Tarball access errors.
#[derive(Debug, Error)]
pub enum TarballError {
    /// Cannot open or read the tarball.
    #[error("tarball io")]
    Io,
    /// Not a readable gzip-compressed POSIX tar.
    #[error("bad archive")]
    BadArchive,
    /// No `manifest.json` at the archive root.
    #[error("manifest missing")]
    ManifestMissing,
    /// More than one `manifest.json` entry.
    #[error("manifest duplicated")]
    ManifestDuplicated,
    /// `manifest.json` is not a parseable FullManifest.
    #[error("manifest malformed")]
    ManifestMalformed,
    /// Operation was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
}

/// SHA-256 of the entire tarball, computed in `HASH_CHUNK`-sized reads.
pub async fn hash_file(path: &Path, cancel: &CancellationToken) -> Result<InfoHash, TarballError> {
    let mut file = tokio::fs::File::open(path).await.map_err(|_| TarballError::Io)?;
    let mut ctx = digest::Context::new(&digest::SHA256);
    let mut buf = vec![0u8; HASH_CHUNK];

    loop {
        if cancel.is_cancelled() {
            return Err(TarballError::Cancelled);
        }
        let n = file.read(&mut buf).await.map_err(|_| TarballError::Io)?;
        if n == 0 {
            break;
        }
        ctx.update(&buf[..n]);
    }

    let d = ctx.finish();
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    Ok(InfoHash::from_bytes(out))
}

/// Extract and parse the single root-level `manifest.json`.
///
/// Synchronous; run on the blocking pool. Exactly one entry named
/// `manifest.json` must exist at the archive root.
pub fn extract_full_manifest(path: &Path) -> Result<FullManifest, TarballError> {
    let file = File::open(path).map_err(|_| TarballError::Io)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut manifest: Option<FullManifest> = None;
    for entry in archive.entries().map_err(|_| TarballError::BadArchive)? {
        let mut entry = entry.map_err(|_| TarballError::BadArchive)?;
        let is_manifest = entry
            .path()
            .map_err(|_| TarballError::BadArchive)?
            .as_os_str()
            == MANIFEST_ENTRY;
        if !is_manifest {
            continue;
        }
        if manifest.is_some() {
            return Err(TarballError::ManifestDuplicated);
        }
        let mut raw = Vec::new();
        entry.read_to_end(&mut raw).map_err(|_| TarballError::BadArchive)?;
        let parsed: FullManifest =
            serde_json::from_slice(&raw).map_err(|_| TarballError::ManifestMalformed)?;
        manifest = Some(parsed);
    }

    manifest.ok_or(TarballError::ManifestMissing)
}

/// Hash every non-manifest file entry in the archive.
///
/// Synchronous; run on the blocking pool. Returns relative path -> SHA-256.
/// The validation pipeline compares this map against `FullManifest.files` to
/// enforce that the archive ships exactly what the manifest declares.
pub fn entry_hashes(path: &Path) -> Result<BTreeMap<String, ContentHash>, TarballError> {
    let file = File::open(path).map_err(|_| TarballError::Io)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut out = BTreeMap::new();
    for entry in archive.entries().map_err(|_| TarballError::BadArchive)? {
        let mut entry = entry.map_err(|_| TarballError::BadArchive)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry
            .path()
            .map_err(|_| TarballError::BadArchive)?
            .to_string_lossy()
            .into_owned();
        if entry_path == MANIFEST_ENTRY {
            continue;
        }
        let mut ctx = digest::Context::new(&digest::SHA256);
        let mut buf = [0u8; HASH_CHUNK];
        loop {
            let n = entry.read(&mut buf).map_err(|_| TarballError::BadArchive)?;
            if n == 0 {
                break;
            }
            ctx.update(&buf[..n]);
        }
        let d = ctx.finish();
        let mut digest_bytes = [0u8; 32];
        digest_bytes.copy_from_slice(d.as_ref());
        out.insert(entry_path, ContentHash::from_bytes(digest_bytes));
    }
    Ok(out)
}
