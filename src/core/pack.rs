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

//! Packager: directory -> signed tarball + MinimalManifest side-car.
//!
//! Produces `<name>@<version>.tgz` with `manifest.json` at the archive root,
//! and `<name>@<version>.minimal.json` whose bytes are exactly what is stored
//! in the DHT.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::codec::{wire_bytes, CodecError};
use crate::core::records::manifest::{FullManifest, MinimalManifest, MANIFEST_ENTRY};
use crate::core::records::{sha256, RecordError};
use crate::core::security::keystore::{KeyHandle, Keystore, KeystoreError};
use crate::core::types::{name_is_valid, now_ms, version_is_valid, ContentHash, InfoHash, PROTOCOL};

/// Packaging errors.
#[derive(Debug, Error)]
pub enum PackError {
    /// Name or version fails protocol bounds.
    #[error("bad package coordinates")]
    BadCoordinates,
    /// Source or output filesystem failure.
    #[error("io")]
    Io,
    /// Record validation failure while assembling manifests.
    #[error("record: {0}")]
    Record(#[from] RecordError),
    /// Canonical codec failure.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    /// Keystore failure.
    #[error("keystore: {0}")]
    Keystore(#[from] KeystoreError),
}

/// Result of a successful pack.
#[derive(Debug)]
pub struct PackOutput {
    /// Path of the produced tarball.
    pub tarball: PathBuf,
    /// Path of the MinimalManifest side-car.
    pub sidecar: PathBuf,
    /// Infohash of the tarball bytes.
    pub infohash: InfoHash,
    /// The signed per-version record.
    pub minimal: MinimalManifest,
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut BTreeMap<String, PathBuf>,
) -> Result<(), PackError> {
    for entry in fs::read_dir(dir).map_err(|_| PackError::Io)? {
        let entry = entry.map_err(|_| PackError::Io)?;
        let path = entry.path();
        let ty = entry.file_type().map_err(|_| PackError::Io)?;
        if ty.is_dir() {
            collect_files(root, &path, out)?;
        } else if ty.is_file() {
            let rel = path
                .strip_prefix(root)
                .map_err(|_| PackError::Io)?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.insert(rel, path);
        }
        // symlinks and special files are not packaged
    }
    Ok(())
}

/// Package `src_dir` as `name@version`, signing with the keypair behind
/// `handle`.
pub fn pack_directory(
    src_dir: &Path,
    out_dir: &Path,
    name: &str,
    version: &str,
    description: Option<String>,
    author: Option<String>,
    keystore: &Keystore,
    handle: &KeyHandle,
) -> Result<PackOutput, PackError> {
    if !name_is_valid(name) || !version_is_valid(version) {
        return Err(PackError::BadCoordinates);
    }

    let mut paths = BTreeMap::new();
    collect_files(src_dir, src_dir, &mut paths)?;

    // Per-file hashes, ascending path order.
    let mut files = BTreeMap::new();
    for (rel, path) in &paths {
        let bytes = fs::read(path).map_err(|_| PackError::Io)?;
        let digest = ContentHash::from_bytes(sha256(&bytes));
        files.insert(rel.clone(), digest.to_wire());
    }

    let pubkey = handle.public_key();
    let mut full = FullManifest {
        name: name.to_string(),
        version: version.to_string(),
        description,
        author,
        files,
        content_hash: ContentHash::from_bytes([0u8; 32]).to_wire(),
        pub_key: pubkey.to_wire(),
        signature: format!("ed25519:{}", "00".repeat(64)),
    };
    let content_hash = full.compute_content_hash()?;
    full.content_hash = content_hash.to_wire();
    let sig = keystore.sign(handle, content_hash.as_bytes())?;
    full.signature = sig.to_wire();
    full.validate_structure()?;

    // Write the archive: manifest.json first, then the files.
    fs::create_dir_all(out_dir).map_err(|_| PackError::Io)?;
    let tarball_path = out_dir.join(format!("{name}@{version}.tgz"));
    {
        let file = File::create(&tarball_path).map_err(|_| PackError::Io)?;
        let enc = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(enc);

        let manifest_bytes = serde_json::to_vec(&full).map_err(|_| PackError::Io)?;
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest_bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, MANIFEST_ENTRY, manifest_bytes.as_slice())
            .map_err(|_| PackError::Io)?;

        for (rel, path) in &paths {
            builder.append_path_with_name(path, rel).map_err(|_| PackError::Io)?;
        }
        let enc = builder.into_inner().map_err(|_| PackError::Io)?;
        let file = enc.finish().map_err(|_| PackError::Io)?;
        file.sync_all().map_err(|_| PackError::Io)?;
    }

    let tarball_bytes = fs::read(&tarball_path).map_err(|_| PackError::Io)?;
    let infohash = InfoHash::from_bytes(sha256(&tarball_bytes));

    let mut minimal = MinimalManifest {
        protocol: PROTOCOL.to_string(),
        name: name.to_string(),
        version: version.to_string(),
        infohash: infohash.to_hex(),
        pubkey: pubkey.to_wire(),
        signature: format!("ed25519:{}", "00".repeat(64)),
        timestamp: now_ms(),
    };
    let sig = keystore.sign(handle, &minimal.signing_bytes()?)?;
    minimal.signature = sig.to_wire();
    minimal.validate()?;

    // Side-car bytes are the canonical DHT form.
    let sidecar_path = out_dir.join(format!("{name}@{version}.minimal.json"));
    fs::write(&sidecar_path, wire_bytes(&minimal)?).map_err(|_| PackError::Io)?;

    Ok(PackOutput { tarball: tarball_path, sidecar: sidecar_path, infohash, minimal })
}
