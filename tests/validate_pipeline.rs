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

//! End-to-end scenarios for the seven-step dual-manifest pipeline: a real
//! packed directory, then targeted tampering at each layer.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio_util::sync::CancellationToken;

use libreseed::core::pack::pack_directory;
use libreseed::core::records::manifest::{FullManifest, MinimalManifest};
use libreseed::core::security::keystore::{KeyHandle, Keystore};
use libreseed::core::types::now_ms;
use libreseed::core::validate::{validate_package, ValidateError};

fn write_fixture(dir: &Path) {
    fs::write(dir.join("index.js"), b"module.exports = () => 42;\n").unwrap();
    fs::write(dir.join("README.md"), b"# pkg\n").unwrap();
}

fn pack_fixture(
    root: &Path,
    keystore: &Keystore,
    handle: &KeyHandle,
) -> (PathBuf, MinimalManifest) {
    let src = root.join("src");
    fs::create_dir_all(&src).unwrap();
    write_fixture(&src);
    let out = root.join("out");
    let packed = pack_directory(&src, &out, "pkg", "1.0.0", None, None, keystore, handle)
        .expect("pack");
    (packed.tarball, packed.minimal)
}

fn read_entries(tarball: &Path) -> Vec<(String, Vec<u8>)> {
    let file = fs::File::open(tarball).unwrap();
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut out = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        out.push((path, bytes));
    }
    out
}

fn write_entries(tarball: &Path, entries: &[(String, Vec<u8>)]) {
    let file = fs::File::create(tarball).unwrap();
    let enc = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(enc);
    for (path, bytes) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, bytes.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Re-sign a MinimalManifest for a (possibly rewritten) tarball so the
/// pipeline gets past the infohash and signature steps.
fn resign_minimal(
    keystore: &Keystore,
    handle: &KeyHandle,
    template: &MinimalManifest,
    tarball: &Path,
) -> MinimalManifest {
    let bytes = fs::read(tarball).unwrap();
    let digest = ring::digest::digest(&ring::digest::SHA256, &bytes);
    let mut minimal = template.clone();
    minimal.infohash = hex::encode(digest.as_ref());
    minimal.timestamp = now_ms();
    let sig = keystore.sign(handle, &minimal.signing_bytes().unwrap()).unwrap();
    minimal.signature = sig.to_wire();
    minimal
}

#[tokio::test]
async fn happy_path_publish_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();
    let (tarball, minimal) = pack_fixture(dir.path(), &keystore, &handle);

    // Side-car bytes round-trip to the same record.
    let sidecar = tarball.with_file_name("pkg@1.0.0.minimal.json");
    let parsed: MinimalManifest =
        serde_json::from_slice(&fs::read(&sidecar).unwrap()).unwrap();
    assert_eq!(parsed, minimal);

    let cancel = CancellationToken::new();
    let validated = validate_package(&tarball, &minimal, &cancel).await.expect("accept");
    assert_eq!(validated.name, "pkg");
    assert_eq!(validated.version, "1.0.0");
    assert_eq!(validated.infohash.to_hex(), minimal.infohash);
    assert_eq!(validated.pubkey.to_wire(), minimal.pubkey);
}

#[tokio::test]
async fn packed_archive_file_set_matches_the_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();
    let (tarball, _minimal) = pack_fixture(dir.path(), &keystore, &handle);

    let full: FullManifest = read_entries(&tarball)
        .into_iter()
        .find(|(path, _)| path == "manifest.json")
        .map(|(_, bytes)| serde_json::from_slice(&bytes).unwrap())
        .expect("manifest entry");

    let hashes = libreseed::core::tarball::entry_hashes(&tarball).unwrap();
    assert_eq!(hashes.len(), full.files.len());
    for (path, digest) in hashes {
        assert_eq!(full.files.get(&path).unwrap(), &digest.to_wire());
    }
}

#[tokio::test]
async fn flipped_tarball_byte_fails_infohash_check() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();
    let (tarball, minimal) = pack_fixture(dir.path(), &keystore, &handle);

    let mut bytes = fs::read(&tarball).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x01;
    fs::write(&tarball, &bytes).unwrap();

    let cancel = CancellationToken::new();
    let err = validate_package(&tarball, &minimal, &cancel).await.unwrap_err();
    assert!(matches!(err, ValidateError::InfohashMismatch), "{err:?}");
}

#[tokio::test]
async fn remapped_file_hash_fails_content_hash_recompute() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();
    let (tarball, minimal) = pack_fixture(dir.path(), &keystore, &handle);

    // Remap index.js to an unrelated hash without re-signing the manifest.
    let mut entries = read_entries(&tarball);
    for (path, bytes) in entries.iter_mut() {
        if path == "manifest.json" {
            let mut full: FullManifest = serde_json::from_slice(bytes).unwrap();
            full.files.insert(
                "index.js".to_string(),
                format!("sha256:{}", "ab".repeat(32)),
            );
            *bytes = serde_json::to_vec(&full).unwrap();
        }
    }
    write_entries(&tarball, &entries);
    let minimal = resign_minimal(&keystore, &handle, &minimal, &tarball);

    let cancel = CancellationToken::new();
    let err = validate_package(&tarball, &minimal, &cancel).await.unwrap_err();
    assert!(matches!(err, ValidateError::ContentHashMismatch), "{err:?}");
}

#[tokio::test]
async fn self_consistent_false_file_map_fails_archive_check() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();
    let (tarball, minimal) = pack_fixture(dir.path(), &keystore, &handle);

    // Remap index.js to a false hash, then recompute contentHash and
    // re-sign so steps 6 and 7 both pass. Only the archive contract can
    // catch that the map no longer describes the shipped bytes.
    let mut entries = read_entries(&tarball);
    for (path, bytes) in entries.iter_mut() {
        if path == "manifest.json" {
            let mut full: FullManifest = serde_json::from_slice(bytes).unwrap();
            full.files.insert(
                "index.js".to_string(),
                format!("sha256:{}", "ab".repeat(32)),
            );
            let content_hash = full.compute_content_hash().unwrap();
            full.content_hash = content_hash.to_wire();
            let sig = keystore.sign(&handle, content_hash.as_bytes()).unwrap();
            full.signature = sig.to_wire();
            *bytes = serde_json::to_vec(&full).unwrap();
        }
    }
    write_entries(&tarball, &entries);
    let minimal = resign_minimal(&keystore, &handle, &minimal, &tarball);

    let cancel = CancellationToken::new();
    let err = validate_package(&tarball, &minimal, &cancel).await.unwrap_err();
    assert!(matches!(err, ValidateError::FileSetMismatch), "{err:?}");
}

#[tokio::test]
async fn smuggled_archive_entry_fails_archive_check() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();
    let (tarball, minimal) = pack_fixture(dir.path(), &keystore, &handle);

    // An extra entry the manifest never declared.
    let mut entries = read_entries(&tarball);
    entries.push(("extra.bin".to_string(), b"payload".to_vec()));
    write_entries(&tarball, &entries);
    let minimal = resign_minimal(&keystore, &handle, &minimal, &tarball);

    let cancel = CancellationToken::new();
    let err = validate_package(&tarball, &minimal, &cancel).await.unwrap_err();
    assert!(matches!(err, ValidateError::FileSetMismatch), "{err:?}");
}

#[tokio::test]
async fn substituted_pubkey_fails_key_binding() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();
    let intruder = keystore.generate().unwrap();
    let (tarball, minimal) = pack_fixture(dir.path(), &keystore, &handle);

    // Swap the in-tarball pubKey for a different valid Ed25519 key.
    let mut entries = read_entries(&tarball);
    for (path, bytes) in entries.iter_mut() {
        if path == "manifest.json" {
            let mut full: FullManifest = serde_json::from_slice(bytes).unwrap();
            full.pub_key = intruder.public_key().to_wire();
            *bytes = serde_json::to_vec(&full).unwrap();
        }
    }
    write_entries(&tarball, &entries);
    let minimal = resign_minimal(&keystore, &handle, &minimal, &tarball);

    let cancel = CancellationToken::new();
    let err = validate_package(&tarball, &minimal, &cancel).await.unwrap_err();
    assert!(matches!(err, ValidateError::PubkeyMismatch), "{err:?}");
}

#[tokio::test]
async fn missing_manifest_entry_is_an_integrity_reject() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();
    let (tarball, minimal) = pack_fixture(dir.path(), &keystore, &handle);

    let entries: Vec<_> = read_entries(&tarball)
        .into_iter()
        .filter(|(path, _)| path != "manifest.json")
        .collect();
    write_entries(&tarball, &entries);
    let minimal = resign_minimal(&keystore, &handle, &minimal, &tarball);

    let cancel = CancellationToken::new();
    let err = validate_package(&tarball, &minimal, &cancel).await.unwrap_err();
    assert!(matches!(err, ValidateError::FullManifestMissing), "{err:?}");
}

#[tokio::test]
async fn cancellation_is_distinct_from_failure() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Keystore::open(dir.path().to_str().unwrap()).unwrap();
    let handle = keystore.generate().unwrap();
    let (tarball, minimal) = pack_fixture(dir.path(), &keystore, &handle);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = validate_package(&tarball, &minimal, &cancel).await.unwrap_err();
    assert!(matches!(err, ValidateError::Cancelled), "{err:?}");
}
