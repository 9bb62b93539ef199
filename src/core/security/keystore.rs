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

//! Keystore: Ed25519 publisher keypairs with encrypted-at-rest storage.
//!
//! One key file per publisher keypair under `<data_dir>/keys/`, named by the
//! hex public key. The rest of the system addresses private material through
//! an opaque [`KeyHandle`]; raw private bytes never leave this module.
//!
//! ## Key file format
//! Without a passphrase a key file holds plain Ed25519 PKCS#8 bytes. When
//! `LIBRESEED_KEY_PASSPHRASE` is set, the PKCS#8 document is sealed into a
//! [`KeyEnvelope`]: AES-256-GCM under a PBKDF2-HMAC-SHA256 key, framed as
//! `MAGIC(8) || SALT(16) || NONCE(12) || CIPHERTEXT+TAG`.
//!
//! Every sign call leaves a line in a best-effort audit log (message digest
//! only), rotated by size.

use ring::{
    aead, pbkdf2,
    rand::{SecureRandom, SystemRandom},
    signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519},
};
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::core::types::{PubKey, SigBytes};

const ENVELOPE_MAGIC: &[u8; 8] = b"LSEEDKY1";
const ENVELOPE_SALT_LEN: usize = 16;
const ENVELOPE_NONCE_LEN: usize = 12;
const ENVELOPE_TAG_LEN: usize = 16;

const PBKDF2_ITERS_DEFAULT: u32 = 100_000;

fn passphrase() -> Option<String> {
    std::env::var("LIBRESEED_KEY_PASSPHRASE")
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn pbkdf2_iters() -> NonZeroU32 {
    let iters = std::env::var("LIBRESEED_PBKDF2_ITERS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(PBKDF2_ITERS_DEFAULT);
    // Clamp to a practical range.
    let iters = iters.clamp(10_000, 10_000_000);
    NonZeroU32::new(iters).unwrap_or_else(|| NonZeroU32::new(PBKDF2_ITERS_DEFAULT).expect("nonzero"))
}

/// Keystore errors.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// Filesystem failure.
    #[error("io")]
    Io,
    /// Key file is not valid PKCS#8 (or a valid envelope).
    #[error("invalid key encoding")]
    InvalidKey,
    /// Encrypted key present but no passphrase in the environment.
    #[error("missing passphrase (set LIBRESEED_KEY_PASSPHRASE)")]
    MissingPassphrase,
    /// Cryptographic primitive failure.
    #[error("crypto")]
    Crypto,
    /// Handle does not address a loaded keypair.
    #[error("unknown key handle")]
    UnknownKey,
}

/// Opaque handle to a private key held by the keystore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct KeyHandle(PubKey);

impl KeyHandle {
    /// Public half of the keypair this handle addresses.
    pub fn public_key(&self) -> PubKey {
        self.0
    }
}

/// Signer backend abstraction (HSM compatible).
pub trait SignerBackend: Send + Sync {
    /// Return the public key.
    fn public_key(&self) -> PubKey;
    /// Sign message bytes.
    fn sign(&self, msg: &[u8]) -> Result<SigBytes, KeystoreError>;
}

/// AES-256-GCM envelope around PKCS#8 key material.
struct KeyEnvelope {
    salt: [u8; ENVELOPE_SALT_LEN],
    nonce: [u8; ENVELOPE_NONCE_LEN],
    sealed: Vec<u8>,
}

impl KeyEnvelope {
    /// Seal PKCS#8 bytes under a passphrase with fresh salt and nonce.
    fn seal(passphrase: &str, pkcs8: &[u8]) -> Result<Self, KeystoreError> {
        let rng = SystemRandom::new();
        let mut salt = [0u8; ENVELOPE_SALT_LEN];
        rng.fill(&mut salt).map_err(|_| KeystoreError::Crypto)?;
        let mut nonce = [0u8; ENVELOPE_NONCE_LEN];
        rng.fill(&mut nonce).map_err(|_| KeystoreError::Crypto)?;

        let cipher = Self::cipher(passphrase, &salt)?;
        let mut sealed = pkcs8.to_vec();
        cipher
            .seal_in_place_append_tag(
                aead::Nonce::assume_unique_for_key(nonce),
                aead::Aad::empty(),
                &mut sealed,
            )
            .map_err(|_| KeystoreError::Crypto)?;

        Ok(Self { salt, nonce, sealed })
    }

    /// Recover the PKCS#8 bytes. Consumes the envelope; the scratch buffer
    /// is wiped once the plaintext has been copied out.
    fn open(self, passphrase: &str) -> Result<Vec<u8>, KeystoreError> {
        let cipher = Self::cipher(passphrase, &self.salt)?;
        let mut scratch = self.sealed;
        let pkcs8 = cipher
            .open_in_place(
                aead::Nonce::assume_unique_for_key(self.nonce),
                aead::Aad::empty(),
                &mut scratch,
            )
            .map_err(|_| KeystoreError::Crypto)?
            .to_vec();
        scratch.zeroize();
        Ok(pkcs8)
    }

    /// Derive the AEAD key for (passphrase, salt). The derived bytes are
    /// zeroized when the binding drops.
    fn cipher(
        passphrase: &str,
        salt: &[u8; ENVELOPE_SALT_LEN],
    ) -> Result<aead::LessSafeKey, KeystoreError> {
        let mut derived = Zeroizing::new([0u8; 32]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            pbkdf2_iters(),
            salt,
            passphrase.as_bytes(),
            &mut *derived,
        );
        let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &*derived)
            .map_err(|_| KeystoreError::Crypto)?;
        Ok(aead::LessSafeKey::new(unbound))
    }

    /// Parse the on-disk framing.
    fn parse(bytes: &[u8]) -> Result<Self, KeystoreError> {
        let body = bytes
            .strip_prefix(ENVELOPE_MAGIC.as_slice())
            .ok_or(KeystoreError::InvalidKey)?;
        if body.len() < ENVELOPE_SALT_LEN + ENVELOPE_NONCE_LEN + ENVELOPE_TAG_LEN {
            return Err(KeystoreError::InvalidKey);
        }
        let (salt_bytes, body) = body.split_at(ENVELOPE_SALT_LEN);
        let (nonce_bytes, sealed) = body.split_at(ENVELOPE_NONCE_LEN);

        let mut salt = [0u8; ENVELOPE_SALT_LEN];
        salt.copy_from_slice(salt_bytes);
        let mut nonce = [0u8; ENVELOPE_NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        Ok(Self { salt, nonce, sealed: sealed.to_vec() })
    }

    /// Render the on-disk framing.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            ENVELOPE_MAGIC.len() + ENVELOPE_SALT_LEN + ENVELOPE_NONCE_LEN + self.sealed.len(),
        );
        out.extend_from_slice(ENVELOPE_MAGIC);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.sealed);
        out
    }
}

fn restrict_perms(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

/// Write key material atomically: temp file with 0600 perms, fsync, rename.
fn write_private(path: &Path, bytes: &[u8]) -> Result<(), KeystoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| KeystoreError::Io)?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp).map_err(|_| KeystoreError::Io)?;
    restrict_perms(&tmp);
    file.write_all(bytes).map_err(|_| KeystoreError::Io)?;
    let _ = file.sync_all();
    drop(file);

    fs::rename(&tmp, path).map_err(|_| KeystoreError::Io)?;
    restrict_perms(path);
    Ok(())
}

const AUDIT_MAX_BYTES: u64 = 32 * 1024 * 1024; // 32 MiB
const AUDIT_GENERATIONS: usize = 3;

/// Best-effort signing audit: one JSON line per sign call, carrying the
/// message digest only, rotated by size. Never fails the caller.
struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn record(&self, action: &str, msg: &[u8]) {
        self.rotate_if_full();

        let digest = ring::digest::digest(&ring::digest::SHA256, msg);
        let line = format!(
            "{{\"action\":\"{action}\",\"msg_sha256\":\"{}\"}}\n",
            hex::encode(digest.as_ref())
        );
        if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(&self.path) {
            restrict_perms(&self.path);
            let _ = file.write_all(line.as_bytes());
        }
    }

    fn rotate_if_full(&self) {
        let full = fs::metadata(&self.path)
            .map(|m| m.len() > AUDIT_MAX_BYTES)
            .unwrap_or(false);
        if !full {
            return;
        }
        let generation = |i: usize| PathBuf::from(format!("{}.{i}", self.path.display()));
        for i in (1..AUDIT_GENERATIONS).rev() {
            let _ = fs::rename(generation(i), generation(i + 1));
        }
        let _ = fs::rename(&self.path, generation(1));
    }
}

/// File-backed Ed25519 backend.
pub struct FileEd25519Backend {
    keypair: Ed25519KeyPair,
}

impl FileEd25519Backend {
    /// Load an Ed25519 key file, unsealing the envelope if present.
    pub fn load(path: &Path) -> Result<Self, KeystoreError> {
        let raw = fs::read(path).map_err(|_| KeystoreError::Io)?;
        let pkcs8 = if raw.starts_with(ENVELOPE_MAGIC) {
            let pass = passphrase().ok_or(KeystoreError::MissingPassphrase)?;
            KeyEnvelope::parse(&raw)?.open(&pass)?
        } else {
            raw
        };
        let keypair = Ed25519KeyPair::from_pkcs8(&pkcs8).map_err(|_| KeystoreError::InvalidKey)?;
        Ok(Self { keypair })
    }

    /// Generate a new keypair and persist it at `path`, sealed when a
    /// passphrase is present.
    pub fn create(path: &Path) -> Result<Self, KeystoreError> {
        let pass = passphrase();
        if cfg!(feature = "production") && pass.is_none() {
            return Err(KeystoreError::MissingPassphrase);
        }

        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| KeystoreError::Crypto)?;

        let on_disk = match pass.as_deref() {
            Some(p) => KeyEnvelope::seal(p, pkcs8.as_ref())?.to_bytes(),
            None => pkcs8.as_ref().to_vec(),
        };
        write_private(path, &on_disk)?;

        let keypair =
            Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| KeystoreError::InvalidKey)?;
        Ok(Self { keypair })
    }
}

impl SignerBackend for FileEd25519Backend {
    fn public_key(&self) -> PubKey {
        let pk = self.keypair.public_key().as_ref();
        let mut out = [0u8; 32];
        out.copy_from_slice(pk);
        PubKey::from_bytes(out)
    }

    fn sign(&self, msg: &[u8]) -> Result<SigBytes, KeystoreError> {
        let sig = self.keypair.sign(msg);
        let mut out = [0u8; 64];
        out.copy_from_slice(sig.as_ref());
        Ok(SigBytes::from_bytes(out))
    }
}

/// Multi-keypair keystore rooted at `<data_dir>/keys/`.
pub struct Keystore {
    dir: PathBuf,
    backends: Mutex<BTreeMap<PubKey, Box<dyn SignerBackend>>>,
    audit: AuditLog,
}

impl Keystore {
    /// Open the keystore, loading every `*.key` file under `<data_dir>/keys/`.
    ///
    /// Failure here is fatal to the daemon.
    pub fn open(data_dir: &str) -> Result<Self, KeystoreError> {
        let dir = PathBuf::from(data_dir).join("keys");
        fs::create_dir_all(&dir).map_err(|_| KeystoreError::Io)?;

        let mut backends: BTreeMap<PubKey, Box<dyn SignerBackend>> = BTreeMap::new();
        for entry in fs::read_dir(&dir).map_err(|_| KeystoreError::Io)? {
            let entry = entry.map_err(|_| KeystoreError::Io)?;
            let path = entry.path();
            if path.extension().map(|e| e == "key").unwrap_or(false) {
                let backend = FileEd25519Backend::load(&path)?;
                backends.insert(backend.public_key(), Box::new(backend));
            }
        }

        let audit = AuditLog::new(dir.join("audit.log"));
        Ok(Self { dir, backends: Mutex::new(backends), audit })
    }

    /// Generate and persist a new keypair, returning its handle.
    pub fn generate(&self) -> Result<KeyHandle, KeystoreError> {
        // Generate first to learn the pubkey, then persist under its name.
        let tmp_name = self.dir.join("new.key");
        let backend = FileEd25519Backend::create(&tmp_name)?;
        let pk = backend.public_key();
        let final_name = self.dir.join(format!("{}.key", hex::encode(pk.as_bytes())));
        fs::rename(&tmp_name, &final_name).map_err(|_| KeystoreError::Io)?;

        let mut guard = self.backends.lock().map_err(|_| KeystoreError::Crypto)?;
        guard.insert(pk, Box::new(backend));
        Ok(KeyHandle(pk))
    }

    /// Handle for an already-loaded keypair.
    pub fn handle(&self, pubkey: &PubKey) -> Option<KeyHandle> {
        let guard = self.backends.lock().ok()?;
        guard.contains_key(pubkey).then_some(KeyHandle(*pubkey))
    }

    /// Public keys of every loaded keypair.
    pub fn public_keys(&self) -> Vec<PubKey> {
        self.backends
            .lock()
            .map(|g| g.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Sign message bytes with the keypair behind `handle`.
    pub fn sign(&self, handle: &KeyHandle, msg: &[u8]) -> Result<SigBytes, KeystoreError> {
        let guard = self.backends.lock().map_err(|_| KeystoreError::Crypto)?;
        let backend = guard.get(&handle.0).ok_or(KeystoreError::UnknownKey)?;
        self.audit.record("sign", msg);
        backend.sign(msg)
    }
}

/// Verify a detached Ed25519 signature. Pure; performs no I/O.
pub fn verify_detached(pubkey: &PubKey, msg: &[u8], sig: &SigBytes) -> bool {
    let pk = UnparsedPublicKey::new(&ED25519, pubkey.as_bytes());
    pk.verify(msg, sig.as_bytes()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_sign_verify_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ks = Keystore::open(dir.path().to_str().unwrap()).expect("open");
        let handle = ks.generate().expect("generate");
        let msg = b"libreseed test message";
        let sig = ks.sign(&handle, msg).expect("sign");
        assert!(verify_detached(&handle.public_key(), msg, &sig));

        // any other key must fail
        let other = ks.generate().expect("generate 2");
        assert!(!verify_detached(&other.public_key(), msg, &sig));

        // any flipped byte must fail
        let mut tampered = *msg;
        tampered[0] ^= 1;
        assert!(!verify_detached(&handle.public_key(), &tampered, &sig));
    }

    #[test]
    fn reopen_loads_persisted_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pk = {
            let ks = Keystore::open(dir.path().to_str().unwrap()).expect("open");
            ks.generate().expect("generate").public_key()
        };
        let ks = Keystore::open(dir.path().to_str().unwrap()).expect("reopen");
        assert!(ks.handle(&pk).is_some());
        assert_eq!(ks.public_keys(), vec![pk]);
    }

    #[test]
    fn envelope_seals_and_opens() {
        let secret = b"not really a pkcs8 document";
        let env = KeyEnvelope::seal("hunter2", secret).expect("seal");
        let framed = env.to_bytes();
        assert!(framed.starts_with(ENVELOPE_MAGIC));

        let reopened = KeyEnvelope::parse(&framed).expect("parse");
        assert_eq!(reopened.open("hunter2").expect("open"), secret);

        let reopened = KeyEnvelope::parse(&framed).expect("parse");
        assert!(reopened.open("wrong").is_err(), "wrong passphrase must fail");
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let env = KeyEnvelope::seal("hunter2", b"material").expect("seal");
        let framed = env.to_bytes();
        assert!(KeyEnvelope::parse(&framed[..ENVELOPE_MAGIC.len() + 4]).is_err());
        assert!(KeyEnvelope::parse(b"something else entirely").is_err());
    }
}
