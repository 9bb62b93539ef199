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

//! Seeder registry: the mutable set of currently-seeded packages.
//!
//! The registry is the sole writer of its persisted state, a JSON manifest
//! list written with temp-file + fsync + rename so a crash never leaves a
//! partial file. `add` runs the dual-manifest pipeline before anything is
//! seeded or published; DHT writes are opportunistic (logged and retried by
//! the republisher), never a reason to fail a locally-valid add.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::records::announce::{seeder_id_for, BandwidthStats, SeederStatus};
use crate::core::records::manifest::MinimalManifest;
use crate::core::security::keystore::{KeyHandle, Keystore};
use crate::core::types::{now_ms, InfoHash, PubKey, PROTOCOL};
use crate::core::validate::{validate_package, RejectKind, Validated, ValidateError};
use crate::dht::publish::Publisher;
use crate::monitoring::metrics::Metrics;
use crate::seeder::engine::SeedingEngine;

const STATE_FILE: &str = "registry.json";

/// Registry failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The persisted registry cannot be opened or parsed. Fatal at startup.
    #[error("registry open failed")]
    OpenFailed,
    /// Writing the persisted state failed.
    #[error("registry io")]
    Io,
    /// The dual-manifest pipeline rejected the package.
    #[error("validation: {0}")]
    Validate(#[from] ValidateError),
    /// The transfer engine refused the tarball.
    #[error("engine")]
    Engine,
}

/// Outcome of [`SeederRegistry::add`].
#[derive(Debug)]
pub enum AddOutcome {
    /// Newly validated and seeded.
    Added(Validated),
    /// The infohash was already present; nothing changed.
    AlreadyPresent,
}

/// One seeded package.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeededPackage {
    /// Infohash, 64 lowercase hex chars.
    pub infohash: String,
    /// Tarball location on disk.
    pub tarball_path: PathBuf,
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// Publisher pubkey, wire form.
    pub pubkey: String,
    /// Millisecond timestamp of acceptance.
    pub added_at: u64,
    /// Tarball size in bytes.
    pub size_bytes: u64,
    /// The verified per-version record, kept for republishing.
    pub minimal: MinimalManifest,
}

/// Aggregated registry statistics.
#[derive(Clone, Debug)]
pub struct RegistryStats {
    /// Seeded packages as `name@version`.
    pub seeded_packages: Vec<String>,
    /// Seconds since the registry opened.
    pub uptime_seconds: u64,
    /// Total bytes of seeded tarballs.
    pub disk_usage_bytes: u64,
    /// Engine-reported rates.
    pub bandwidth: BandwidthStats,
}

/// The registry. One reader/writer lock guards the in-memory set: many
/// concurrent readers, one writer.
pub struct SeederRegistry {
    state_path: PathBuf,
    packages: RwLock<Vec<SeededPackage>>,
    engine: Arc<dyn SeedingEngine>,
    publisher: Arc<Publisher>,
    keystore: Arc<Keystore>,
    metrics: Arc<Metrics>,
    started_at: Instant,
}

impl SeederRegistry {
    /// Open the registry, restoring persisted state and re-adding every
    /// surviving tarball to the engine. Failure to read or parse an existing
    /// state file is fatal.
    pub async fn open(
        data_dir: &str,
        engine: Arc<dyn SeedingEngine>,
        publisher: Arc<Publisher>,
        keystore: Arc<Keystore>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, RegistryError> {
        let dir = PathBuf::from(data_dir);
        fs::create_dir_all(&dir).map_err(|_| RegistryError::OpenFailed)?;
        let state_path = dir.join(STATE_FILE);

        let mut packages: Vec<SeededPackage> = if state_path.exists() {
            let raw = fs::read(&state_path).map_err(|_| RegistryError::OpenFailed)?;
            serde_json::from_slice(&raw).map_err(|_| RegistryError::OpenFailed)?
        } else {
            Vec::new()
        };

        // Drop entries whose tarball vanished while we were down.
        packages.retain(|p| {
            let present = p.tarball_path.exists();
            if !present {
                warn!(infohash = %p.infohash, "tarball missing on restart; dropping from registry");
            }
            present
        });

        for pkg in &packages {
            if let Ok(infohash) = InfoHash::from_hex(&pkg.infohash) {
                if engine.add_torrent(&infohash, &pkg.tarball_path).await.is_err() {
                    warn!(infohash = %pkg.infohash, "engine refused restored tarball");
                }
            }
        }
        metrics.seeded_packages.set(packages.len() as i64);

        Ok(Self {
            state_path,
            packages: RwLock::new(packages),
            engine,
            publisher,
            keystore,
            metrics,
            started_at: Instant::now(),
        })
    }

    /// Validate and seed a tarball. Idempotent on infohash.
    ///
    /// On success the package is persisted, handed to the engine, and its
    /// records are pushed to the DHT (best-effort; the republisher retries).
    pub async fn add(
        &self,
        tarball_path: &Path,
        minimal: &MinimalManifest,
        cancel: &CancellationToken,
    ) -> Result<AddOutcome, RegistryError> {
        let validated = match validate_package(tarball_path, minimal, cancel).await {
            Ok(v) => v,
            Err(e) => {
                match e.kind() {
                    RejectKind::Structural => {
                        self.metrics.validate_rejected_structural_total.inc()
                    }
                    RejectKind::Cryptographic => {
                        self.metrics.validate_rejected_crypto_total.inc()
                    }
                    RejectKind::Integrity => {
                        self.metrics.validate_rejected_integrity_total.inc()
                    }
                    RejectKind::LocalIo | RejectKind::Cancelled => {}
                }
                return Err(RegistryError::Validate(e));
            }
        };
        self.metrics.validate_accepted_total.inc();

        let infohash_hex = validated.infohash.to_hex();
        {
            let packages = self.packages.read().await;
            if packages.iter().any(|p| p.infohash == infohash_hex) {
                return Ok(AddOutcome::AlreadyPresent);
            }
        }

        let size_bytes = fs::metadata(tarball_path).map(|m| m.len()).unwrap_or(0);
        self.engine
            .add_torrent(&validated.infohash, tarball_path)
            .await
            .map_err(|_| RegistryError::Engine)?;

        let entry = SeededPackage {
            infohash: infohash_hex.clone(),
            tarball_path: tarball_path.to_path_buf(),
            name: validated.name.clone(),
            version: validated.version.clone(),
            pubkey: validated.pubkey.to_wire(),
            added_at: now_ms(),
            size_bytes,
            minimal: minimal.clone(),
        };

        // The lock is never held across a suspension point; the engine
        // rollback happens after it is released.
        let insert_err = {
            let mut packages = self.packages.write().await;
            // Re-check under the write lock; a concurrent add may have won.
            if packages.iter().any(|p| p.infohash == infohash_hex) {
                // The engine add was a duplicate of an already-seeded
                // infohash; leave it alone.
                return Ok(AddOutcome::AlreadyPresent);
            }
            packages.push(entry);
            match persist(&self.state_path, &packages) {
                Ok(()) => {
                    self.metrics.seeded_packages.set(packages.len() as i64);
                    None
                }
                Err(e) => {
                    packages.retain(|p| p.infohash != infohash_hex);
                    Some(e)
                }
            }
        };
        if let Some(e) = insert_err {
            let _ = self.engine.remove_torrent(&validated.infohash).await;
            return Err(e);
        }

        self.push_records(&validated, minimal).await;
        info!(name = %validated.name, version = %validated.version, infohash = %validated.infohash, "package seeded");
        Ok(AddOutcome::Added(validated))
    }

    /// Stop seeding an infohash. Returns whether it was present.
    pub async fn remove(&self, infohash: &InfoHash) -> Result<bool, RegistryError> {
        let infohash_hex = infohash.to_hex();
        let removed = {
            let mut packages = self.packages.write().await;
            let Some(pos) = packages.iter().position(|p| p.infohash == infohash_hex) else {
                return Ok(false);
            };
            let removed = packages.remove(pos);
            if let Err(e) = persist(&self.state_path, &packages) {
                packages.insert(pos, removed);
                return Err(e);
            }
            self.metrics.seeded_packages.set(packages.len() as i64);
            removed
        };

        if self.engine.remove_torrent(infohash).await.is_err() {
            warn!(infohash = %infohash_hex, "engine failed to drop torrent");
        }

        if let Ok(pk) = PubKey::from_wire(&removed.pubkey) {
            if let Some(handle) = self.keystore.handle(&pk) {
                if let Err(e) = self
                    .publisher
                    .retract_version(&handle, &removed.name, &removed.version)
                    .await
                {
                    warn!(err = %e, "retract after remove failed; republisher state will converge");
                }
            }
        }

        info!(name = %removed.name, version = %removed.version, "package removed");
        Ok(true)
    }

    /// Snapshot of the seeded set.
    pub async fn list(&self) -> Vec<SeededPackage> {
        self.packages.read().await.clone()
    }

    /// Replace a package's stored MinimalManifest after a republish
    /// refreshed its timestamp and signature.
    pub async fn store_refreshed_minimal(
        &self,
        infohash: &str,
        minimal: MinimalManifest,
    ) -> Result<(), RegistryError> {
        let mut packages = self.packages.write().await;
        let Some(pkg) = packages.iter_mut().find(|p| p.infohash == infohash) else {
            return Ok(()); // removed while the republish was in flight
        };
        pkg.minimal = minimal;
        persist(&self.state_path, &packages)
    }

    /// Aggregate statistics for SeederStatus.
    pub async fn stats(&self) -> RegistryStats {
        let packages = self.packages.read().await;
        let seeded_packages = packages
            .iter()
            .map(|p| format!("{}@{}", p.name, p.version))
            .collect();
        let disk_usage_bytes = packages.iter().map(|p| p.size_bytes).sum();
        drop(packages);

        RegistryStats {
            seeded_packages,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            disk_usage_bytes,
            bandwidth: self.engine.bandwidth().await,
        }
    }

    /// Build an unsigned SeederStatus snapshot for `handle`'s identity.
    /// The publisher signs it on the way out.
    pub async fn seeder_status(&self, handle: &KeyHandle) -> SeederStatus {
        let stats = self.stats().await;
        let pk = handle.public_key();
        SeederStatus {
            protocol: PROTOCOL.to_string(),
            seeder_id: seeder_id_for(&pk),
            pubkey: pk.to_wire(),
            timestamp: now_ms(),
            seeded_packages: stats.seeded_packages,
            uptime_seconds: stats.uptime_seconds,
            disk_usage_bytes: stats.disk_usage_bytes,
            bandwidth_stats: stats.bandwidth,
            signature: format!("ed25519:{}", "00".repeat(64)),
        }
    }

    /// Best-effort DHT push after a successful add. Owned keys get the full
    /// publish path; foreign records are re-put unchanged.
    async fn push_records(&self, validated: &Validated, minimal: &MinimalManifest) {
        match self.keystore.handle(&validated.pubkey) {
            Some(handle) => {
                if let Err(e) = self.publisher.publish_version(&handle, minimal).await {
                    warn!(err = %e, "publish after add failed; republisher will retry");
                }
            }
            None => {
                if let Err(e) = self.publisher.republish_foreign_manifest(minimal).await {
                    warn!(err = %e, "foreign manifest re-put failed; republisher will retry");
                }
            }
        }
    }
}

/// Atomic write of the manifest list: temp file, fsync, rename.
fn persist(path: &Path, packages: &[SeededPackage]) -> Result<(), RegistryError> {
    let bytes = serde_json::to_vec_pretty(packages).map_err(|_| RegistryError::Io)?;

    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| RegistryError::Io)?;
        f.write_all(&bytes).map_err(|_| RegistryError::Io)?;
        f.sync_all().map_err(|_| RegistryError::Io)?;
    }
    fs::rename(&tmp, path).map_err(|_| RegistryError::Io)?;
    Ok(())
}
