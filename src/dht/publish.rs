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

//! Publish-side DHT writes: MinimalManifest puts, NameIndex upserts, and
//! Announce amendments.
//!
//! Within one keypair all writes are serialized by a per-keypair lock so
//! NameIndex and Announce updates are locally linearizable; across keypairs
//! they run in parallel.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

use crate::core::codec::CodecError;
use crate::core::records::announce::{
    Announce, PackageEntry, SeederStatus, VersionEntry, ANNOUNCE_VERSION,
};
use crate::core::records::index::{NameIndex, PublisherEntry};
use crate::core::records::manifest::MinimalManifest;
use crate::core::records::RecordError;
use crate::core::security::keystore::{KeyHandle, Keystore, KeystoreError};
use crate::core::types::{now_ms, parse_version, LimitsConfig, PubKey, PROTOCOL};
use crate::dht::keys::{announce_key, manifest_key, name_index_key, seeder_key};
use crate::dht::store::{RecordStore, StoreError};

fn sig_placeholder() -> String {
    // 64 zero bytes in wire form; replaced before any record leaves this module.
    format!("ed25519:{}", "00".repeat(64))
}

/// Publish failures.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The handle does not match the record's pubkey.
    #[error("record pubkey does not match signing key")]
    KeyMismatch,
    /// Keystore failure.
    #[error("keystore: {0}")]
    Keystore(#[from] KeystoreError),
    /// DHT store failure. Transient.
    #[error("store: {0}")]
    Store(#[from] StoreError),
    /// Record validation failure.
    #[error("record: {0}")]
    Record(#[from] RecordError),
    /// Canonical codec failure.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
}

/// Publish-side writer over the record store.
pub struct Publisher {
    store: RecordStore,
    keystore: Arc<Keystore>,
    limits: LimitsConfig,
    locks: Mutex<BTreeMap<PubKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Publisher {
    /// Build a publisher.
    pub fn new(store: RecordStore, keystore: Arc<Keystore>, limits: LimitsConfig) -> Self {
        Self { store, keystore, limits, locks: Mutex::new(BTreeMap::new()) }
    }

    /// The underlying record store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn keypair_lock(&self, pk: PubKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        guard.entry(pk).or_default().clone()
    }

    /// Publish a signed MinimalManifest and fold the version into the
    /// publisher's NameIndex entry and Announce.
    pub async fn publish_version(
        &self,
        handle: &KeyHandle,
        minimal: &MinimalManifest,
    ) -> Result<(), PublishError> {
        let pk = handle.public_key();
        if minimal.pubkey()? != pk {
            return Err(PublishError::KeyMismatch);
        }
        minimal.validate()?;

        let lock = self.keypair_lock(pk);
        let _guard = lock.lock().await;

        let key = manifest_key(&minimal.name, &minimal.version);
        self.store.put(&key, minimal).await?;

        self.upsert_name_index(handle, &minimal.name, &minimal.version).await?;
        self.amend_announce(handle, &minimal.name, &minimal.version, minimal.timestamp).await?;
        Ok(())
    }

    /// Retract a version: drop it from the Announce and, when it was the
    /// publisher's last version of the name, from the NameIndex.
    ///
    /// The MinimalManifest itself is not deleted; it ages out once
    /// republishing stops.
    pub async fn retract_version(
        &self,
        handle: &KeyHandle,
        name: &str,
        version: &str,
    ) -> Result<(), PublishError> {
        let pk = handle.public_key();
        let lock = self.keypair_lock(pk);
        let _guard = lock.lock().await;

        let akey = announce_key(&pk);
        let mut announce = match self.store.get::<Announce>(&akey).await? {
            Some(f) if f.record.pubkey == pk.to_wire() => f.record,
            _ => return Ok(()), // nothing announced, nothing to retract
        };

        let mut name_retired = false;
        announce.packages.retain_mut(|pkg| {
            if pkg.name != name {
                return true;
            }
            pkg.versions.retain(|v| v.version != version);
            if pkg.versions.is_empty() {
                name_retired = true;
                return false;
            }
            if let Some(latest) = highest_version(pkg.versions.iter().map(|v| v.version.as_str())) {
                pkg.latest_version = latest;
            }
            true
        });

        announce.timestamp = now_ms().max(announce.timestamp.saturating_add(1));
        self.sign_announce(handle, &mut announce)?;
        self.store.put(&akey, &announce).await?;

        if name_retired {
            self.remove_from_name_index(handle, name).await?;
        } else if let Some(latest) = announce
            .packages
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.latest_version.clone())
        {
            // Our remaining latest may have moved backwards; the index keeps
            // the monotone maximum, so only re-sign the entry timestamp.
            self.upsert_name_index(handle, name, &latest).await?;
        }
        Ok(())
    }

    /// Re-sign a MinimalManifest with a fresh timestamp and put it.
    ///
    /// Returns the refreshed record so the caller can persist its new
    /// canonical form.
    pub async fn republish_manifest(
        &self,
        handle: &KeyHandle,
        minimal: &MinimalManifest,
    ) -> Result<MinimalManifest, PublishError> {
        let pk = handle.public_key();
        if minimal.pubkey()? != pk {
            return Err(PublishError::KeyMismatch);
        }

        let lock = self.keypair_lock(pk);
        let _guard = lock.lock().await;

        let mut refreshed = minimal.clone();
        refreshed.timestamp = now_ms().max(minimal.timestamp.saturating_add(1));
        let sig = self.keystore.sign(handle, &refreshed.signing_bytes()?)?;
        refreshed.signature = sig.to_wire();

        let key = manifest_key(&refreshed.name, &refreshed.version);
        self.store.put(&key, &refreshed).await?;
        Ok(refreshed)
    }

    /// Re-put a third-party MinimalManifest unchanged to keep its replica
    /// TTL alive. The record must verify; a seeder cannot re-sign it.
    pub async fn republish_foreign_manifest(
        &self,
        minimal: &MinimalManifest,
    ) -> Result<(), PublishError> {
        minimal.validate()?;
        minimal.verify()?;
        let key = manifest_key(&minimal.name, &minimal.version);
        self.store.put(&key, minimal).await?;
        Ok(())
    }

    /// Re-sign this publisher's NameIndex entry with a fresh parent
    /// timestamp, keeping the TTL alive without changing the version.
    pub async fn refresh_name_index(
        &self,
        handle: &KeyHandle,
        name: &str,
    ) -> Result<(), PublishError> {
        let pk = handle.public_key();
        let lock = self.keypair_lock(pk);
        let _guard = lock.lock().await;

        let key = name_index_key(name);
        let Some(fetched) = self.store.get::<NameIndex>(&key).await? else {
            return Ok(());
        };
        let mut index = fetched.record;
        let Some(existing) = index.entry_for(&pk.to_wire()).cloned() else {
            return Ok(());
        };

        let now = now_ms().max(index.timestamp.saturating_add(1));
        let entry = self.signed_entry(
            handle,
            name,
            &existing.latest_version,
            existing.first_seen,
            now,
        )?;
        index.publishers.retain(|e| e.pubkey != entry.pubkey);
        index.publishers.push(entry);
        index.timestamp = now;
        self.store.put(&key, &index).await?;
        Ok(())
    }

    /// Fetch this publisher's Announce, bump its timestamp, re-sign, re-put.
    pub async fn refresh_announce(&self, handle: &KeyHandle) -> Result<(), PublishError> {
        let pk = handle.public_key();
        let lock = self.keypair_lock(pk);
        let _guard = lock.lock().await;

        let akey = announce_key(&pk);
        let Some(fetched) = self.store.get::<Announce>(&akey).await? else {
            return Ok(());
        };
        let mut announce = fetched.record;
        if announce.pubkey != pk.to_wire() {
            return Ok(());
        }
        announce.timestamp = now_ms().max(announce.timestamp.saturating_add(1));
        self.sign_announce(handle, &mut announce)?;
        self.store.put(&akey, &announce).await?;
        Ok(())
    }

    /// Sign and publish a SeederStatus snapshot.
    pub async fn publish_seeder_status(
        &self,
        handle: &KeyHandle,
        mut status: SeederStatus,
    ) -> Result<(), PublishError> {
        let pk = handle.public_key();
        if status.pubkey != pk.to_wire() {
            return Err(PublishError::KeyMismatch);
        }
        let sig = self.keystore.sign(handle, &status.signing_bytes()?)?;
        status.signature = sig.to_wire();
        status.validate()?;

        let key = seeder_key(&status.seeder_id);
        self.store.put(&key, &status).await?;
        Ok(())
    }

    async fn upsert_name_index(
        &self,
        handle: &KeyHandle,
        name: &str,
        version: &str,
    ) -> Result<(), PublishError> {
        let pk = handle.public_key();
        let pk_wire = pk.to_wire();
        let key = name_index_key(name);

        let current = self.store.get::<NameIndex>(&key).await?;
        let mut index = match current {
            Some(f) => f.record,
            None => {
                let now = now_ms();
                let entry = self.signed_entry(handle, name, version, now, now)?;
                let index = NameIndex::new(name.to_string(), entry, now);
                self.store.put(&key, &index).await?;
                return Ok(());
            }
        };

        let now = now_ms().max(index.timestamp.saturating_add(1));
        let entry = match index.entry_for(&pk_wire) {
            Some(existing) => {
                // latestVersion only ever moves forward by semver.
                let latest = highest_version(
                    [existing.latest_version.as_str(), version].into_iter(),
                )
                .unwrap_or_else(|| version.to_string());
                self.signed_entry(handle, name, &latest, existing.first_seen, now)?
            }
            None => self.signed_entry(handle, name, version, now, now)?,
        };

        let own_first_seen = entry.first_seen;
        index.publishers.retain(|e| e.pubkey != pk_wire);
        index.publishers.push(entry);
        index.timestamp = now;

        prune_soft_cap(
            &mut index,
            &pk_wire,
            own_first_seen,
            self.limits.name_index_publishers,
        );

        self.store.put(&key, &index).await?;
        Ok(())
    }

    async fn remove_from_name_index(
        &self,
        handle: &KeyHandle,
        name: &str,
    ) -> Result<(), PublishError> {
        let pk_wire = handle.public_key().to_wire();
        let key = name_index_key(name);
        let Some(fetched) = self.store.get::<NameIndex>(&key).await? else {
            return Ok(());
        };
        let mut index = fetched.record;
        index.publishers.retain(|e| e.pubkey != pk_wire);
        if index.publishers.is_empty() {
            // An empty index is invalid on the wire; stop refreshing it and
            // let the record age out instead.
            warn!(name, "last publisher retracted; letting name index expire");
            return Ok(());
        }
        index.timestamp = now_ms().max(index.timestamp.saturating_add(1));
        self.store.put(&key, &index).await?;
        Ok(())
    }

    fn signed_entry(
        &self,
        handle: &KeyHandle,
        name: &str,
        latest_version: &str,
        first_seen: u64,
        timestamp: u64,
    ) -> Result<PublisherEntry, PublishError> {
        let mut entry = PublisherEntry {
            pubkey: handle.public_key().to_wire(),
            latest_version: latest_version.to_string(),
            first_seen,
            timestamp,
            signature: sig_placeholder(),
        };
        let sig = self.keystore.sign(handle, &entry.signing_bytes(name)?)?;
        entry.signature = sig.to_wire();
        Ok(entry)
    }

    fn sign_announce(&self, handle: &KeyHandle, announce: &mut Announce) -> Result<(), PublishError> {
        let sig = self.keystore.sign(handle, &announce.signing_bytes()?)?;
        announce.signature = sig.to_wire();
        Ok(())
    }

    async fn amend_announce(
        &self,
        handle: &KeyHandle,
        name: &str,
        version: &str,
        published_at: u64,
    ) -> Result<(), PublishError> {
        let pk = handle.public_key();
        let akey = announce_key(&pk);

        let mut announce = match self.store.get::<Announce>(&akey).await? {
            Some(f) if f.record.pubkey == pk.to_wire() => f.record,
            _ => Announce {
                protocol: PROTOCOL.to_string(),
                announce_version: ANNOUNCE_VERSION,
                pubkey: pk.to_wire(),
                timestamp: 0,
                packages: Vec::new(),
                signature: sig_placeholder(),
            },
        };

        let manifest_hex = manifest_key(name, version).to_hex();
        let ventry = VersionEntry {
            version: version.to_string(),
            manifest_key: manifest_hex,
            timestamp: published_at,
        };

        match announce.packages.iter_mut().find(|p| p.name == name) {
            Some(pkg) => {
                pkg.versions.retain(|v| v.version != version);
                pkg.versions.push(ventry);
                if let Some(latest) =
                    highest_version(pkg.versions.iter().map(|v| v.version.as_str()))
                {
                    pkg.latest_version = latest;
                }
            }
            None => {
                announce.packages.push(PackageEntry {
                    name: name.to_string(),
                    latest_version: version.to_string(),
                    versions: vec![ventry],
                });
            }
        }

        announce.timestamp = now_ms().max(announce.timestamp.saturating_add(1));
        self.sign_announce(handle, &mut announce)?;
        self.store.put(&akey, &announce).await?;
        Ok(())
    }
}

/// Highest version by semver among `versions`. Unparseable strings lose.
fn highest_version<'a>(versions: impl Iterator<Item = &'a str>) -> Option<String> {
    versions
        .filter_map(|v| parse_version(v).map(|parsed| (parsed, v)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, v)| v.to_string())
}

/// Locally prune an oversized publisher list, oldest signed entry first.
///
/// Entries whose `firstSeen` predates the writer's own are never pruned (the
/// writer cannot squat on earlier claimants), and the writer never prunes
/// itself.
fn prune_soft_cap(index: &mut NameIndex, own_pubkey: &str, own_first_seen: u64, cap: usize) {
    if cap == 0 || index.publishers.len() <= cap {
        return;
    }
    let excess = index.publishers.len() - cap;

    let mut removable: Vec<(u64, String)> = index
        .publishers
        .iter()
        .filter(|e| e.pubkey != own_pubkey && e.first_seen >= own_first_seen)
        .map(|e| (e.timestamp, e.pubkey.clone()))
        .collect();
    // Oldest entry timestamp first; among equals the greater pubkey goes first.
    removable.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)));

    let doomed: BTreeSet<String> =
        removable.into_iter().take(excess).map(|(_, pk)| pk).collect();
    index.publishers.retain(|e| !doomed.contains(&e.pubkey));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pk_byte: u8, first_seen: u64, timestamp: u64) -> PublisherEntry {
        PublisherEntry {
            pubkey: format!("ed25519:{}", hex::encode([pk_byte; 32])),
            latest_version: "1.0.0".to_string(),
            first_seen,
            timestamp,
            signature: sig_placeholder(),
        }
    }

    #[test]
    fn highest_version_orders_by_semver() {
        let versions = ["1.2.0", "1.10.0", "0.9.9"];
        assert_eq!(
            highest_version(versions.into_iter()),
            Some("1.10.0".to_string())
        );
    }

    #[test]
    fn prune_never_touches_older_first_seen() {
        let own = entry(0, 100, 100);
        let mut index = NameIndex::new("pkg".to_string(), own.clone(), 100);
        index.publishers.push(entry(1, 50, 1)); // older claimant, protected
        index.publishers.push(entry(2, 200, 2));
        index.publishers.push(entry(3, 200, 3));

        prune_soft_cap(&mut index, &own.pubkey, own.first_seen, 3);
        assert_eq!(index.publishers.len(), 3);
        let kept: Vec<&str> = index.publishers.iter().map(|e| e.pubkey.as_str()).collect();
        // the oldest-signed prunable entry (pk 2) is dropped
        assert!(!kept.contains(&entry(2, 0, 0).pubkey.as_str()));
        assert!(kept.contains(&own.pubkey.as_str()));
        assert!(kept.contains(&entry(1, 0, 0).pubkey.as_str()));
    }
}
