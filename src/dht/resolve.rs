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

//! Name resolution: NameIndex -> publisher -> MinimalManifest -> infohash.
//!
//! Selection is deterministic for a fixed (index state, policy, trust list):
//! every policy has a total tie-break order, so two resolvers holding the
//! same inputs pick the same publisher.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::records::announce::{Announce, SeederStatus};
use crate::core::records::index::{NameIndex, PublisherEntry};
use crate::core::records::manifest::MinimalManifest;
use crate::core::types::{parse_version, InfoHash, PolicyConfig, PolicySelection, PubKey};
use crate::dht::keys::{announce_key, manifest_key, name_index_key, seeder_key};
use crate::dht::store::RecordStore;

/// Resolution failures. `NotFound` and `FetchFailed` are distinct: the first
/// is an answer, the second is the absence of one.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No verified candidate exists for the request.
    #[error("not found")]
    NotFound,
    /// The DHT could not be queried. Transient.
    #[error("fetch failed")]
    FetchFailed,
    /// The fetched manifest is signed by a different publisher than the
    /// index resolves to.
    #[error("publisher mismatch")]
    PublisherMismatch,
}

/// A fully resolved `name@version`.
#[derive(Clone, Debug)]
pub struct ResolvedPackage {
    /// Infohash to hand to the transfer engine.
    pub infohash: InfoHash,
    /// Publisher the name resolved to.
    pub pubkey: PubKey,
    /// True when the manifest's timestamp is past its TTL. Infohashes are
    /// content-addressed, so stale manifests still resolve; the caller may
    /// schedule a refresh for local records.
    pub stale: bool,
}

/// Policy-driven resolver over the record store.
pub struct Resolver {
    store: RecordStore,
    policy: PolicyConfig,
}

impl Resolver {
    /// Build a resolver with the configured policy.
    pub fn new(store: RecordStore, policy: PolicyConfig) -> Self {
        Self { store, policy }
    }

    /// Select one publisher for `name` under the active policy.
    pub async fn resolve_publisher(&self, name: &str) -> Result<PubKey, ResolveError> {
        let key = name_index_key(name);
        let fetched = self
            .store
            .get::<NameIndex>(&key)
            .await
            .map_err(|_| ResolveError::FetchFailed)?
            .ok_or(ResolveError::NotFound)?;

        let index = fetched.record;
        if index.name != name {
            return Err(ResolveError::NotFound);
        }

        let chosen = match self.policy.selection {
            PolicySelection::FirstSeen => first_seen(&index.publishers),
            PolicySelection::LatestVersion => latest_version(&index.publishers),
            PolicySelection::UserTrust => {
                user_trust(&index.publishers, &self.policy.trust_list)
            }
            PolicySelection::SeederCount => self.seeder_count(name, &index.publishers).await,
        };

        let entry = chosen.ok_or(ResolveError::NotFound)?;
        entry.pubkey().map_err(|_| ResolveError::NotFound)
    }

    /// Full resolution path: `name@version` -> infohash.
    ///
    /// The fetched MinimalManifest must be signed by the publisher the name
    /// resolves to; anything else is a mix-and-match.
    pub async fn resolve(&self, name: &str, version: &str) -> Result<ResolvedPackage, ResolveError> {
        let pubkey = self.resolve_publisher(name).await?;

        let key = manifest_key(name, version);
        let fetched = self
            .store
            .get::<MinimalManifest>(&key)
            .await
            .map_err(|_| ResolveError::FetchFailed)?
            .ok_or(ResolveError::NotFound)?;

        let manifest = fetched.record;
        if manifest.name != name || manifest.version != version {
            return Err(ResolveError::NotFound);
        }
        let manifest_pk = manifest.pubkey().map_err(|_| ResolveError::NotFound)?;
        if manifest_pk != pubkey {
            return Err(ResolveError::PublisherMismatch);
        }

        let infohash = manifest.infohash().map_err(|_| ResolveError::NotFound)?;
        Ok(ResolvedPackage { infohash, pubkey, stale: fetched.stale })
    }

    /// seeder-count: attribute each live seeder to the publishers whose
    /// announced versions of `name` it seeds, then pick the publisher with
    /// the most seeders. Ties fall back to first-seen.
    async fn seeder_count<'a>(
        &self,
        name: &str,
        entries: &'a [PublisherEntry],
    ) -> Option<&'a PublisherEntry> {
        // Version set per publisher, from their Announce.
        let mut versions_by_pub: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for entry in entries {
            let Ok(pk) = entry.pubkey() else { continue };
            let Ok(Some(fetched)) = self.store.get::<Announce>(&announce_key(&pk)).await else {
                continue;
            };
            let versions: Vec<String> = fetched
                .record
                .packages
                .iter()
                .filter(|p| p.name == name)
                .flat_map(|p| p.versions.iter().map(|v| v.version.clone()))
                .collect();
            versions_by_pub.insert(entry.pubkey.as_str(), versions);
        }

        // Live seeders, counted against every publisher whose version they seed.
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for seeder_id in &self.policy.seeder_ids {
            let Ok(Some(fetched)) = self.store.get::<SeederStatus>(&seeder_key(seeder_id)).await
            else {
                continue;
            };
            if fetched.stale {
                continue; // liveness records rot fast; stale means not live
            }
            for pkg in &fetched.record.seeded_packages {
                let Some((pkg_name, pkg_version)) = pkg.split_once('@') else { continue };
                if pkg_name != name {
                    continue;
                }
                for (pubkey, versions) in &versions_by_pub {
                    if versions.iter().any(|v| v == pkg_version) {
                        *counts.entry(*pubkey).or_insert(0) += 1;
                    }
                }
            }
        }

        let best = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
        if best == 0 {
            return first_seen(entries);
        }
        let leaders: Vec<&PublisherEntry> = entries
            .iter()
            .filter(|e| counts.get(e.pubkey.as_str()).copied().unwrap_or(0) == best)
            .collect();
        leaders
            .into_iter()
            .min_by(|a, b| a.first_seen.cmp(&b.first_seen).then_with(|| a.pubkey.cmp(&b.pubkey)))
    }
}

/// first-seen: min `firstSeen`, ties by lexicographic pubkey.
fn first_seen(entries: &[PublisherEntry]) -> Option<&PublisherEntry> {
    entries
        .iter()
        .min_by(|a, b| a.first_seen.cmp(&b.first_seen).then_with(|| a.pubkey.cmp(&b.pubkey)))
}

/// latest-version: max semver, ties by min `firstSeen`, then pubkey.
fn latest_version(entries: &[PublisherEntry]) -> Option<&PublisherEntry> {
    entries
        .iter()
        .filter_map(|e| parse_version(&e.latest_version).map(|v| (v, e)))
        .max_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| b.1.first_seen.cmp(&a.1.first_seen))
                .then_with(|| b.1.pubkey.cmp(&a.1.pubkey))
        })
        .map(|(_, e)| e)
}

/// user-trust: first trust-list hit, in the caller's list order; otherwise
/// fall back to first-seen.
fn user_trust<'a>(entries: &'a [PublisherEntry], trust: &[String]) -> Option<&'a PublisherEntry> {
    for trusted in trust {
        if let Some(entry) = entries.iter().find(|e| &e.pubkey == trusted) {
            return Some(entry);
        }
    }
    first_seen(entries)
}
